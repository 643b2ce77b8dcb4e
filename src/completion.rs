//! Chat completion client (OpenAI-compatible API).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::fallback;

/// Upper bound on a single completion call.
pub const COMPLETION_TIMEOUT: Duration = Duration::from_secs(15);

/// Anything that can turn a question into an answer.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, question: &str) -> Result<String, Error>;
}

pub struct Client {
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl Client {
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        max_tokens: u32,
    ) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(COMPLETION_TIMEOUT)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            api_key,
            base_url,
            model,
            max_tokens,
            http,
        })
    }
}

#[async_trait]
impl Completer for Client {
    async fn complete(&self, question: &str) -> Result<String, Error> {
        let request = ApiRequest {
            model: &self.model,
            messages: vec![ApiMessage {
                role: "user",
                content: question,
            }],
            max_tokens: self.max_tokens,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout
                } else {
                    Error::Http(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("{status}: {body}")));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        debug!("Completion returned {} choice(s)", api_response.choices.len());
        extract_answer(api_response)
    }
}

fn extract_answer(response: ApiResponse) -> Result<String, Error> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or(Error::Empty)
}

/// Ask the completion service, substituting the canned answer on any failure.
pub async fn answer(completer: &dyn Completer, question: &str) -> String {
    match completer.complete(question).await {
        Ok(text) => text,
        Err(e) => {
            warn!("Completion failed, using fallback: {e}");
            fallback::answer(question).to_string()
        }
    }
}

#[derive(Debug)]
pub enum Error {
    Http(String),
    Timeout,
    Api(String),
    Parse(String),
    Empty,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Timeout => write!(f, "timed out after {}s", COMPLETION_TIMEOUT.as_secs()),
            Error::Api(e) => write!(f, "API error: {e}"),
            Error::Parse(e) => write!(f, "Parse error: {e}"),
            Error::Empty => write!(f, "Empty response"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    enum Fixed {
        Answer(&'static str),
        TimedOut,
    }

    #[async_trait]
    impl Completer for Fixed {
        async fn complete(&self, _question: &str) -> Result<String, Error> {
            match self {
                Fixed::Answer(text) => Ok(text.to_string()),
                Fixed::TimedOut => Err(Error::Timeout),
            }
        }
    }

    fn parse(json: &str) -> ApiResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_extract_trims_first_choice() {
        let response = parse(
            r#"{"choices":[{"message":{"role":"assistant","content":"  Paris.\n"}},
                           {"message":{"role":"assistant","content":"ignored"}}]}"#,
        );
        assert_eq!(extract_answer(response).unwrap(), "Paris.");
    }

    #[test]
    fn test_extract_empty_choices() {
        let response = parse(r#"{"choices":[]}"#);
        assert!(matches!(extract_answer(response), Err(Error::Empty)));
    }

    #[test]
    fn test_extract_blank_or_null_content() {
        let blank = parse(r#"{"choices":[{"message":{"content":"   "}}]}"#);
        assert!(matches!(extract_answer(blank), Err(Error::Empty)));

        let null = parse(r#"{"choices":[{"message":{"content":null}}]}"#);
        assert!(matches!(extract_answer(null), Err(Error::Empty)));
    }

    #[test]
    fn test_request_body_shape() {
        let request = ApiRequest {
            model: "gpt-4",
            messages: vec![ApiMessage { role: "user", content: "hi" }],
            max_tokens: 200,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "gpt-4",
                "messages": [{"role": "user", "content": "hi"}],
                "max_tokens": 200
            })
        );
    }

    #[tokio::test]
    async fn test_answer_passes_completion_through() {
        let completer = Fixed::Answer("42");
        assert_eq!(answer(&completer, "what is the answer?").await, "42");
    }

    #[tokio::test]
    async fn test_answer_falls_back_on_error() {
        let completer = Fixed::TimedOut;
        assert_eq!(
            answer(&completer, "What is the capital of Russia?").await,
            "Столица России - Москва."
        );
    }
}
