//! Republishes question/answer pairs to the broadcast channel.

use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use teloxide::types::Recipient;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::bot::telegram::{Formatting, TelegramApi, describe_recipient};

/// Telegram's wording when it rejects the markup of a message.
static PARSE_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)can'?t parse entities|parse message text").expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The existence check on the channel failed; nothing was sent.
    Unreachable(String),
    /// Telegram refused the post.
    Rejected(String),
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable(e) => write!(f, "channel unreachable: {e}"),
            Self::Rejected(e) => write!(f, "channel rejected the post: {e}"),
        }
    }
}

impl std::error::Error for PublishError {}

/// Render a channel post.
pub fn format_post(question: &str, answer: &str, formatting: Formatting) -> String {
    match formatting {
        Formatting::Markdown => format!("❓ *Вопрос:* {question}\n\n💡 *Ответ:* {answer}"),
        Formatting::Plain => format!("❓ Вопрос: {question}\n\n💡 Ответ: {answer}"),
    }
}

pub fn is_parse_error(error: &str) -> bool {
    PARSE_ERROR.is_match(error)
}

pub struct Publisher {
    telegram: Arc<dyn TelegramApi>,
    channel: Recipient,
    /// Serializes posts so they never interleave in the channel.
    order: Mutex<()>,
}

impl Publisher {
    pub fn new(telegram: Arc<dyn TelegramApi>, channel: Recipient) -> Self {
        Self {
            telegram,
            channel,
            order: Mutex::new(()),
        }
    }

    pub fn channel(&self) -> &Recipient {
        &self.channel
    }

    pub async fn publish(&self, question: &str, answer: &str) -> Result<(), PublishError> {
        self.telegram
            .check_chat(self.channel.clone())
            .await
            .map_err(PublishError::Unreachable)?;

        let _turn = self.order.lock().await;

        let post = format_post(question, answer, Formatting::Markdown);
        match self.telegram.send_message(self.channel.clone(), &post, Formatting::Markdown).await {
            Ok(_) => {
                info!("📢 Published answer to channel {}", describe_recipient(&self.channel));
                Ok(())
            }
            Err(e) if is_parse_error(&e) => {
                warn!("Markdown rejected, retrying as plain text: {e}");
                let plain = format_post(question, answer, Formatting::Plain);
                self.telegram
                    .send_message(self.channel.clone(), &plain, Formatting::Plain)
                    .await
                    .map(|_| {
                        info!("📢 Published plain-text answer to channel {}", describe_recipient(&self.channel))
                    })
                    .map_err(PublishError::Rejected)
            }
            Err(e) => Err(PublishError::Rejected(e)),
        }
    }
}
