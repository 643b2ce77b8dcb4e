//! Recording fakes for the Telegram and completion seams.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use teloxide::types::{ChatId, Recipient, Update};

use crate::bot::lifecycle::Lifecycle;
use crate::bot::publisher::Publisher;
use crate::bot::router::{MessageRouter, RouterSettings};
use crate::bot::telegram::{BotIdentity, Formatting, TelegramApi, WebhookStatus};
use crate::completion::{Completer, Error as CompletionError};
use crate::config::DeployMode;

pub const TEST_CHANNEL: i64 = -1001234567890;

pub fn chat(id: i64) -> Recipient {
    Recipient::Id(ChatId(id))
}

/// Router wired to fakes, publishing to [`TEST_CHANNEL`].
pub fn test_router(
    telegram: Arc<MockTelegram>,
    completer: Arc<MockCompleter>,
    lifecycle: Arc<Lifecycle>,
    mode: DeployMode,
) -> MessageRouter {
    MessageRouter::new(
        telegram.clone(),
        completer,
        Publisher::new(telegram, chat(TEST_CHANNEL)),
        lifecycle,
        RouterSettings {
            bot_id: 1000,
            bot_username: "askchannel_bot".to_string(),
            admin_id: Some(42),
            mode,
        },
    )
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub chat: Recipient,
    pub text: String,
    pub formatting: Formatting,
}

#[derive(Default)]
pub struct MockTelegram {
    sent: Mutex<Vec<SentMessage>>,
    chat_checks: Mutex<Vec<Recipient>>,
    unreachable: Mutex<Vec<Recipient>>,
    /// Errors returned by upcoming Markdown sends, consumed in order.
    markdown_failures: Mutex<Vec<String>>,
    plain_failures: Mutex<Vec<String>>,
    webhook_url: Mutex<Option<String>>,
    webhook_calls: Mutex<Vec<String>>,
    member_statuses: Mutex<Vec<(Recipient, String)>>,
    update_batches: Mutex<Vec<Vec<Update>>>,
    offsets: Mutex<Vec<Option<i32>>>,
}

impl MockTelegram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unreachable(&self, chat: Recipient) {
        self.unreachable.lock().unwrap().push(chat);
    }

    pub fn fail_next_markdown(&self, error: &str) {
        self.markdown_failures.lock().unwrap().push(error.to_string());
    }

    pub fn fail_next_plain(&self, error: &str) {
        self.plain_failures.lock().unwrap().push(error.to_string());
    }

    pub fn set_registered_webhook(&self, url: Option<&str>) {
        *self.webhook_url.lock().unwrap() = url.map(str::to_string);
    }

    pub fn set_member_status(&self, chat: Recipient, status: &str) {
        self.member_statuses.lock().unwrap().push((chat, status.to_string()));
    }

    /// Queue a batch for the next `fetch_updates` call.
    pub fn queue_updates(&self, updates: Vec<Update>) {
        self.update_batches.lock().unwrap().push(updates);
    }

    /// Offsets passed to `fetch_updates`, in call order.
    pub fn offsets(&self) -> Vec<Option<i32>> {
        self.offsets.lock().unwrap().clone()
    }

    /// Every send attempt, including rejected ones.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, chat_id: i64) -> Vec<SentMessage> {
        self.sent_to_recipient(&chat(chat_id))
    }

    pub fn sent_to_recipient(&self, recipient: &Recipient) -> Vec<SentMessage> {
        self.sent().into_iter().filter(|m| &m.chat == recipient).collect()
    }

    pub fn chat_checks(&self) -> Vec<Recipient> {
        self.chat_checks.lock().unwrap().clone()
    }

    /// "set:<url>" and "delete" entries, in call order.
    pub fn webhook_calls(&self) -> Vec<String> {
        self.webhook_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelegramApi for MockTelegram {
    async fn send_message(&self, chat: Recipient, text: &str, formatting: Formatting) -> Result<i64, String> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(SentMessage {
            chat,
            text: text.to_string(),
            formatting,
        });
        let failures = match formatting {
            Formatting::Markdown => &self.markdown_failures,
            Formatting::Plain => &self.plain_failures,
        };
        let mut failures = failures.lock().unwrap();
        if !failures.is_empty() {
            return Err(failures.remove(0));
        }
        Ok(sent.len() as i64)
    }

    async fn check_chat(&self, chat: Recipient) -> Result<(), String> {
        let unreachable = self.unreachable.lock().unwrap().contains(&chat);
        self.chat_checks.lock().unwrap().push(chat);
        if unreachable {
            Err("Bad Request: chat not found".to_string())
        } else {
            Ok(())
        }
    }

    async fn member_status(&self, chat: Recipient, _user_id: u64) -> Result<String, String> {
        self.member_statuses
            .lock()
            .unwrap()
            .iter()
            .find(|(c, _)| *c == chat)
            .map(|(_, status)| status.clone())
            .ok_or_else(|| "Bad Request: member not found".to_string())
    }

    async fn get_me(&self) -> Result<BotIdentity, String> {
        Ok(BotIdentity {
            id: 1000,
            username: "askchannel_bot".to_string(),
        })
    }

    async fn webhook_info(&self) -> Result<WebhookStatus, String> {
        Ok(WebhookStatus {
            url: self.webhook_url.lock().unwrap().clone(),
            pending_update_count: 0,
            last_error_message: None,
        })
    }

    async fn set_webhook(&self, url: &str) -> Result<(), String> {
        self.webhook_calls.lock().unwrap().push(format!("set:{url}"));
        *self.webhook_url.lock().unwrap() = Some(url.to_string());
        Ok(())
    }

    async fn delete_webhook(&self) -> Result<(), String> {
        self.webhook_calls.lock().unwrap().push("delete".to_string());
        *self.webhook_url.lock().unwrap() = None;
        Ok(())
    }

    async fn fetch_updates(&self, offset: Option<i32>, _timeout_secs: u32) -> Result<Vec<Update>, String> {
        self.offsets.lock().unwrap().push(offset);
        let batch = {
            let mut batches = self.update_batches.lock().unwrap();
            if batches.is_empty() {
                None
            } else {
                Some(batches.remove(0))
            }
        };
        match batch {
            Some(updates) => Ok(updates),
            None => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(Vec::new())
            }
        }
    }
}

/// Completion fake: fixed answer, failure, or a slow answer.
pub struct MockCompleter {
    answer: Option<String>,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockCompleter {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: Some(answer.to_string()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            answer: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn slow(answer: &str, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::answering(answer)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Completer for MockCompleter {
    async fn complete(&self, _question: &str) -> Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.answer
            .clone()
            .ok_or_else(|| CompletionError::Http("connection refused".to_string()))
    }
}
