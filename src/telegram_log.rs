//! Mirrors log events into an operator chat.

use std::sync::Arc;
use std::time::Duration;

use teloxide::types::{ChatId, Recipient};
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::bot::TelegramApi;
use crate::bot::telegram::Formatting;

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const MAX_BUFFERED: usize = 50;
const MAX_CHARS: usize = 4000;

/// Events from the Telegram client itself are never forwarded, otherwise a
/// failing send would log a warning that triggers another send.
const SKIPPED_TARGET: &str = "askchannel::bot::telegram";

enum LogLine {
    /// WARN and ERROR, sent right away.
    Urgent(String),
    /// INFO, batched.
    Info(String),
}

pub struct TelegramLogLayer {
    tx: mpsc::UnboundedSender<LogLine>,
}

impl TelegramLogLayer {
    /// Must be called from within a tokio runtime.
    pub fn new(telegram: Arc<dyn TelegramApi>, chat_id: i64) -> Self {
        Self::with_flush_interval(telegram, chat_id, FLUSH_INTERVAL)
    }

    fn with_flush_interval(telegram: Arc<dyn TelegramApi>, chat_id: i64, every: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(forward(telegram, chat_id, rx, every));
        Self { tx }
    }
}

async fn forward(
    telegram: Arc<dyn TelegramApi>,
    chat_id: i64,
    mut rx: mpsc::UnboundedReceiver<LogLine>,
    every: Duration,
) {
    let mut buffer: Vec<String> = Vec::new();
    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            line = rx.recv() => match line {
                Some(LogLine::Urgent(text)) => send(telegram.as_ref(), chat_id, &text).await,
                Some(LogLine::Info(text)) => {
                    buffer.push(text);
                    if buffer.len() >= MAX_BUFFERED {
                        flush(telegram.as_ref(), chat_id, &mut buffer).await;
                    }
                }
                None => {
                    flush(telegram.as_ref(), chat_id, &mut buffer).await;
                    break;
                }
            },
            _ = interval.tick() => flush(telegram.as_ref(), chat_id, &mut buffer).await,
        }
    }
}

async fn flush(telegram: &dyn TelegramApi, chat_id: i64, buffer: &mut Vec<String>) {
    if buffer.is_empty() {
        return;
    }
    let combined = buffer.join("\n");
    buffer.clear();
    send(telegram, chat_id, &combined).await;
}

async fn send(telegram: &dyn TelegramApi, chat_id: i64, text: &str) {
    let text = truncate(text);
    let chat = Recipient::Id(ChatId(chat_id));
    if let Err(e) = telegram.send_message(chat, &text, Formatting::Plain).await {
        eprintln!("Failed to mirror log to Telegram: {e}");
    }
}

fn truncate(text: &str) -> String {
    match text.char_indices().nth(MAX_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{} = {}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push(format!("{} = {:?}", field.name(), value));
        }
    }
}

impl MessageVisitor {
    fn into_text(self) -> String {
        let mut parts = Vec::with_capacity(self.fields.len() + 1);
        if !self.message.is_empty() {
            parts.push(self.message);
        }
        parts.extend(self.fields);
        parts.join(", ")
    }
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = *metadata.level();
        if level > Level::INFO || metadata.target().starts_with(SKIPPED_TARGET) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let text = visitor.into_text();
        let line = match level {
            Level::ERROR => LogLine::Urgent(format!("❌ {text}")),
            Level::WARN => LogLine::Urgent(format!("⚠️ {text}")),
            _ => LogLine::Info(text),
        };

        // Only fails once the forwarder has stopped.
        let _ = self.tx.send(line);
    }
}
