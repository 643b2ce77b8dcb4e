//! Telegram client using teloxide.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatMemberStatus, ParseMode, Recipient, Update};
use tracing::{info, warn};

/// How message text should be interpreted by Telegram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Formatting {
    /// Legacy Markdown (`*bold*`, `_italic_`).
    Markdown,
    Plain,
}

/// Bot identity from `getMe`.
#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub id: u64,
    pub username: String,
}

/// Webhook state as reported by Telegram.
#[derive(Debug, Clone, Default)]
pub struct WebhookStatus {
    /// `None` when no webhook is registered.
    pub url: Option<String>,
    pub pending_update_count: u32,
    pub last_error_message: Option<String>,
}

/// Accepts a numeric chat id (`-1001234567890`) or a public `@channelusername`.
pub fn parse_recipient(raw: &str) -> Result<Recipient, String> {
    let raw = raw.trim();
    if let Some(name) = raw.strip_prefix('@') {
        if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Ok(Recipient::ChannelUsername(raw.to_string()));
        }
        return Err(format!("'{raw}' is not a valid @channelusername"));
    }
    raw.parse::<i64>()
        .map(|id| Recipient::Id(ChatId(id)))
        .map_err(|_| format!("expected a numeric chat id or @channelusername, got '{raw}'"))
}

pub fn describe_recipient(recipient: &Recipient) -> String {
    match recipient {
        Recipient::Id(id) => id.0.to_string(),
        Recipient::ChannelUsername(name) => name.clone(),
    }
}

/// The Bot API calls the bot depends on.
#[async_trait]
pub trait TelegramApi: Send + Sync {
    async fn send_message(&self, chat: Recipient, text: &str, formatting: Formatting) -> Result<i64, String>;

    /// Cheap existence check (`getChat`).
    async fn check_chat(&self, chat: Recipient) -> Result<(), String>;

    async fn member_status(&self, chat: Recipient, user_id: u64) -> Result<String, String>;

    async fn get_me(&self) -> Result<BotIdentity, String>;

    async fn webhook_info(&self) -> Result<WebhookStatus, String>;

    async fn set_webhook(&self, url: &str) -> Result<(), String>;

    async fn delete_webhook(&self) -> Result<(), String>;

    async fn fetch_updates(&self, offset: Option<i32>, timeout_secs: u32) -> Result<Vec<Update>, String>;
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl TelegramApi for TelegramClient {
    async fn send_message(&self, chat: Recipient, text: &str, formatting: Formatting) -> Result<i64, String> {
        let mut request = self.bot.send_message(chat, text);

        if formatting == Formatting::Markdown {
            // The post template uses legacy Markdown, not MarkdownV2.
            #[allow(deprecated)]
            let mode = ParseMode::Markdown;
            request = request.parse_mode(mode);
        }

        request.await.map(|msg| msg.id.0 as i64).map_err(|e| {
            let msg = format!("Failed to send: {e}");
            warn!("{}", msg);
            msg
        })
    }

    async fn check_chat(&self, chat: Recipient) -> Result<(), String> {
        let label = describe_recipient(&chat);
        self.bot.get_chat(chat).await.map(|_| ()).map_err(|e| {
            let msg = format!("Chat {label} unreachable: {e}");
            warn!("{}", msg);
            msg
        })
    }

    async fn member_status(&self, chat: Recipient, user_id: u64) -> Result<String, String> {
        info!("Getting chat member: chat={}, user={}", describe_recipient(&chat), user_id);

        let member = self
            .bot
            .get_chat_member(chat, UserId(user_id))
            .await
            .map_err(|e| {
                let msg = format!("Failed to get chat member: {e}");
                warn!("{}", msg);
                msg
            })?;

        let status = match member.status() {
            ChatMemberStatus::Owner => "owner",
            ChatMemberStatus::Administrator => "administrator",
            ChatMemberStatus::Member => "member",
            ChatMemberStatus::Restricted => "restricted",
            ChatMemberStatus::Left => "left",
            ChatMemberStatus::Banned => "banned",
            #[allow(unreachable_patterns)]
            _ => "unknown",
        };
        Ok(status.to_string())
    }

    async fn get_me(&self) -> Result<BotIdentity, String> {
        let me = self
            .bot
            .get_me()
            .await
            .map_err(|e| format!("Failed to get bot info: {e}"))?;

        Ok(BotIdentity {
            id: me.id.0,
            username: me.username().to_string(),
        })
    }

    async fn webhook_info(&self) -> Result<WebhookStatus, String> {
        let info = self
            .bot
            .get_webhook_info()
            .await
            .map_err(|e| format!("Failed to get webhook info: {e}"))?;

        Ok(WebhookStatus {
            url: info.url.map(|u| u.to_string()),
            pending_update_count: info.pending_update_count,
            last_error_message: info.last_error_message,
        })
    }

    async fn set_webhook(&self, url: &str) -> Result<(), String> {
        info!("🔗 Setting webhook");
        let url = reqwest::Url::parse(url).map_err(|e| format!("Invalid webhook URL: {e}"))?;

        self.bot.set_webhook(url).await.map(|_| ()).map_err(|e| {
            let msg = format!("Failed to set webhook: {e}");
            warn!("{}", msg);
            msg
        })
    }

    async fn delete_webhook(&self) -> Result<(), String> {
        info!("🔌 Deleting webhook");

        self.bot.delete_webhook().await.map(|_| ()).map_err(|e| {
            let msg = format!("Failed to delete webhook: {e}");
            warn!("{}", msg);
            msg
        })
    }

    async fn fetch_updates(&self, offset: Option<i32>, timeout_secs: u32) -> Result<Vec<Update>, String> {
        let mut request = self.bot.get_updates().timeout(timeout_secs);
        if let Some(offset) = offset {
            request = request.offset(offset);
        }

        request.await.map_err(|e| format!("Failed to fetch updates: {e}"))
    }
}
