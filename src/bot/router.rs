//! Routes inbound messages to command handlers or the question flow.

use std::sync::Arc;

use teloxide::types::{ChatId, Recipient, Update, UpdateKind};
use teloxide::utils::command::{BotCommands, ParseError};
use tracing::{debug, info, warn};

use crate::bot::lifecycle::Lifecycle;
use crate::bot::message::{ForwardOrigin, ForwardedChat, InboundMessage};
use crate::bot::publisher::Publisher;
use crate::bot::telegram::{Formatting, TelegramApi, describe_recipient, parse_recipient};
use crate::completion::{self, Completer};
use crate::config::DeployMode;

pub const GREETING: &str = "Привет! Задай мне вопрос, и я отправлю ответ в канал.";
pub const TEST_ACK: &str = "✅ Бот работает и принимает сообщения.";
pub const PROCESSING: &str = "Обрабатываю ваш запрос...";
pub const PUBLISHED: &str = "Ответ опубликован в канале!";
pub const RETRY_SHORTLY: &str = "⏳ Бот перезапускается. Повторите запрос через минуту.";
pub const PERMISSION_DENIED: &str = "⛔ Эта команда доступна только администратору.";
pub const NO_FORWARD_INFO: &str = "Не удалось найти информацию о канале в пересланном сообщении.";
pub const SET_CHANNEL_USAGE: &str =
    "Использование: /setchannel <ID или @имя канала>, например /setchannel -1001234567890";

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Доступные команды:")]
pub enum Command {
    #[command(description = "начать работу")]
    Start,
    #[command(description = "список команд")]
    Help,
    #[command(description = "проверить, что бот отвечает")]
    Test,
    #[command(description = "состояние webhook и канала")]
    Status,
    #[command(description = "показать ID канала для публикаций")]
    ChannelId,
    #[command(description = "проверить новый канал (только для администратора)")]
    SetChannel(String),
}

/// What an inbound message asks for.
#[derive(Debug, PartialEq)]
pub enum Route {
    Forwarded(ForwardOrigin),
    Command(Command),
    Question,
    /// A command addressed to another bot in the same chat.
    Ignored,
}

/// Forwarded messages are never treated as commands or questions.
pub fn classify(msg: &InboundMessage, bot_username: &str) -> Route {
    if let Some(origin) = &msg.forwarded {
        return Route::Forwarded(origin.clone());
    }
    match Command::parse(msg.text.trim(), bot_username) {
        Ok(command) => Route::Command(command),
        Err(ParseError::WrongBotName(_)) => Route::Ignored,
        Err(_) => Route::Question,
    }
}

/// Static facts the router reports or checks against.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub bot_id: u64,
    pub bot_username: String,
    pub admin_id: Option<u64>,
    pub mode: DeployMode,
}

pub struct MessageRouter {
    telegram: Arc<dyn TelegramApi>,
    completer: Arc<dyn Completer>,
    publisher: Publisher,
    lifecycle: Arc<Lifecycle>,
    settings: RouterSettings,
}

impl MessageRouter {
    pub fn new(
        telegram: Arc<dyn TelegramApi>,
        completer: Arc<dyn Completer>,
        publisher: Publisher,
        lifecycle: Arc<Lifecycle>,
        settings: RouterSettings,
    ) -> Self {
        Self {
            telegram,
            completer,
            publisher,
            lifecycle,
            settings,
        }
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    /// Single entry point for both update sources.
    pub async fn handle_update(&self, update: Update) {
        let UpdateKind::Message(msg) = update.kind else {
            debug!("Ignoring non-message update {:?}", update.id);
            return;
        };
        let Some(inbound) = InboundMessage::from_telegram(&msg) else {
            debug!("Ignoring message {} without text or sender", msg.id.0);
            return;
        };
        self.handle_message(inbound).await;
    }

    pub async fn handle_message(&self, msg: InboundMessage) {
        let Some(_work) = self.lifecycle.enter() else {
            info!("Refusing message from {} while draining", msg.sender_id);
            self.reply(&msg, RETRY_SHORTLY).await;
            return;
        };

        match classify(&msg, &self.settings.bot_username) {
            Route::Forwarded(origin) => self.handle_forwarded(&msg, origin).await,
            Route::Command(command) => self.handle_command(&msg, command).await,
            Route::Question => self.handle_question(&msg).await,
            Route::Ignored => debug!("Ignoring command for another bot from {}", msg.sender_id),
        }
    }

    async fn handle_command(&self, msg: &InboundMessage, command: Command) {
        info!("⌨️ {:?} from {}", command, msg.sender_id);

        let text = match command {
            Command::Start => GREETING.to_string(),
            Command::Help => Command::descriptions().to_string(),
            Command::Test => TEST_ACK.to_string(),
            Command::Status => self.status_report().await,
            Command::ChannelId => self.channel_id_report(msg.sender_id),
            Command::SetChannel(arg) => self.set_channel(msg.sender_id, &arg).await,
        };
        self.reply(msg, &text).await;
    }

    async fn handle_forwarded(&self, msg: &InboundMessage, origin: ForwardOrigin) {
        let text = match origin {
            ForwardOrigin::Chat(chat) => {
                info!("📋 Forwarded chat info requested: {}", chat.id);
                describe_chat(&chat)
            }
            ForwardOrigin::User => NO_FORWARD_INFO.to_string(),
        };
        self.reply(msg, &text).await;
    }

    async fn handle_question(&self, msg: &InboundMessage) {
        let question = msg.text.trim();
        if question.is_empty() {
            return;
        }

        let preview: String = question.chars().take(100).collect();
        info!("❓ Question from {}: \"{preview}\"", msg.sender_id);

        self.reply(msg, PROCESSING).await;
        let answer = completion::answer(self.completer.as_ref(), question).await;

        match self.publisher.publish(question, &answer).await {
            Ok(()) => self.reply(msg, PUBLISHED).await,
            Err(e) => {
                warn!("Failed to publish answer: {e}");
                self.reply(msg, &format!("❌ Ошибка при публикации ответа: {e}")).await;
            }
        }
    }

    async fn status_report(&self) -> String {
        let channel = self.publisher.channel();
        let label = describe_recipient(channel);
        let mut lines = vec![
            "📊 Статус бота".to_string(),
            format!("Режим: {}", self.settings.mode.as_str()),
        ];

        match self.telegram.webhook_info().await {
            Ok(info) => {
                let url = info.url.as_deref().map(redact_webhook_url);
                lines.push(format!("Webhook: {}", url.as_deref().unwrap_or("не установлен")));
                lines.push(format!("Ожидающих обновлений: {}", info.pending_update_count));
                if let Some(error) = info.last_error_message {
                    lines.push(format!("Последняя ошибка webhook: {error}"));
                }
            }
            Err(e) => lines.push(format!("Webhook: не удалось получить информацию ({e})")),
        }

        match self.telegram.check_chat(channel.clone()).await {
            Ok(()) => lines.push(format!("Канал {label}: доступен ✅")),
            Err(e) => lines.push(format!("Канал {label}: недоступен ❌ ({e})")),
        }

        match self.telegram.member_status(channel.clone(), self.settings.bot_id).await {
            Ok(status) => lines.push(format!("Права бота в канале: {status}")),
            Err(e) => lines.push(format!("Права бота в канале: неизвестно ({e})")),
        }

        lines.push(format!("Состояние: {}", self.lifecycle.phase().as_str()));
        lines.join("\n")
    }

    fn channel_id_report(&self, sender_id: u64) -> String {
        let mut text = format!("Канал для публикаций: {}", describe_recipient(self.publisher.channel()));
        if self.is_operator(sender_id) {
            text.push_str(
                "\n\nЧтобы сменить канал:\n\
                 1. Добавьте бота администратором в новый канал.\n\
                 2. Перешлите сюда любое сообщение из канала, чтобы узнать его ID.\n\
                 3. Проверьте доступ: /setchannel <ID>.\n\
                 4. Обновите переменную CHANNEL_ID и перезапустите бота.",
            );
        }
        text
    }

    /// Checks a candidate channel. The running configuration is left untouched.
    async fn set_channel(&self, sender_id: u64, arg: &str) -> String {
        if !self.is_operator(sender_id) {
            warn!("Non-operator {} tried /setchannel", sender_id);
            return PERMISSION_DENIED.to_string();
        }

        let Ok(candidate) = parse_recipient(arg) else {
            return SET_CHANNEL_USAGE.to_string();
        };
        let label = describe_recipient(&candidate);

        match self.telegram.check_chat(candidate).await {
            Ok(()) => format!(
                "✅ Канал {label} доступен.\n\
                 Установите CHANNEL_ID={label} и перезапустите бота. \
                 До перезапуска ответы публикуются в {}.",
                describe_recipient(self.publisher.channel())
            ),
            Err(e) => format!("❌ Канал {label} недоступен: {e}"),
        }
    }

    fn is_operator(&self, user_id: u64) -> bool {
        self.settings.admin_id == Some(user_id)
    }

    async fn reply(&self, msg: &InboundMessage, text: &str) {
        // Failures are already logged by the client.
        let chat = Recipient::Id(ChatId(msg.chat_id));
        let _ = self.telegram.send_message(chat, text, Formatting::Plain).await;
    }
}

fn describe_chat(chat: &ForwardedChat) -> String {
    format!(
        "📋 Информация о чате:\nID: {}\nТип: {}\nНазвание: {}",
        chat.id,
        chat.kind,
        chat.title.as_deref().unwrap_or("—")
    )
}

/// The webhook path embeds the bot token; never echo it back.
fn redact_webhook_url(url: &str) -> String {
    match url.find("/webhook/") {
        Some(idx) => format!("{}/webhook/***", &url[..idx]),
        None => url.to_string(),
    }
}
