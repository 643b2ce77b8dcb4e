//! Telegram bot that answers questions with an LLM and republishes each
//! question/answer pair to a channel.

pub mod bot;
pub mod completion;
pub mod config;
pub mod fallback;
pub mod telegram_log;
pub mod transport;
