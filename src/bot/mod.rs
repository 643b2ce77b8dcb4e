//! Bot core - turns user questions into channel posts.

pub mod lifecycle;
pub mod message;
pub mod publisher;
pub mod router;
pub mod telegram;

#[cfg(test)]
pub(crate) mod mock;

pub use lifecycle::{Lifecycle, Phase};
pub use message::InboundMessage;
pub use publisher::{PublishError, Publisher};
pub use router::{MessageRouter, RouterSettings};
pub use telegram::{TelegramApi, TelegramClient};
