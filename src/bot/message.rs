//! Inbound message normalization.
//!
//! Both update sources hand teloxide types to the router; everything past
//! this module works with [`InboundMessage`] only.

use teloxide::types::{Chat, Message, MessageOrigin};

/// Chat a message was forwarded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedChat {
    pub id: i64,
    /// "channel", "supergroup", "group" or "private".
    pub kind: &'static str,
    pub title: Option<String>,
}

/// Where a forwarded message came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOrigin {
    Chat(ForwardedChat),
    /// Forwarded from a user; carries no chat id.
    User,
}

/// A text message from a user, stripped down to what the router needs.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub sender_id: u64,
    pub chat_id: i64,
    pub text: String,
    pub forwarded: Option<ForwardOrigin>,
}

impl InboundMessage {
    /// Returns `None` for messages without text or without a sender.
    pub fn from_telegram(msg: &Message) -> Option<Self> {
        let sender_id = msg.from.as_ref()?.id.0;
        let text = msg.text().or_else(|| msg.caption())?.to_string();

        let forwarded = msg.forward_origin().map(|origin| match origin {
            MessageOrigin::Chat { sender_chat, .. } => ForwardOrigin::Chat(forwarded_chat(sender_chat)),
            MessageOrigin::Channel { chat, .. } => ForwardOrigin::Chat(forwarded_chat(chat)),
            _ => ForwardOrigin::User,
        });

        Some(Self {
            sender_id,
            chat_id: msg.chat.id.0,
            text,
            forwarded,
        })
    }
}

fn forwarded_chat(chat: &Chat) -> ForwardedChat {
    let kind = if chat.is_channel() {
        "channel"
    } else if chat.is_supergroup() {
        "supergroup"
    } else if chat.is_group() {
        "group"
    } else {
        "private"
    };

    ForwardedChat {
        id: chat.id.0,
        kind,
        title: chat.title().map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(json: serde_json::Value) -> Message {
        serde_json::from_value(json).expect("valid message json")
    }

    fn base(extra: serde_json::Value) -> serde_json::Value {
        let mut value = serde_json::json!({
            "message_id": 7,
            "date": 1700000000,
            "chat": {"id": 555, "type": "private", "first_name": "Ann"},
            "from": {"id": 555, "is_bot": false, "first_name": "Ann"},
            "text": "hello"
        });
        if let (Some(obj), Some(extra)) = (value.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        value
    }

    #[test]
    fn test_plain_text_message() {
        let msg = message(base(serde_json::json!({})));
        let inbound = InboundMessage::from_telegram(&msg).unwrap();
        assert_eq!(inbound.sender_id, 555);
        assert_eq!(inbound.chat_id, 555);
        assert_eq!(inbound.text, "hello");
        assert!(inbound.forwarded.is_none());
    }

    #[test]
    fn test_forwarded_from_channel() {
        let msg = message(base(serde_json::json!({
            "forward_origin": {
                "type": "channel",
                "date": 1700000000,
                "chat": {"id": -1001234567890i64, "type": "channel", "title": "Answers"},
                "message_id": 12
            }
        })));
        let inbound = InboundMessage::from_telegram(&msg).unwrap();
        assert_eq!(
            inbound.forwarded,
            Some(ForwardOrigin::Chat(ForwardedChat {
                id: -1001234567890,
                kind: "channel",
                title: Some("Answers".to_string()),
            }))
        );
    }

    #[test]
    fn test_forwarded_from_user() {
        let msg = message(base(serde_json::json!({
            "forward_origin": {
                "type": "user",
                "date": 1700000000,
                "sender_user": {"id": 9, "is_bot": false, "first_name": "Bob"}
            }
        })));
        let inbound = InboundMessage::from_telegram(&msg).unwrap();
        assert_eq!(inbound.forwarded, Some(ForwardOrigin::User));
    }
}
