//! Message domain types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ChannelKind;
use super::conversation::Contact;

/// What a message is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Incoming,
    Outgoing,
    /// System-generated conversation activity (assignment, status change…).
    Activity,
}

/// Delivery status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sent,
    Failed,
    Received,
}

impl MessageStatus {
    /// Whether a transition from `self` to `to` is a legal status move.
    ///
    /// Pending→{Sent,Failed} happen on send; Failed→Pending is the explicit
    /// operator retry. Private and activity messages are inserted directly
    /// as Sent and never move again.
    pub fn can_transition(self, to: MessageStatus) -> bool {
        matches!(
            (self, to),
            (MessageStatus::Pending, MessageStatus::Sent)
                | (MessageStatus::Pending, MessageStatus::Failed)
                | (MessageStatus::Failed, MessageStatus::Pending)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Sent => "sent",
            MessageStatus::Failed => "failed",
            MessageStatus::Received => "received",
        }
    }
}

/// Who sent a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    Agent,
    Contact,
}

impl SenderType {
    pub fn as_str(self) -> &'static str {
        match self {
            SenderType::Agent => "agent",
            SenderType::Contact => "contact",
        }
    }
}

/// Content type of a message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Html,
    Text,
}

/// A raw attachment as received from a channel, before upload.
#[derive(Debug, Clone, Default)]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    pub content: Vec<u8>,
    /// Inline content id (`cid:`) for images embedded in HTML bodies.
    /// Empty for regular file attachments.
    pub content_id: String,
    pub disposition: String,
    pub size: usize,
}

/// A stored media record the message's attachments were uploaded as.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub id: i64,
    pub uuid: Uuid,
    pub filename: String,
    pub content_type: String,
    pub size: usize,
    pub disposition: String,
    pub content_id: Option<String>,
}

/// A conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub uuid: Uuid,
    pub conversation_id: i64,
    pub conversation_uuid: Uuid,
    pub message_type: MessageType,
    pub status: MessageStatus,
    pub private: bool,
    pub sender_id: i64,
    pub sender_type: SenderType,
    /// Inbox the message is sent through (outgoing) or arrived on (incoming).
    pub inbox_id: i64,
    /// From address, filled in from the inbox at send time for email.
    pub from: Option<String>,
    /// Channel-native message id, used for email threading.
    pub source_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub content: String,
    pub text_content: String,
    pub content_type: ContentType,
    pub meta: serde_json::Value,
    #[serde(skip)]
    pub attachments: Vec<Attachment>,
    pub media: Vec<Media>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// An empty message skeleton; callers fill in the fields they know.
    /// The store assigns `id`, `uuid` and `created_at` on insert.
    pub fn new(message_type: MessageType, status: MessageStatus) -> Self {
        Self {
            id: 0,
            uuid: Uuid::nil(),
            conversation_id: 0,
            conversation_uuid: Uuid::nil(),
            message_type,
            status,
            private: false,
            sender_id: 0,
            sender_type: SenderType::Agent,
            inbox_id: 0,
            from: None,
            source_id: None,
            in_reply_to: None,
            references: Vec::new(),
            content: String::new(),
            text_content: String::new(),
            content_type: ContentType::Html,
            meta: serde_json::Value::Object(Default::default()),
            attachments: Vec::new(),
            media: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// An inbound message envelope handed to the dispatch engine by an inbox
/// receiver, before any conversation is resolved.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub inbox_id: i64,
    pub channel: ChannelKind,
    /// Sender contact as parsed from the channel; upserted on processing.
    pub contact: Contact,
    pub message: Message,
    /// Subject line, used when a new conversation has to be created.
    pub subject: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_follow_lifecycle() {
        use MessageStatus::*;

        assert!(Pending.can_transition(Sent));
        assert!(Pending.can_transition(Failed));
        assert!(Failed.can_transition(Pending));

        // Terminal and nonsensical moves.
        assert!(!Sent.can_transition(Pending));
        assert!(!Sent.can_transition(Failed));
        assert!(!Failed.can_transition(Sent));
        assert!(!Received.can_transition(Sent));
        assert!(!Pending.can_transition(Received));
    }

    #[test]
    fn new_message_has_empty_meta_object() {
        let msg = Message::new(MessageType::Outgoing, MessageStatus::Pending);
        assert!(msg.meta.is_object());
        assert_eq!(msg.meta, serde_json::json!({}));
    }
}
