//! Console inbox — logs outgoing messages to the terminal.
//!
//! A stand-in channel for the demo binary and tests; it has no inbound side
//! of its own (`receive` just waits for shutdown).

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::InboxError;
use crate::models::{ChannelKind, Message};

use super::Inbox;

/// An inbox that prints sends instead of delivering them.
pub struct ConsoleInbox {
    id: i64,
    channel: ChannelKind,
    from_address: String,
}

impl ConsoleInbox {
    pub fn new(id: i64, channel: ChannelKind, from_address: impl Into<String>) -> Self {
        Self {
            id,
            channel,
            from_address: from_address.into(),
        }
    }
}

#[async_trait]
impl Inbox for ConsoleInbox {
    fn identifier(&self) -> i64 {
        self.id
    }

    fn channel(&self) -> ChannelKind {
        self.channel
    }

    fn from_address(&self) -> String {
        self.from_address.clone()
    }

    async fn send(&self, message: &Message) -> Result<(), InboxError> {
        info!(
            inbox_id = self.id,
            message_uuid = %message.uuid,
            conversation_uuid = %message.conversation_uuid,
            in_reply_to = message.in_reply_to.as_deref().unwrap_or(""),
            references = message.references.len(),
            "console inbox delivering message:\n{}",
            message.text_content
        );
        Ok(())
    }

    async fn receive(&self, token: CancellationToken) -> Result<(), InboxError> {
        token.cancelled().await;
        Ok(())
    }
}
