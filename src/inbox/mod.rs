//! Channel (inbox) abstraction.
//!
//! An inbox is a configured channel endpoint (an email account, a live-chat
//! widget) able to receive messages from contacts and deliver agent replies.
//! Wire-protocol plumbing (IMAP/SMTP, WebSockets) lives behind this trait;
//! the dispatch engine only ever sees [`Message`]s.

pub mod console;

pub use console::ConsoleInbox;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::InboxError;
use crate::models::{ChannelKind, Message};

/// A channel endpoint the dispatch engine can send through and receive from.
#[async_trait]
pub trait Inbox: Send + Sync {
    /// Unique inbox id, matching `Message::inbox_id`.
    fn identifier(&self) -> i64;

    /// The channel this inbox speaks.
    fn channel(&self) -> ChannelKind;

    /// Address outgoing messages are sent from (email only; empty for chat).
    fn from_address(&self) -> String;

    /// Deliver an outgoing message to the contact.
    async fn send(&self, message: &Message) -> Result<(), InboxError>;

    /// Run the inbound receive loop until the token is cancelled. The
    /// implementation enqueues received messages on the dispatch engine.
    async fn receive(&self, token: CancellationToken) -> Result<(), InboxError>;
}
