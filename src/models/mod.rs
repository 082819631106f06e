//! Domain types shared across the engines.

pub mod conversation;
pub mod message;
pub mod team;
pub mod user;

pub use conversation::{Contact, Conversation};
pub use message::{
    Attachment, ContentType, IncomingMessage, Media, Message, MessageStatus, MessageType,
    SenderType,
};
pub use team::{AssignmentType, Team, TeamMember};
pub use user::{AvailabilityStatus, User, UserKind};

use serde::{Deserialize, Serialize};

/// The kind of channel an inbox speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Email,
    LiveChat,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::LiveChat => "livechat",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
