//! Conversation domain types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A contact as embedded in a conversation, with the channel-supplied
/// identity fields and the free-form custom attribute map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: String,
    /// Arbitrary JSON attribute map, matched by custom-attribute rule
    /// conditions.
    pub custom_attributes: serde_json::Value,
}

impl Contact {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// A conversation.
///
/// A conversation is unassigned iff `assigned_user_id` is `None`; a team
/// routing (`assigned_team_id`) alone does not count as assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub uuid: Uuid,
    pub reference_number: String,
    pub contact_id: i64,
    pub inbox_id: i64,
    pub assigned_user_id: Option<i64>,
    pub assigned_team_id: Option<i64>,
    pub status_id: Option<i64>,
    pub priority_id: Option<i64>,
    pub subject: Option<String>,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub first_reply_at: Option<DateTime<Utc>>,
    pub last_reply_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Set when a contact message arrives, cleared when an agent replies.
    pub waiting_since: Option<DateTime<Utc>>,
    pub sla_policy_id: Option<i64>,
    pub applied_sla_id: Option<i64>,
    pub contact: Contact,
    /// Cached summary meta (last message / last chat message blocks).
    pub meta: serde_json::Value,
}

impl Conversation {
    pub fn is_unassigned(&self) -> bool {
        self.assigned_user_id.is_none()
    }
}
