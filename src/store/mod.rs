//! Store seams consumed by the engines.
//!
//! Everything the core does not own — persistence, media storage, webhooks,
//! WebSocket broadcast, the AI completion pipeline, template rendering — is
//! consumed through the narrow async traits in this module. `memory` ships
//! an in-memory implementation for the demo binary and integration tests.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::automation::rule::{RuleAction, RuleRecord};
use crate::error::{InboxError, RenderError, SlaError, StoreError};
use crate::inbox::Inbox;
use crate::models::{
    ChannelKind, Contact, Conversation, Media, Message, MessageStatus, MessageType, SenderType,
    Team, TeamMember, User,
};

/// Message persistence.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert a message. Assigns `id`, `uuid` and `created_at` on the passed
    /// message.
    async fn insert_message(&self, message: &mut Message) -> Result<(), StoreError>;

    async fn get_message(&self, uuid: Uuid) -> Result<Message, StoreError>;

    async fn update_message_status(
        &self,
        uuid: Uuid,
        status: MessageStatus,
    ) -> Result<(), StoreError>;

    /// Outgoing messages with status `Pending`, excluding the given ids
    /// (the dispatch engine's in-flight set).
    async fn pending_outgoing(&self, exclude_ids: &[i64]) -> Result<Vec<Message>, StoreError>;

    /// Source ids of a conversation's messages, newest first, up to `limit`.
    async fn conversation_source_ids(
        &self,
        conversation_id: i64,
        limit: usize,
    ) -> Result<Vec<String>, StoreError>;

    /// Conversation owning any message whose source id is in `source_ids`.
    async fn find_conversation_by_source_ids(
        &self,
        source_ids: &[String],
    ) -> Result<Option<i64>, StoreError>;

    /// Latest matching message in a conversation, if any.
    async fn latest_message(
        &self,
        conversation_id: i64,
        types: &[MessageType],
        statuses: &[MessageStatus],
        exclude_private: bool,
    ) -> Result<Option<Message>, StoreError>;

    /// Most recent non-activity messages of a conversation, oldest first,
    /// up to `limit`. Used to build AI completion context.
    async fn conversation_messages(
        &self,
        conversation_uuid: Uuid,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    async fn conversation_uuid_for_message(&self, message_uuid: Uuid) -> Result<Uuid, StoreError>;
}

/// Conversation persistence and mutation, including automation actions.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create a conversation for a first inbound message. Returns (id, uuid).
    async fn create_conversation(
        &self,
        contact_id: i64,
        inbox_id: i64,
        last_message: &str,
        last_message_at: DateTime<Utc>,
        subject: Option<&str>,
    ) -> Result<(i64, Uuid), StoreError>;

    /// Fetch by id (uuid ignored) or, when `id == 0`, by uuid.
    async fn get_conversation(&self, id: i64, uuid: Option<Uuid>)
    -> Result<Conversation, StoreError>;

    async fn conversation_uuid(&self, id: i64) -> Result<Uuid, StoreError>;

    async fn update_first_reply_at(
        &self,
        uuid: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn update_last_reply_at(&self, uuid: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Set or clear the waiting-since timestamp.
    async fn update_waiting_since(
        &self,
        uuid: Uuid,
        at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Update the conversation's cached last-message summary.
    async fn update_last_message(
        &self,
        conversation_id: i64,
        last_message: &str,
        sender_type: SenderType,
        at: DateTime<Utc>,
        last_interaction_at: Option<DateTime<Utc>>,
        meta: serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Reopen the conversation if it is not already open.
    async fn reopen(&self, uuid: Uuid, actor: &User) -> Result<(), StoreError>;

    /// Add a user as a conversation participant if not already present.
    async fn add_participant(&self, user_id: i64, uuid: Uuid) -> Result<(), StoreError>;

    /// Apply one automation rule action.
    async fn apply_action(
        &self,
        action: &RuleAction,
        conversation: &Conversation,
        actor: &User,
    ) -> Result<(), StoreError>;

    /// Conversations created after the given instant (time-trigger scans).
    async fn conversations_created_after(
        &self,
        after: DateTime<Utc>,
    ) -> Result<Vec<Conversation>, StoreError>;

    /// Conversations assigned to a team but to no user.
    async fn unassigned_conversations(&self) -> Result<Vec<Conversation>, StoreError>;

    async fn update_user_assignee(
        &self,
        uuid: Uuid,
        user_id: i64,
        actor: &User,
    ) -> Result<(), StoreError>;

    /// Number of open conversations currently assigned to the user.
    async fn active_conversation_count(&self, user_id: i64) -> Result<usize, StoreError>;
}

/// User and contact lookup.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Find or create a contact by email; fills in `contact.id`.
    async fn upsert_contact(&self, contact: &mut Contact) -> Result<(), StoreError>;

    async fn get_user(&self, id: i64) -> Result<User, StoreError>;

    /// The internal system actor automated changes are attributed to.
    async fn system_user(&self) -> Result<User, StoreError>;
}

/// Team membership, for assignment pool rebuilds.
#[async_trait]
pub trait TeamStore: Send + Sync {
    async fn get_all(&self) -> Result<Vec<Team>, StoreError>;

    async fn get_team(&self, id: i64) -> Result<Team, StoreError>;

    async fn members(&self, team_id: i64) -> Result<Vec<TeamMember>, StoreError>;
}

/// SLA metric a tracked event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaMetric {
    FirstResponse,
    NextResponse,
    Resolution,
}

/// SLA event tracking.
#[async_trait]
pub trait SlaStore: Send + Sync {
    /// Create an unmet next-response event for the conversation. Returns the
    /// deadline, or [`SlaError::UnmetEventAlreadyExists`] when one is open.
    async fn create_next_response_event(
        &self,
        conversation_id: i64,
        applied_sla_id: i64,
        sla_policy_id: i64,
        assigned_team_id: Option<i64>,
    ) -> Result<DateTime<Utc>, SlaError>;

    /// Mark the latest unmet event for the metric as met. Returns the met-at
    /// instant, or [`SlaError::LatestEventNotFound`] when nothing is open.
    async fn set_latest_event_met(
        &self,
        applied_sla_id: i64,
        metric: SlaMetric,
    ) -> Result<DateTime<Utc>, SlaError>;
}

/// Automation rule record storage.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn enabled_rules(&self) -> Result<Vec<RuleRecord>, StoreError>;
}

/// Media (attachment) storage.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Media uuid for an already-stored content id, if any.
    async fn content_id_exists(&self, content_id: &str) -> Result<Option<Uuid>, StoreError>;

    async fn upload_and_insert(
        &self,
        filename: &str,
        content_type: &str,
        content_id: Option<&str>,
        content: &[u8],
        disposition: &str,
    ) -> Result<Media, StoreError>;

    /// Generate and store a thumbnail for an image media.
    async fn upload_thumbnail(&self, media: &Media, content: &[u8]) -> Result<(), StoreError>;

    /// Link an uploaded media to its message.
    async fn attach_to_message(&self, media_id: i64, message_id: i64) -> Result<(), StoreError>;

    async fn media_for_message(&self, message_id: i64) -> Result<Vec<Media>, StoreError>;

    async fn blob(&self, media_uuid: Uuid) -> Result<Vec<u8>, StoreError>;
}

/// A configured inbox row, without the live channel connection.
#[derive(Debug, Clone)]
pub struct InboxRecord {
    pub id: i64,
    pub channel: ChannelKind,
    pub enabled: bool,
    pub from_address: String,
    /// Help center linked to the inbox; required for AI completions.
    pub help_center_id: Option<i64>,
}

/// Registry of live inboxes.
#[async_trait]
pub trait InboxStore: Send + Sync {
    async fn get(&self, id: i64) -> Result<Arc<dyn Inbox>, InboxError>;

    async fn get_record(&self, id: i64) -> Result<InboxRecord, StoreError>;
}

/// Webhook-worthy events raised by the dispatch engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEvent {
    MessageCreated,
    MessageUpdated,
    ConversationCreated,
}

/// Fire-and-forget webhook delivery, owned by the excluded webhook subsystem.
pub trait WebhookSink: Send + Sync {
    fn trigger(&self, event: WebhookEvent, payload: serde_json::Value);
}

/// Real-time fan-out to conversation subscribers (WebSocket layer).
pub trait Broadcaster: Send + Sync {
    fn message_created(&self, message: &Message);

    fn message_property_update(
        &self,
        conversation_uuid: Uuid,
        message_uuid: Uuid,
        property: &str,
        value: &str,
    );

    fn conversation_property_update(
        &self,
        conversation_uuid: Uuid,
        property: &str,
        value: Option<String>,
    );
}

/// A queued request for an AI assistant reply.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub conversation_uuid: Uuid,
    pub inbox_id: i64,
    pub contact_id: i64,
    pub assistant: User,
    pub help_center_id: i64,
    /// Recent conversation history, oldest first.
    pub messages: Vec<Message>,
}

/// Hand-off queue to the AI completion pipeline.
#[async_trait]
pub trait CompletionQueue: Send + Sync {
    async fn enqueue(&self, request: CompletionRequest) -> Result<(), StoreError>;
}

/// Template rendering seam for outgoing email content. Chat messages are
/// never rendered.
pub trait MessageRenderer: Send + Sync {
    fn render(
        &self,
        message: &Message,
        conversation: &Conversation,
        sender: &User,
    ) -> Result<String, RenderError>;
}

/// Renderer that passes message content through unchanged.
pub struct PassthroughRenderer;

impl MessageRenderer for PassthroughRenderer {
    fn render(
        &self,
        message: &Message,
        _conversation: &Conversation,
        _sender: &User,
    ) -> Result<String, RenderError> {
        Ok(message.content.clone())
    }
}
