//! In-memory store implementation.
//!
//! Backs the demo binary and the integration tests. One `RwLock`-guarded
//! state struct implements every storage trait; the inert sink types at the
//! bottom stand in for the excluded webhook/WebSocket/AI subsystems.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::automation::rule::{ActionType, RuleAction, RuleRecord};
use crate::error::{InboxError, SlaError, StoreError};
use crate::inbox::Inbox;
use crate::models::{
    Contact, Conversation, Media, Message, MessageStatus, MessageType, SenderType, Team,
    TeamMember, User, UserKind,
};

use super::{
    Broadcaster, CompletionQueue, CompletionRequest, ConversationStore, InboxRecord, InboxStore,
    MediaStore, MessageStore, RuleStore, SlaMetric, SlaStore, TeamStore, UserStore, WebhookEvent,
    WebhookSink,
};

/// Conversation status ids used by the in-memory store.
pub const STATUS_OPEN: i64 = 1;
pub const STATUS_RESOLVED: i64 = 2;

/// Deadline window for next-response SLA events.
const NEXT_RESPONSE_WINDOW_HOURS: i64 = 1;

#[derive(Debug)]
struct SlaEvent {
    applied_sla_id: i64,
    metric: SlaMetric,
    met_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct State {
    next_id: i64,
    messages: Vec<Message>,
    conversations: Vec<Conversation>,
    contacts: HashMap<i64, Contact>,
    users: HashMap<i64, User>,
    teams: Vec<Team>,
    team_members: HashMap<i64, Vec<TeamMember>>,
    rules: Vec<RuleRecord>,
    media: Vec<Media>,
    blobs: HashMap<Uuid, Vec<u8>>,
    thumbnails: HashMap<Uuid, Vec<u8>>,
    /// media id → message id
    media_links: HashMap<i64, i64>,
    participants: HashMap<Uuid, HashSet<i64>>,
    sla_events: Vec<SlaEvent>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// All storage traits over one in-memory state.
pub struct MemoryStore {
    state: RwLock<State>,
    system_user_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut state = State::default();
        let system_id = state.next_id();
        state.users.insert(
            system_id,
            User {
                id: system_id,
                kind: UserKind::System,
                email: None,
                first_name: "System".into(),
                last_name: String::new(),
                enabled: true,
                availability_status: crate::models::AvailabilityStatus::Online,
            },
        );
        Self {
            state: RwLock::new(state),
            system_user_id: system_id,
        }
    }

    // ── Seeding helpers ─────────────────────────────────────────────

    pub async fn add_user(&self, mut user: User) -> User {
        let mut state = self.state.write().await;
        if user.id == 0 {
            user.id = state.next_id();
        }
        state.users.insert(user.id, user.clone());
        user
    }

    pub async fn add_team(&self, mut team: Team) -> Team {
        let mut state = self.state.write().await;
        if team.id == 0 {
            team.id = state.next_id();
        }
        state.teams.push(team.clone());
        team
    }

    pub async fn add_team_member(&self, team_id: i64, member: TeamMember) {
        let mut state = self.state.write().await;
        state.team_members.entry(team_id).or_default().push(member);
    }

    pub async fn add_rule(&self, mut record: RuleRecord) -> RuleRecord {
        let mut state = self.state.write().await;
        if record.id == 0 {
            record.id = state.next_id();
        }
        state.rules.push(record.clone());
        record
    }

    /// Route a conversation to a team without assigning a user.
    pub async fn route_conversation_to_team(
        &self,
        uuid: Uuid,
        team_id: i64,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let conversation = find_conversation_mut(&mut state.conversations, 0, Some(uuid))?;
        conversation.assigned_team_id = Some(team_id);
        Ok(())
    }

    /// Apply an SLA policy to a conversation.
    pub async fn apply_sla_policy(
        &self,
        uuid: Uuid,
        sla_policy_id: i64,
        applied_sla_id: i64,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let conversation = find_conversation_mut(&mut state.conversations, 0, Some(uuid))?;
        conversation.sla_policy_id = Some(sla_policy_id);
        conversation.applied_sla_id = Some(applied_sla_id);
        Ok(())
    }

    pub async fn resolve_conversation(&self, uuid: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let conversation = find_conversation_mut(&mut state.conversations, 0, Some(uuid))?;
        conversation.status_id = Some(STATUS_RESOLVED);
        conversation.resolved_at = Some(Utc::now());
        Ok(())
    }

    pub async fn message_count(&self) -> usize {
        self.state.read().await.messages.len()
    }

    pub async fn conversation_count(&self) -> usize {
        self.state.read().await.conversations.len()
    }

    pub async fn has_thumbnail(&self, media_uuid: Uuid) -> bool {
        self.state.read().await.thumbnails.contains_key(&media_uuid)
    }

    pub async fn open_sla_event_count(&self, applied_sla_id: i64) -> usize {
        self.state
            .read()
            .await
            .sla_events
            .iter()
            .filter(|e| e.applied_sla_id == applied_sla_id && e.met_at.is_none())
            .count()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn find_conversation_mut<'a>(
    conversations: &'a mut [Conversation],
    id: i64,
    uuid: Option<Uuid>,
) -> Result<&'a mut Conversation, StoreError> {
    conversations
        .iter_mut()
        .find(|c| (id != 0 && c.id == id) || (id == 0 && uuid.is_some_and(|u| c.uuid == u)))
        .ok_or_else(|| StoreError::not_found("conversation", id))
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert_message(&self, message: &mut Message) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        message.id = state.next_id();
        if message.uuid.is_nil() {
            message.uuid = Uuid::new_v4();
        }
        message.created_at = Utc::now();

        if message.conversation_id == 0 && !message.conversation_uuid.is_nil() {
            message.conversation_id = state
                .conversations
                .iter()
                .find(|c| c.uuid == message.conversation_uuid)
                .map(|c| c.id)
                .ok_or_else(|| StoreError::not_found("conversation", message.conversation_uuid))?;
        } else if message.conversation_uuid.is_nil() && message.conversation_id != 0 {
            message.conversation_uuid = state
                .conversations
                .iter()
                .find(|c| c.id == message.conversation_id)
                .map(|c| c.uuid)
                .ok_or_else(|| StoreError::not_found("conversation", message.conversation_id))?;
        }

        state.messages.push(message.clone());
        Ok(())
    }

    async fn get_message(&self, uuid: Uuid) -> Result<Message, StoreError> {
        let state = self.state.read().await;
        let mut message = state
            .messages
            .iter()
            .find(|m| m.uuid == uuid)
            .cloned()
            .ok_or_else(|| StoreError::not_found("message", uuid))?;
        // Media links land after insert; rebuild from the link table.
        let message_id = message.id;
        message.media = state
            .media
            .iter()
            .filter(|m| state.media_links.get(&m.id) == Some(&message_id))
            .cloned()
            .collect();
        Ok(message)
    }

    async fn update_message_status(
        &self,
        uuid: Uuid,
        status: MessageStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let message = state
            .messages
            .iter_mut()
            .find(|m| m.uuid == uuid)
            .ok_or_else(|| StoreError::not_found("message", uuid))?;
        message.status = status;
        Ok(())
    }

    async fn pending_outgoing(&self, exclude_ids: &[i64]) -> Result<Vec<Message>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .iter()
            .filter(|m| {
                m.message_type == MessageType::Outgoing
                    && m.status == MessageStatus::Pending
                    && !m.private
                    && !exclude_ids.contains(&m.id)
            })
            .cloned()
            .collect())
    }

    async fn conversation_source_ids(
        &self,
        conversation_id: i64,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let state = self.state.read().await;
        let mut ids: Vec<(i64, String)> = state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .filter_map(|m| m.source_id.clone().map(|s| (m.id, s)))
            .collect();
        // Newest first.
        ids.sort_by_key(|(id, _)| std::cmp::Reverse(*id));
        Ok(ids.into_iter().take(limit).map(|(_, s)| s).collect())
    }

    async fn find_conversation_by_source_ids(
        &self,
        source_ids: &[String],
    ) -> Result<Option<i64>, StoreError> {
        if source_ids.is_empty() {
            return Ok(None);
        }
        let state = self.state.read().await;
        Ok(state
            .messages
            .iter()
            .find(|m| {
                m.source_id
                    .as_ref()
                    .is_some_and(|s| source_ids.contains(s))
            })
            .map(|m| m.conversation_id))
    }

    async fn latest_message(
        &self,
        conversation_id: i64,
        types: &[MessageType],
        statuses: &[MessageStatus],
        exclude_private: bool,
    ) -> Result<Option<Message>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .iter()
            .filter(|m| {
                m.conversation_id == conversation_id
                    && types.contains(&m.message_type)
                    && statuses.contains(&m.status)
                    && !(exclude_private && m.private)
            })
            .max_by_key(|m| m.id)
            .cloned())
    }

    async fn conversation_messages(
        &self,
        conversation_uuid: Uuid,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let state = self.state.read().await;
        let mut messages: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| {
                m.conversation_uuid == conversation_uuid
                    && m.message_type != MessageType::Activity
            })
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.id);
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.split_off(skip))
    }

    async fn conversation_uuid_for_message(&self, message_uuid: Uuid) -> Result<Uuid, StoreError> {
        let state = self.state.read().await;
        state
            .messages
            .iter()
            .find(|m| m.uuid == message_uuid)
            .map(|m| m.conversation_uuid)
            .ok_or_else(|| StoreError::not_found("message", message_uuid))
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create_conversation(
        &self,
        contact_id: i64,
        inbox_id: i64,
        last_message: &str,
        last_message_at: DateTime<Utc>,
        subject: Option<&str>,
    ) -> Result<(i64, Uuid), StoreError> {
        let mut state = self.state.write().await;
        let id = state.next_id();
        let uuid = Uuid::new_v4();
        let contact = state.contacts.get(&contact_id).cloned().unwrap_or_default();
        state.conversations.push(Conversation {
            id,
            uuid,
            reference_number: id.to_string(),
            contact_id,
            inbox_id,
            assigned_user_id: None,
            assigned_team_id: None,
            status_id: Some(STATUS_OPEN),
            priority_id: None,
            subject: subject.map(String::from),
            last_message: Some(last_message.to_string()),
            last_message_at: Some(last_message_at),
            created_at: Utc::now(),
            first_reply_at: None,
            last_reply_at: None,
            resolved_at: None,
            waiting_since: None,
            sla_policy_id: None,
            applied_sla_id: None,
            contact,
            meta: serde_json::json!({}),
        });
        Ok((id, uuid))
    }

    async fn get_conversation(
        &self,
        id: i64,
        uuid: Option<Uuid>,
    ) -> Result<Conversation, StoreError> {
        let state = self.state.read().await;
        let mut conversation = state
            .conversations
            .iter()
            .find(|c| (id != 0 && c.id == id) || (id == 0 && uuid.is_some_and(|u| c.uuid == u)))
            .cloned()
            .ok_or_else(|| StoreError::not_found("conversation", id))?;
        // Re-embed the current contact row.
        if let Some(contact) = state.contacts.get(&conversation.contact_id) {
            conversation.contact = contact.clone();
        }
        Ok(conversation)
    }

    async fn conversation_uuid(&self, id: i64) -> Result<Uuid, StoreError> {
        let state = self.state.read().await;
        state
            .conversations
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.uuid)
            .ok_or_else(|| StoreError::not_found("conversation", id))
    }

    async fn update_first_reply_at(
        &self,
        uuid: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let conversation = find_conversation_mut(&mut state.conversations, 0, Some(uuid))?;
        if conversation.first_reply_at.is_none() {
            conversation.first_reply_at = Some(at);
        }
        Ok(())
    }

    async fn update_last_reply_at(&self, uuid: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let conversation = find_conversation_mut(&mut state.conversations, 0, Some(uuid))?;
        conversation.last_reply_at = Some(at);
        Ok(())
    }

    async fn update_waiting_since(
        &self,
        uuid: Uuid,
        at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let conversation = find_conversation_mut(&mut state.conversations, 0, Some(uuid))?;
        conversation.waiting_since = at;
        Ok(())
    }

    async fn update_last_message(
        &self,
        conversation_id: i64,
        last_message: &str,
        _sender_type: SenderType,
        at: DateTime<Utc>,
        _last_interaction_at: Option<DateTime<Utc>>,
        meta: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let conversation = find_conversation_mut(&mut state.conversations, conversation_id, None)?;
        conversation.last_message = Some(last_message.to_string());
        conversation.last_message_at = Some(at);
        if let (Some(existing), Some(new)) = (conversation.meta.as_object_mut(), meta.as_object())
        {
            for (key, value) in new {
                existing.insert(key.clone(), value.clone());
            }
        } else {
            conversation.meta = meta;
        }
        Ok(())
    }

    async fn reopen(&self, uuid: Uuid, _actor: &User) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let conversation = find_conversation_mut(&mut state.conversations, 0, Some(uuid))?;
        if conversation.status_id != Some(STATUS_OPEN) {
            conversation.status_id = Some(STATUS_OPEN);
            conversation.resolved_at = None;
        }
        Ok(())
    }

    async fn add_participant(&self, user_id: i64, uuid: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.participants.entry(uuid).or_default().insert(user_id);
        Ok(())
    }

    async fn apply_action(
        &self,
        action: &RuleAction,
        conversation: &Conversation,
        _actor: &User,
    ) -> Result<(), StoreError> {
        let first_id = action
            .value
            .first()
            .and_then(|v| v.parse::<i64>().ok());
        let mut state = self.state.write().await;
        let stored =
            find_conversation_mut(&mut state.conversations, conversation.id, None)?;
        match action.action_type {
            ActionType::AssignTeam => stored.assigned_team_id = first_id,
            ActionType::AssignUser => stored.assigned_user_id = first_id,
            ActionType::SetStatus => stored.status_id = first_id,
            ActionType::SetPriority => stored.priority_id = first_id,
            // Tag/SLA/reply actions belong to subsystems the in-memory
            // store does not model.
            _ => {}
        }
        Ok(())
    }

    async fn conversations_created_after(
        &self,
        after: DateTime<Utc>,
    ) -> Result<Vec<Conversation>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .conversations
            .iter()
            .filter(|c| c.created_at > after)
            .cloned()
            .collect())
    }

    async fn unassigned_conversations(&self) -> Result<Vec<Conversation>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .conversations
            .iter()
            .filter(|c| c.assigned_team_id.is_some() && c.assigned_user_id.is_none())
            .cloned()
            .collect())
    }

    async fn update_user_assignee(
        &self,
        uuid: Uuid,
        user_id: i64,
        _actor: &User,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let conversation = find_conversation_mut(&mut state.conversations, 0, Some(uuid))?;
        conversation.assigned_user_id = Some(user_id);
        Ok(())
    }

    async fn active_conversation_count(&self, user_id: i64) -> Result<usize, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .conversations
            .iter()
            .filter(|c| c.assigned_user_id == Some(user_id) && c.status_id == Some(STATUS_OPEN))
            .count())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn upsert_contact(&self, contact: &mut Contact) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let existing = contact.email.as_ref().and_then(|email| {
            state
                .contacts
                .values()
                .find(|c| c.email.as_ref() == Some(email))
                .map(|c| c.id)
        });
        match existing {
            Some(id) => {
                contact.id = id;
                state.contacts.insert(id, contact.clone());
            }
            None => {
                let id = state.next_id();
                contact.id = id;
                state.contacts.insert(id, contact.clone());
                state.users.insert(
                    id,
                    User {
                        id,
                        kind: UserKind::Contact,
                        email: contact.email.clone(),
                        first_name: contact.first_name.clone(),
                        last_name: contact.last_name.clone(),
                        enabled: true,
                        availability_status: crate::models::AvailabilityStatus::Online,
                    },
                );
            }
        }
        Ok(())
    }

    async fn get_user(&self, id: i64) -> Result<User, StoreError> {
        let state = self.state.read().await;
        state
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("user", id))
    }

    async fn system_user(&self) -> Result<User, StoreError> {
        self.get_user(self.system_user_id).await
    }
}

#[async_trait]
impl TeamStore for MemoryStore {
    async fn get_all(&self) -> Result<Vec<Team>, StoreError> {
        Ok(self.state.read().await.teams.clone())
    }

    async fn get_team(&self, id: i64) -> Result<Team, StoreError> {
        let state = self.state.read().await;
        state
            .teams
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("team", id))
    }

    async fn members(&self, team_id: i64) -> Result<Vec<TeamMember>, StoreError> {
        let state = self.state.read().await;
        Ok(state.team_members.get(&team_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl SlaStore for MemoryStore {
    async fn create_next_response_event(
        &self,
        _conversation_id: i64,
        applied_sla_id: i64,
        _sla_policy_id: i64,
        _assigned_team_id: Option<i64>,
    ) -> Result<DateTime<Utc>, SlaError> {
        let mut state = self.state.write().await;
        let open_exists = state.sla_events.iter().any(|e| {
            e.applied_sla_id == applied_sla_id
                && e.metric == SlaMetric::NextResponse
                && e.met_at.is_none()
        });
        if open_exists {
            return Err(SlaError::UnmetEventAlreadyExists);
        }
        let deadline = Utc::now() + Duration::hours(NEXT_RESPONSE_WINDOW_HOURS);
        state.sla_events.push(SlaEvent {
            applied_sla_id,
            metric: SlaMetric::NextResponse,
            met_at: None,
        });
        Ok(deadline)
    }

    async fn set_latest_event_met(
        &self,
        applied_sla_id: i64,
        metric: SlaMetric,
    ) -> Result<DateTime<Utc>, SlaError> {
        let mut state = self.state.write().await;
        let event = state
            .sla_events
            .iter_mut()
            .rev()
            .find(|e| {
                e.applied_sla_id == applied_sla_id && e.metric == metric && e.met_at.is_none()
            })
            .ok_or(SlaError::LatestEventNotFound)?;
        let met_at = Utc::now();
        event.met_at = Some(met_at);
        Ok(met_at)
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn enabled_rules(&self) -> Result<Vec<RuleRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state.rules.iter().filter(|r| r.enabled).cloned().collect())
    }
}

#[async_trait]
impl MediaStore for MemoryStore {
    async fn content_id_exists(&self, content_id: &str) -> Result<Option<Uuid>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .media
            .iter()
            .find(|m| m.content_id.as_deref() == Some(content_id))
            .map(|m| m.uuid))
    }

    async fn upload_and_insert(
        &self,
        filename: &str,
        content_type: &str,
        content_id: Option<&str>,
        content: &[u8],
        disposition: &str,
    ) -> Result<Media, StoreError> {
        let mut state = self.state.write().await;
        let media = Media {
            id: state.next_id(),
            uuid: Uuid::new_v4(),
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            size: content.len(),
            disposition: disposition.to_string(),
            content_id: content_id.map(String::from),
        };
        state.blobs.insert(media.uuid, content.to_vec());
        state.media.push(media.clone());
        Ok(media)
    }

    async fn upload_thumbnail(&self, media: &Media, content: &[u8]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.thumbnails.insert(media.uuid, content.to_vec());
        Ok(())
    }

    async fn attach_to_message(&self, media_id: i64, message_id: i64) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.media_links.insert(media_id, message_id);
        Ok(())
    }

    async fn media_for_message(&self, message_id: i64) -> Result<Vec<Media>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .media
            .iter()
            .filter(|m| state.media_links.get(&m.id) == Some(&message_id))
            .cloned()
            .collect())
    }

    async fn blob(&self, media_uuid: Uuid) -> Result<Vec<u8>, StoreError> {
        let state = self.state.read().await;
        state
            .blobs
            .get(&media_uuid)
            .cloned()
            .ok_or_else(|| StoreError::not_found("media", media_uuid))
    }
}

/// Registry of live inbox connections.
pub struct InboxRegistry {
    inner: std::sync::RwLock<HashMap<i64, (Arc<dyn Inbox>, InboxRecord)>>,
}

impl InboxRegistry {
    pub fn new() -> Self {
        Self {
            inner: std::sync::RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, inbox: Arc<dyn Inbox>, record: InboxRecord) {
        self.inner
            .write()
            .unwrap()
            .insert(record.id, (inbox, record));
    }
}

impl Default for InboxRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InboxStore for InboxRegistry {
    async fn get(&self, id: i64) -> Result<Arc<dyn Inbox>, InboxError> {
        self.inner
            .read()
            .unwrap()
            .get(&id)
            .map(|(inbox, _)| Arc::clone(inbox))
            .ok_or(InboxError::NotFound { id })
    }

    async fn get_record(&self, id: i64) -> Result<InboxRecord, StoreError> {
        self.inner
            .read()
            .unwrap()
            .get(&id)
            .map(|(_, record)| record.clone())
            .ok_or_else(|| StoreError::not_found("inbox", id))
    }
}

// ── Inert collaborators ─────────────────────────────────────────────

/// Webhook sink that drops every event.
pub struct NoopWebhookSink;

impl WebhookSink for NoopWebhookSink {
    fn trigger(&self, _event: WebhookEvent, _payload: serde_json::Value) {}
}

/// Broadcaster that drops every update.
pub struct NoopBroadcaster;

impl Broadcaster for NoopBroadcaster {
    fn message_created(&self, _message: &Message) {}

    fn message_property_update(
        &self,
        _conversation_uuid: Uuid,
        _message_uuid: Uuid,
        _property: &str,
        _value: &str,
    ) {
    }

    fn conversation_property_update(
        &self,
        _conversation_uuid: Uuid,
        _property: &str,
        _value: Option<String>,
    ) {
    }
}

/// Completion queue that accepts and drops every request.
pub struct NoopCompletionQueue;

#[async_trait]
impl CompletionQueue for NoopCompletionQueue {
    async fn enqueue(&self, _request: CompletionRequest) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_resolves_conversation_id_from_uuid() {
        let store = MemoryStore::new();
        let (id, uuid) = store
            .create_conversation(1, 1, "hello", Utc::now(), None)
            .await
            .unwrap();

        let mut message = Message::new(MessageType::Outgoing, MessageStatus::Pending);
        message.conversation_uuid = uuid;
        store.insert_message(&mut message).await.unwrap();
        assert_eq!(message.conversation_id, id);
        assert!(!message.uuid.is_nil());
    }

    #[tokio::test]
    async fn source_id_lookup_finds_owning_conversation() {
        let store = MemoryStore::new();
        let (id, uuid) = store
            .create_conversation(1, 1, "hello", Utc::now(), None)
            .await
            .unwrap();

        let mut message = Message::new(MessageType::Incoming, MessageStatus::Received);
        message.conversation_uuid = uuid;
        message.source_id = Some("<msg-1@example.com>".into());
        store.insert_message(&mut message).await.unwrap();

        let found = store
            .find_conversation_by_source_ids(&["<none>".into(), "<msg-1@example.com>".into()])
            .await
            .unwrap();
        assert_eq!(found, Some(id));

        let none = store
            .find_conversation_by_source_ids(&["<unknown>".into()])
            .await
            .unwrap();
        assert_eq!(none, None);
    }

    #[tokio::test]
    async fn source_ids_return_newest_first() {
        let store = MemoryStore::new();
        let (id, uuid) = store
            .create_conversation(1, 1, "hello", Utc::now(), None)
            .await
            .unwrap();
        for n in 1..=3 {
            let mut message = Message::new(MessageType::Incoming, MessageStatus::Received);
            message.conversation_uuid = uuid;
            message.source_id = Some(format!("<m{n}>"));
            store.insert_message(&mut message).await.unwrap();
        }

        let ids = store.conversation_source_ids(id, 2).await.unwrap();
        assert_eq!(ids, vec!["<m3>".to_string(), "<m2>".to_string()]);
    }

    #[tokio::test]
    async fn sla_event_lifecycle() {
        let store = MemoryStore::new();
        let deadline = store
            .create_next_response_event(1, 10, 5, None)
            .await
            .unwrap();
        assert!(deadline > Utc::now());

        // A second open event for the same applied SLA is refused.
        let duplicate = store.create_next_response_event(1, 10, 5, None).await;
        assert!(matches!(duplicate, Err(SlaError::UnmetEventAlreadyExists)));

        store
            .set_latest_event_met(10, SlaMetric::NextResponse)
            .await
            .unwrap();
        assert!(matches!(
            store.set_latest_event_met(10, SlaMetric::NextResponse).await,
            Err(SlaError::LatestEventNotFound)
        ));

        // Once met, a fresh event can open.
        store
            .create_next_response_event(1, 10, 5, None)
            .await
            .unwrap();
        assert_eq!(store.open_sla_event_count(10).await, 1);
    }

    #[tokio::test]
    async fn upsert_contact_reuses_existing_email() {
        let store = MemoryStore::new();
        let mut first = Contact {
            email: Some("ada@example.com".into()),
            first_name: "Ada".into(),
            ..Default::default()
        };
        store.upsert_contact(&mut first).await.unwrap();
        let first_id = first.id;

        let mut second = Contact {
            email: Some("ada@example.com".into()),
            first_name: "Ada".into(),
            ..Default::default()
        };
        store.upsert_contact(&mut second).await.unwrap();
        assert_eq!(second.id, first_id);
    }

    #[tokio::test]
    async fn unassigned_requires_team_but_no_user() {
        let store = MemoryStore::new();
        let (_, uuid) = store
            .create_conversation(1, 1, "hello", Utc::now(), None)
            .await
            .unwrap();
        assert!(store.unassigned_conversations().await.unwrap().is_empty());

        store.route_conversation_to_team(uuid, 7).await.unwrap();
        assert_eq!(store.unassigned_conversations().await.unwrap().len(), 1);

        let system = store.system_user().await.unwrap();
        store.update_user_assignee(uuid, 3, &system).await.unwrap();
        assert!(store.unassigned_conversations().await.unwrap().is_empty());
    }
}
