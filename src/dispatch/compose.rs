//! Message composition: agent replies, private notes and conversation
//! activity records.

use tracing::error;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::{
    ChannelKind, ContentType, Media, Message, MessageStatus, MessageType, SenderType, User,
};
use crate::textutil::{generate_email_message_id, random_alphanumeric};

use super::engine::DispatchEngine;

/// Conversation activities recorded as private activity messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationActivity {
    AssignedUserChange,
    AssignedTeamChange,
    SelfAssign,
    PriorityChange,
    StatusChange,
    TagAdded,
    TagRemoved,
    SlaSet,
}

impl DispatchEngine {
    /// Insert an agent reply as a pending outgoing message for the scanner
    /// to pick up. Email replies get a generated message id for threading
    /// and carry their recipients in the message meta.
    #[allow(clippy::too_many_arguments)]
    pub async fn send_reply(
        &self,
        media: Vec<Media>,
        inbox_id: i64,
        sender_id: i64,
        conversation_uuid: Uuid,
        content: String,
        to: Vec<String>,
        cc: Vec<String>,
        bcc: Vec<String>,
        mut meta: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Message, DispatchError> {
        let inbox_record = self.deps.inbox_store.get_record(inbox_id).await?;
        if !inbox_record.enabled {
            return Err(DispatchError::InboxDisabled { inbox_id });
        }

        let source_id = match inbox_record.channel {
            ChannelKind::Email => {
                let to = remove_empty(to);
                let cc = remove_empty(cc);
                let bcc = remove_empty(bcc);
                if to.is_empty() {
                    return Err(DispatchError::EmptyRecipients);
                }
                meta.insert("to".into(), serde_json::json!(to));
                if !cc.is_empty() {
                    meta.insert("cc".into(), serde_json::json!(cc));
                }
                if !bcc.is_empty() {
                    meta.insert("bcc".into(), serde_json::json!(bcc));
                }
                generate_email_message_id(conversation_uuid, &inbox_record.from_address)
            }
            ChannelKind::LiveChat => format!("livechat-{}", random_alphanumeric(35)),
        };

        let mut message = Message::new(MessageType::Outgoing, MessageStatus::Pending);
        message.conversation_uuid = conversation_uuid;
        message.sender_id = sender_id;
        message.sender_type = SenderType::Agent;
        message.inbox_id = inbox_id;
        message.content = content;
        message.content_type = ContentType::Html;
        message.source_id = Some(source_id);
        message.media = media;
        message.meta = serde_json::Value::Object(meta);

        self.insert_message(&mut message).await?;
        Ok(message)
    }

    /// Insert a private note. Notes are internal: created already sent and
    /// never dispatched through a channel.
    pub async fn send_private_note(
        &self,
        media: Vec<Media>,
        sender_id: i64,
        conversation_uuid: Uuid,
        content: String,
    ) -> Result<Message, DispatchError> {
        let mut message = Message::new(MessageType::Outgoing, MessageStatus::Sent);
        message.conversation_uuid = conversation_uuid;
        message.sender_id = sender_id;
        message.sender_type = SenderType::Agent;
        message.content = content;
        message.content_type = ContentType::Html;
        message.private = true;
        message.media = media;

        self.insert_message(&mut message).await?;
        Ok(message)
    }

    /// Record a user-assignee change (or self-assignment) as an activity.
    pub async fn record_assignee_user_change(
        &self,
        conversation_uuid: Uuid,
        assignee_id: i64,
        actor: &User,
    ) -> Result<(), DispatchError> {
        if assignee_id == actor.id {
            return self
                .insert_activity(
                    ConversationActivity::SelfAssign,
                    conversation_uuid,
                    &actor.full_name(),
                    actor,
                )
                .await;
        }
        let assignee = self.deps.user_store.get_user(assignee_id).await?;
        self.insert_activity(
            ConversationActivity::AssignedUserChange,
            conversation_uuid,
            &assignee.full_name(),
            actor,
        )
        .await
    }

    /// Record a team-assignee change as an activity.
    pub async fn record_assignee_team_change(
        &self,
        conversation_uuid: Uuid,
        team_id: i64,
        actor: &User,
    ) -> Result<(), DispatchError> {
        let team = self.deps.team_store.get_team(team_id).await?;
        self.insert_activity(
            ConversationActivity::AssignedTeamChange,
            conversation_uuid,
            &team.name,
            actor,
        )
        .await
    }

    pub async fn record_priority_change(
        &self,
        priority: &str,
        conversation_uuid: Uuid,
        actor: &User,
    ) -> Result<(), DispatchError> {
        self.insert_activity(
            ConversationActivity::PriorityChange,
            conversation_uuid,
            priority,
            actor,
        )
        .await
    }

    pub async fn record_status_change(
        &self,
        status: &str,
        conversation_uuid: Uuid,
        actor: &User,
    ) -> Result<(), DispatchError> {
        self.insert_activity(
            ConversationActivity::StatusChange,
            conversation_uuid,
            status,
            actor,
        )
        .await
    }

    pub async fn record_sla_set(
        &self,
        conversation_uuid: Uuid,
        sla_name: &str,
        actor: &User,
    ) -> Result<(), DispatchError> {
        self.insert_activity(ConversationActivity::SlaSet, conversation_uuid, sla_name, actor)
            .await
    }

    pub async fn record_tag_addition(
        &self,
        conversation_uuid: Uuid,
        tag: &str,
        actor: &User,
    ) -> Result<(), DispatchError> {
        self.insert_activity(ConversationActivity::TagAdded, conversation_uuid, tag, actor)
            .await
    }

    pub async fn record_tag_removal(
        &self,
        conversation_uuid: Uuid,
        tag: &str,
        actor: &User,
    ) -> Result<(), DispatchError> {
        self.insert_activity(ConversationActivity::TagRemoved, conversation_uuid, tag, actor)
            .await
    }

    /// Insert an activity message into the conversation.
    pub async fn insert_activity(
        &self,
        activity: ConversationActivity,
        conversation_uuid: Uuid,
        new_value: &str,
        actor: &User,
    ) -> Result<(), DispatchError> {
        let content = activity_content(activity, new_value, &actor.full_name());

        let mut message = Message::new(MessageType::Activity, MessageStatus::Sent);
        message.conversation_uuid = conversation_uuid;
        message.sender_id = actor.id;
        message.sender_type = SenderType::Agent;
        message.content = content;
        message.content_type = ContentType::Text;
        message.private = true;

        if let Err(e) = self.insert_message(&mut message).await {
            error!(conversation_uuid = %conversation_uuid, error = %e, "error inserting activity message");
            return Err(e);
        }
        Ok(())
    }
}

fn activity_content(activity: ConversationActivity, new_value: &str, actor_name: &str) -> String {
    match activity {
        ConversationActivity::AssignedUserChange => {
            format!("Assigned to {new_value} by {actor_name}")
        }
        ConversationActivity::AssignedTeamChange => {
            format!("Assigned to {new_value} team by {actor_name}")
        }
        ConversationActivity::SelfAssign => {
            format!("{actor_name} self-assigned this conversation")
        }
        ConversationActivity::PriorityChange => {
            format!("{actor_name} set priority to {new_value}")
        }
        ConversationActivity::StatusChange => {
            format!("{actor_name} marked the conversation as {new_value}")
        }
        ConversationActivity::TagAdded => format!("{actor_name} added tag {new_value}"),
        ConversationActivity::TagRemoved => format!("{actor_name} removed tag {new_value}"),
        ConversationActivity::SlaSet => format!("{actor_name} set {new_value} SLA policy"),
    }
}

fn remove_empty(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}
