//! Incoming message processing: contact upsert, thread resolution,
//! attachment upload, insertion and the post-message hooks.

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::automation::ConversationEvent;
use crate::error::{DispatchError, SlaError};
use crate::models::{
    ChannelKind, Conversation, IncomingMessage, Message, MessageStatus, MessageType, SenderType,
};
use crate::store::{CompletionRequest, WebhookEvent};
use crate::textutil::{html_to_text, sanitize_filename};

use super::engine::DispatchEngine;

/// Attachment filename extensions that get a stored thumbnail.
const IMAGE_EXTS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "webp", "bmp"];

impl DispatchEngine {
    /// Channel-agnostic post-processing of an inbound message: resolve the
    /// contact and conversation, upload attachments, insert the message and
    /// run the post-message hooks.
    ///
    /// Returns `None` when the message was already processed (an email
    /// re-delivery matched by its own source id).
    pub async fn process_incoming(
        &self,
        mut incoming: IncomingMessage,
    ) -> Result<Option<Message>, DispatchError> {
        let mut is_new_conversation = false;

        match incoming.channel {
            ChannelKind::Email => {
                self.deps
                    .user_store
                    .upsert_contact(&mut incoming.contact)
                    .await?;
                incoming.message.sender_id = incoming.contact.id;

                // Idempotent re-delivery guard: if the message's own source
                // id already belongs to a conversation, this is a duplicate.
                if let Some(source_id) = incoming.message.source_id.clone() {
                    if self
                        .deps
                        .message_store
                        .find_conversation_by_source_ids(std::slice::from_ref(&source_id))
                        .await?
                        .is_some()
                    {
                        debug!(source_id = %source_id, "message already processed, skipping");
                        return Ok(None);
                    }
                }

                is_new_conversation = self.find_or_create_conversation(&mut incoming).await?;
            }
            ChannelKind::LiveChat => {
                // Live chat creates the conversation before the message is
                // enqueued; nothing to resolve here.
            }
        }

        // Attachment failures never block the message itself.
        self.upload_attachments(&mut incoming.message).await;

        self.insert_message(&mut incoming.message).await?;

        if let Err(e) = self
            .process_incoming_hooks(incoming.message.conversation_uuid, is_new_conversation)
            .await
        {
            error!(
                conversation_uuid = %incoming.message.conversation_uuid,
                error = %e,
                "error processing incoming message hooks"
            );
            return Err(e);
        }
        Ok(Some(incoming.message))
    }

    /// Whether a message with the given channel-native id has been stored.
    pub async fn message_exists(&self, source_id: &str) -> Result<bool, DispatchError> {
        Ok(self
            .deps
            .message_store
            .find_conversation_by_source_ids(std::slice::from_ref(&source_id.to_string()))
            .await?
            .is_some())
    }

    /// Thread the message into an existing conversation via its
    /// `In-Reply-To`/`References` source ids, or create a new conversation.
    /// Returns whether a conversation was created.
    async fn find_or_create_conversation(
        &self,
        incoming: &mut IncomingMessage,
    ) -> Result<bool, DispatchError> {
        let message = &mut incoming.message;

        let mut candidates: Vec<String> = Vec::new();
        if let Some(in_reply_to) = &message.in_reply_to {
            candidates.push(in_reply_to.clone());
        }
        candidates.extend(message.references.iter().cloned());
        candidates.retain(|id| !id.is_empty());

        if let Some(conversation_id) = self
            .deps
            .message_store
            .find_conversation_by_source_ids(&candidates)
            .await?
        {
            message.conversation_id = conversation_id;
            message.conversation_uuid = self
                .deps
                .conversation_store
                .conversation_uuid(conversation_id)
                .await?;
            return Ok(false);
        }

        let last_message = html_to_text(&message.content);
        let (conversation_id, conversation_uuid) = self
            .deps
            .conversation_store
            .create_conversation(
                incoming.contact.id,
                incoming.inbox_id,
                &last_message,
                Utc::now(),
                incoming.subject.as_deref(),
            )
            .await?;
        message.conversation_id = conversation_id;
        message.conversation_uuid = conversation_uuid;
        Ok(true)
    }

    /// Upload the message's attachments, reusing inline images already
    /// stored for this conversation.
    ///
    /// Content ids are scoped as `<conversation uuid>_<content id>`: the raw
    /// cid is only unique within one mail, so the conversation uuid keeps
    /// distinct conversations from colliding while letting repeated inline
    /// images within one thread share a single upload.
    pub(super) async fn upload_attachments(&self, message: &mut Message) {
        if message.attachments.is_empty() {
            return;
        }
        let attachments = std::mem::take(&mut message.attachments);

        for attachment in &attachments {
            let mut scoped_content_id = None;
            if !attachment.content_id.is_empty() {
                let scoped = format!("{}_{}", message.conversation_uuid, attachment.content_id);
                match self.deps.media_store.content_id_exists(&scoped).await {
                    Ok(Some(existing_uuid)) => {
                        debug!(
                            content_id = %scoped,
                            media_uuid = %existing_uuid,
                            "inline attachment already stored, reusing"
                        );
                        message.content = message.content.replace(
                            &format!("cid:{}", attachment.content_id),
                            &format!("/uploads/{existing_uuid}"),
                        );
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(content_id = %scoped, error = %e, "error checking media by content id");
                    }
                }
                message.content = message.content.replace(
                    &format!("cid:{}", attachment.content_id),
                    &format!("cid:{scoped}"),
                );
                scoped_content_id = Some(scoped);
            }

            let filename = sanitize_filename(&attachment.name);
            debug!(
                name = %filename,
                content_type = %attachment.content_type,
                size = attachment.size,
                "uploading message attachment"
            );
            match self
                .deps
                .media_store
                .upload_and_insert(
                    &filename,
                    &attachment.content_type,
                    scoped_content_id.as_deref(),
                    &attachment.content,
                    &attachment.disposition,
                )
                .await
            {
                Ok(media) => {
                    if has_image_extension(&filename) {
                        if let Err(e) = self
                            .deps
                            .media_store
                            .upload_thumbnail(&media, &attachment.content)
                            .await
                        {
                            error!(media_uuid = %media.uuid, error = %e, "error uploading thumbnail");
                        }
                    }
                    message.media.push(media);
                }
                Err(e) => {
                    error!(name = %filename, error = %e, "failed to upload attachment");
                }
            }
        }
        message.attachments = attachments;
    }

    /// Insert a message, update the conversation's cached last-message
    /// summary and raise the created broadcasts/webhooks.
    pub async fn insert_message(&self, message: &mut Message) -> Result<(), DispatchError> {
        // Private notes and activities are never dispatched, they are born
        // sent.
        if message.private {
            message.status = MessageStatus::Sent;
        }
        message.text_content = html_to_text(&message.content);
        if !message.meta.is_object() {
            message.meta = serde_json::json!({});
        }

        self.deps.message_store.insert_message(message).await?;

        for media in &message.media {
            if let Err(e) = self
                .deps
                .media_store
                .attach_to_message(media.id, message.id)
                .await
            {
                error!(media_id = media.id, message_id = message.id, error = %e, "error linking media to message");
            }
        }

        if let Err(e) = self
            .deps
            .conversation_store
            .add_participant(message.sender_id, message.conversation_uuid)
            .await
        {
            error!(
                sender_id = message.sender_id,
                conversation_uuid = %message.conversation_uuid,
                error = %e,
                "error adding conversation participant"
            );
        }

        let sender = self.deps.user_store.get_user(message.sender_id).await?;
        let sender_summary = serde_json::json!({
            "id": sender.id,
            "first_name": sender.first_name,
            "last_name": sender.last_name,
            "type": sender.kind,
        });
        let message_summary = serde_json::json!({
            "uuid": message.uuid,
            "created_at": message.created_at,
            "text_content": message.text_content,
            "sender": sender_summary,
        });

        let mut conversation_meta = serde_json::Map::new();
        let mut last_interaction_at = None;
        let chat_visible = matches!(
            message.message_type,
            MessageType::Incoming | MessageType::Outgoing
        ) && !message.private;
        if chat_visible {
            conversation_meta.insert("last_chat_message".into(), message_summary.clone());
            last_interaction_at = Some(message.created_at);
        }
        conversation_meta.insert("last_message".into(), message_summary);

        if let Err(e) = self
            .deps
            .conversation_store
            .update_last_message(
                message.conversation_id,
                &message.text_content,
                message.sender_type,
                message.created_at,
                last_interaction_at,
                serde_json::Value::Object(conversation_meta),
            )
            .await
        {
            error!(conversation_id = message.conversation_id, error = %e, "error updating conversation last message");
        }

        self.deps.broadcaster.message_created(message);

        // Media links land after the insert; refetch so the returned message
        // carries them.
        if !message.media.is_empty() {
            match self.deps.message_store.get_message(message.uuid).await {
                Ok(refetched) => *message = refetched,
                Err(e) => error!(message_uuid = %message.uuid, error = %e, "error refetching message after insert"),
            }
        }

        match serde_json::to_value(&*message) {
            Ok(payload) => self
                .deps
                .webhooks
                .trigger(WebhookEvent::MessageCreated, payload),
            Err(e) => error!(message_uuid = %message.uuid, error = %e, "error serializing message for webhook"),
        }
        Ok(())
    }

    /// Post-message hooks: automation events, reopening, waiting-since, AI
    /// hand-off and SLA event creation.
    pub(super) async fn process_incoming_hooks(
        &self,
        conversation_uuid: Uuid,
        is_new_conversation: bool,
    ) -> Result<(), DispatchError> {
        if is_new_conversation {
            if let Ok(conversation) = self
                .deps
                .conversation_store
                .get_conversation(0, Some(conversation_uuid))
                .await
            {
                match serde_json::to_value(&conversation) {
                    Ok(payload) => self
                        .deps
                        .webhooks
                        .trigger(WebhookEvent::ConversationCreated, payload),
                    Err(e) => error!(conversation_uuid = %conversation_uuid, error = %e, "error serializing conversation for webhook"),
                }
                self.deps
                    .automation
                    .evaluate_new_conversation_rules(conversation);
            }
            return Ok(());
        }

        // A contact followed up on an existing conversation: reopen it if an
        // agent had closed it.
        match self.deps.user_store.system_user().await {
            Ok(system_user) => {
                if let Err(e) = self
                    .deps
                    .conversation_store
                    .reopen(conversation_uuid, &system_user)
                    .await
                {
                    error!(conversation_uuid = %conversation_uuid, error = %e, "error reopening conversation");
                }
            }
            Err(e) => error!(error = %e, "error fetching system user"),
        }

        let conversation = match self
            .deps
            .conversation_store
            .get_conversation(0, Some(conversation_uuid))
            .await
        {
            Ok(conversation) => conversation,
            Err(e) => {
                error!(conversation_uuid = %conversation_uuid, error = %e, "error fetching conversation");
                return Ok(());
            }
        };

        // Starts the waiting clock; cleared again when an agent replies.
        if conversation.waiting_since.is_none() {
            if let Err(e) = self
                .deps
                .conversation_store
                .update_waiting_since(conversation_uuid, Some(Utc::now()))
                .await
            {
                error!(conversation_uuid = %conversation_uuid, error = %e, "error setting waiting-since timestamp");
            }
        }

        self.maybe_enqueue_completion(&conversation).await;

        self.deps.automation.evaluate_conversation_update_rules(
            conversation.clone(),
            ConversationEvent::MessageIncoming,
        );

        let Some(sla_policy_id) = conversation.sla_policy_id else {
            info!(
                conversation_id = conversation.id,
                "no SLA policy applied, skipping next-response event creation"
            );
            return Ok(());
        };
        match self
            .deps
            .sla_store
            .create_next_response_event(
                conversation.id,
                conversation.applied_sla_id.unwrap_or_default(),
                sla_policy_id,
                conversation.assigned_team_id,
            )
            .await
        {
            Ok(deadline) => {
                info!(
                    conversation_id = conversation.id,
                    deadline = %deadline,
                    sla_policy_id,
                    "next-response SLA event created"
                );
                self.deps.broadcaster.conversation_property_update(
                    conversation_uuid,
                    "next_response_deadline_at",
                    Some(deadline.to_rfc3339()),
                );
                // A fresh event supersedes any previously-met one.
                self.deps.broadcaster.conversation_property_update(
                    conversation_uuid,
                    "next_response_met_at",
                    None,
                );
            }
            Err(SlaError::UnmetEventAlreadyExists) => {}
            Err(e) => {
                error!(conversation_id = conversation.id, error = %e, "error creating next-response SLA event");
            }
        }
        Ok(())
    }

    /// Queue the conversation for an AI reply when its assignee is an
    /// enabled AI assistant and the inbox has a linked help center.
    async fn maybe_enqueue_completion(&self, conversation: &Conversation) {
        let latest = match self
            .deps
            .message_store
            .latest_message(
                conversation.id,
                &[MessageType::Incoming, MessageType::Outgoing],
                &[MessageStatus::Sent, MessageStatus::Received],
                true,
            )
            .await
        {
            Ok(Some(latest)) => latest,
            Ok(None) => return,
            Err(e) => {
                error!(conversation_id = conversation.id, error = %e, "error fetching latest message for AI completion");
                return;
            }
        };

        // Only contact messages warrant an assistant reply.
        if latest.message_type != MessageType::Incoming || latest.sender_type != SenderType::Contact
        {
            debug!(
                conversation_id = conversation.id,
                "latest message is not from a contact, skipping AI completion"
            );
            return;
        }

        let Some(assigned_user_id) = conversation.assigned_user_id else {
            debug!(
                conversation_id = conversation.id,
                "conversation has no assignee, skipping AI completion"
            );
            return;
        };

        let inbox_record = match self.deps.inbox_store.get_record(conversation.inbox_id).await {
            Ok(record) => record,
            Err(e) => {
                error!(inbox_id = conversation.inbox_id, error = %e, "error fetching inbox for AI completion");
                return;
            }
        };
        // Completions ground their answers in help-center articles.
        let Some(help_center_id) = inbox_record.help_center_id else {
            debug!(
                inbox_id = conversation.inbox_id,
                "inbox has no linked help center, skipping AI completion"
            );
            return;
        };

        let assignee = match self.deps.user_store.get_user(assigned_user_id).await {
            Ok(user) => user,
            Err(e) => {
                error!(user_id = assigned_user_id, error = %e, "error fetching assignee for AI completion");
                return;
            }
        };
        if !assignee.is_ai_assistant() {
            debug!(
                conversation_id = conversation.id,
                "assignee is not an AI assistant, skipping AI completion"
            );
            return;
        }
        if !assignee.enabled {
            debug!(
                conversation_id = conversation.id,
                "AI assistant is disabled, skipping AI completion"
            );
            return;
        }

        let messages = match self
            .deps
            .message_store
            .conversation_messages(conversation.uuid, 20)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                error!(conversation_uuid = %conversation.uuid, error = %e, "error fetching history for AI completion");
                return;
            }
        };

        let request = CompletionRequest {
            conversation_uuid: conversation.uuid,
            inbox_id: conversation.inbox_id,
            contact_id: conversation.contact_id,
            assistant: assignee,
            help_center_id,
            messages,
        };
        if let Err(e) = self.deps.completions.enqueue(request).await {
            warn!(conversation_uuid = %conversation.uuid, error = %e, "error enqueuing AI completion request");
            return;
        }
        info!(conversation_uuid = %conversation.uuid, "AI completion request enqueued");
    }
}

fn has_image_extension(filename: &str) -> bool {
    filename
        .rsplit('.')
        .next()
        .map(|ext| IMAGE_EXTS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::has_image_extension;

    #[test]
    fn image_extensions_detected_case_insensitively() {
        assert!(has_image_extension("photo.PNG"));
        assert!(has_image_extension("scan.jpeg"));
        assert!(!has_image_extension("invoice.pdf"));
        assert!(!has_image_extension("no_extension"));
    }
}
