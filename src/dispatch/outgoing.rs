//! Outgoing message sending.

use chrono::Utc;
use tracing::{debug, error};

use crate::automation::ConversationEvent;
use crate::error::SlaError;
use crate::models::{Attachment, ChannelKind, Message, MessageStatus};
use crate::store::SlaMetric;

use super::engine::DispatchEngine;

impl DispatchEngine {
    /// Send one outgoing message through its inbox and apply the post-send
    /// conversation updates. Any failure is terminal for this attempt: the
    /// message goes to `Failed` and waits for an explicit operator re-pend.
    pub(super) async fn send_outgoing(&self, mut message: Message) {
        let inbox = match self.deps.inbox_store.get(message.inbox_id).await {
            Ok(inbox) => inbox,
            Err(e) => {
                error!(message_id = message.id, error = %e, "error fetching inbox");
                self.fail_message(&message).await;
                return;
            }
        };

        // Render email content through the template seam; chat content is
        // sent as-is.
        if inbox.channel() == ChannelKind::Email {
            let conversation = match self
                .deps
                .conversation_store
                .get_conversation(0, Some(message.conversation_uuid))
                .await
            {
                Ok(conversation) => conversation,
                Err(e) => {
                    error!(message_id = message.id, error = %e, "error fetching conversation for rendering");
                    self.fail_message(&message).await;
                    return;
                }
            };
            let sender = match self.deps.user_store.get_user(message.sender_id).await {
                Ok(sender) => sender,
                Err(e) => {
                    error!(message_id = message.id, error = %e, "error fetching message sender");
                    self.fail_message(&message).await;
                    return;
                }
            };
            match self.deps.renderer.render(&message, &conversation, &sender) {
                Ok(content) => message.content = content,
                Err(e) => {
                    error!(message_id = message.id, error = %e, "error rendering message content");
                    self.fail_message(&message).await;
                    return;
                }
            }
        }

        if let Err(e) = self.attach_media_blobs(&mut message).await {
            error!(message_id = message.id, error = %e, "error attaching media to message");
            self.fail_message(&message).await;
            return;
        }

        if inbox.channel() == ChannelKind::Email {
            message.from = Some(inbox.from_address());

            // Reconstruct threading headers from the conversation's recent
            // source ids. The store returns them newest first; reversing
            // puts `References` in the chronological order mail clients
            // expect. Header errors are logged but never block the send.
            let source_ids = match self
                .deps
                .message_store
                .conversation_source_ids(message.conversation_id, self.config.reference_limit)
                .await
            {
                Ok(ids) => ids,
                Err(e) => {
                    error!(conversation_id = message.conversation_id, error = %e, "error fetching conversation source ids");
                    Vec::new()
                }
            };
            let (references, in_reply_to) =
                build_references(source_ids, message.source_id.as_deref());
            message.references = references;
            message.in_reply_to = in_reply_to;
        }

        if let Err(e) = inbox.send(&message).await {
            error!(message_id = message.id, error = %e, "error sending message");
            self.fail_message(&message).await;
            return;
        }

        if let Err(e) = self
            .update_message_status(message.uuid, MessageStatus::Sent)
            .await
        {
            error!(message_uuid = %message.uuid, error = %e, "error updating message status");
        }

        // Reply timestamps, SLA bookkeeping and the outgoing automation
        // event track human replies only; system-user replies skip all of it.
        let system_user = match self.deps.user_store.system_user().await {
            Ok(user) => user,
            Err(e) => {
                error!(error = %e, "error fetching system user");
                return;
            }
        };
        if message.sender_id == system_user.id {
            return;
        }

        let conversation = match self
            .deps
            .conversation_store
            .get_conversation(message.conversation_id, None)
            .await
        {
            Ok(conversation) => conversation,
            Err(e) => {
                error!(conversation_id = message.conversation_id, error = %e, "error fetching conversation");
                return;
            }
        };

        let now = Utc::now();
        if conversation.first_reply_at.is_none() {
            if let Err(e) = self
                .deps
                .conversation_store
                .update_first_reply_at(conversation.uuid, now)
                .await
            {
                error!(conversation_uuid = %conversation.uuid, error = %e, "error updating first reply timestamp");
            }
        }
        if let Err(e) = self
            .deps
            .conversation_store
            .update_last_reply_at(conversation.uuid, now)
            .await
        {
            error!(conversation_uuid = %conversation.uuid, error = %e, "error updating last reply timestamp");
        }

        // The agent has replied; the conversation is no longer waiting.
        if let Err(e) = self
            .deps
            .conversation_store
            .update_waiting_since(conversation.uuid, None)
            .await
        {
            error!(conversation_uuid = %conversation.uuid, error = %e, "error clearing waiting-since timestamp");
        }

        if let Some(applied_sla_id) = conversation.applied_sla_id {
            match self
                .deps
                .sla_store
                .set_latest_event_met(applied_sla_id, SlaMetric::NextResponse)
                .await
            {
                Ok(met_at) => {
                    self.deps.broadcaster.conversation_property_update(
                        conversation.uuid,
                        "next_response_met_at",
                        Some(met_at.to_rfc3339()),
                    );
                }
                Err(SlaError::LatestEventNotFound) => {
                    debug!(conversation_id = conversation.id, "no open next-response SLA event");
                }
                Err(e) => {
                    error!(
                        conversation_id = conversation.id,
                        applied_sla_id,
                        error = %e,
                        "error marking next-response SLA event met"
                    );
                }
            }
        }

        self.deps
            .automation
            .evaluate_conversation_update_rules_by_id(
                message.conversation_id,
                None,
                ConversationEvent::MessageOutgoing,
            )
            .await;
    }

    async fn fail_message(&self, message: &Message) {
        if let Err(e) = self
            .update_message_status(message.uuid, MessageStatus::Failed)
            .await
        {
            error!(message_uuid = %message.uuid, error = %e, "error marking message failed");
        }
    }

    /// Resolve the message's stored media into sendable attachment blobs.
    async fn attach_media_blobs(
        &self,
        message: &mut Message,
    ) -> Result<(), crate::error::StoreError> {
        let medias = self.deps.media_store.media_for_message(message.id).await?;
        let mut attachments = Vec::with_capacity(medias.len());
        for media in medias {
            let blob = self.deps.media_store.blob(media.uuid).await?;
            attachments.push(Attachment {
                name: media.filename.clone(),
                content_type: media.content_type.clone(),
                size: blob.len(),
                content: blob,
                content_id: media.content_id.clone().unwrap_or_default(),
                disposition: media.disposition.clone(),
            });
        }
        message.attachments = attachments;
        Ok(())
    }
}

/// Turn newest-first source ids into a chronological `References` list that
/// excludes the message's own source id, plus the `In-Reply-To` header (the
/// most recent other message).
pub(crate) fn build_references(
    mut source_ids_desc: Vec<String>,
    own_source_id: Option<&str>,
) -> (Vec<String>, Option<String>) {
    source_ids_desc.reverse();
    if let Some(own) = own_source_id {
        source_ids_desc.retain(|id| id != own);
    }
    let in_reply_to = source_ids_desc.last().cloned();
    (source_ids_desc, in_reply_to)
}
