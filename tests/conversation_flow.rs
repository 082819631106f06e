//! End-to-end conversation flow against the in-memory store: threading,
//! idempotent re-delivery, outgoing send effects and the at-most-once
//! in-flight guarantee.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use deskflow::automation::AutomationEngine;
use deskflow::automation::rule::{ExecutionMode, RuleRecord, RuleType};
use deskflow::config::{AutomationConfig, DispatchConfig};
use deskflow::dispatch::{DispatchDeps, DispatchEngine};
use deskflow::error::InboxError;
use deskflow::inbox::Inbox;
use deskflow::models::{
    AssignmentType, Attachment, AvailabilityStatus, ChannelKind, Contact, Conversation,
    IncomingMessage, Message, MessageStatus, MessageType, SenderType, Team, TeamMember, User,
    UserKind,
};
use deskflow::store::memory::{
    InboxRegistry, MemoryStore, NoopBroadcaster, NoopCompletionQueue, NoopWebhookSink, STATUS_OPEN,
};
use deskflow::store::{
    ConversationStore, InboxRecord, MessageStore, PassthroughRenderer, UserStore,
};

/// Inbox that records sends; can be told to fail and to be slow.
struct RecordingInbox {
    id: i64,
    from_address: String,
    sent: StdMutex<Vec<Message>>,
    fail: AtomicBool,
    delay: Duration,
}

impl RecordingInbox {
    fn new(id: i64, delay: Duration) -> Self {
        Self {
            id,
            from_address: "support@helpdesk.test".into(),
            sent: StdMutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            delay,
        }
    }

    fn sent_messages(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Inbox for RecordingInbox {
    fn identifier(&self) -> i64 {
        self.id
    }

    fn channel(&self) -> ChannelKind {
        ChannelKind::Email
    }

    fn from_address(&self) -> String {
        self.from_address.clone()
    }

    async fn send(&self, message: &Message) -> Result<(), InboxError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(InboxError::SendFailed {
                inbox_id: self.id,
                message_uuid: message.uuid,
                reason: "smtp connection refused".into(),
            });
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn receive(&self, token: CancellationToken) -> Result<(), InboxError> {
        token.cancelled().await;
        Ok(())
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    inbox: Arc<RecordingInbox>,
    dispatch: Arc<DispatchEngine>,
    automation: Arc<AutomationEngine>,
    token: CancellationToken,
}

impl Harness {
    async fn new(scan_interval: Duration, send_delay: Duration) -> Self {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(InboxRegistry::new());
        let inbox = Arc::new(RecordingInbox::new(1, send_delay));
        registry.register(
            inbox.clone(),
            InboxRecord {
                id: 1,
                channel: ChannelKind::Email,
                enabled: true,
                from_address: inbox.from_address.clone(),
                help_center_id: None,
            },
        );

        let system_user = store.system_user().await.unwrap();
        let automation = Arc::new(AutomationEngine::new(
            AutomationConfig {
                workers: 2,
                ..Default::default()
            },
            store.clone(),
            store.clone(),
            system_user,
        ));

        let dispatch = Arc::new(DispatchEngine::new(
            DispatchConfig {
                incoming_workers: 2,
                outgoing_workers: 2,
                scan_interval,
                ..Default::default()
            },
            DispatchDeps {
                message_store: store.clone(),
                conversation_store: store.clone(),
                user_store: store.clone(),
                team_store: store.clone(),
                media_store: store.clone(),
                inbox_store: registry.clone(),
                sla_store: store.clone(),
                webhooks: Arc::new(NoopWebhookSink),
                broadcaster: Arc::new(NoopBroadcaster),
                completions: Arc::new(NoopCompletionQueue),
                renderer: Arc::new(PassthroughRenderer),
                automation: automation.clone(),
            },
        ));

        let token = CancellationToken::new();
        dispatch.start(&token);
        automation.start(&token);

        Self {
            store,
            inbox,
            dispatch,
            automation,
            token,
        }
    }

    async fn seed_agent(&self) -> User {
        self.store
            .add_user(User {
                id: 0,
                kind: UserKind::Agent,
                email: Some("grace@helpdesk.test".into()),
                first_name: "Grace".into(),
                last_name: "Hopper".into(),
                enabled: true,
                availability_status: AvailabilityStatus::Online,
            })
            .await
    }

    async fn conversation(&self, uuid: Uuid) -> Conversation {
        self.store.get_conversation(0, Some(uuid)).await.unwrap()
    }

    async fn shutdown(self) {
        self.token.cancel();
        self.dispatch.close().await;
        self.automation.close().await;
    }
}

fn email(source_id: &str, in_reply_to: Option<&str>, subject: &str, body: &str) -> IncomingMessage {
    let mut message = Message::new(MessageType::Incoming, MessageStatus::Received);
    message.inbox_id = 1;
    message.sender_type = SenderType::Contact;
    message.source_id = Some(source_id.to_string());
    message.in_reply_to = in_reply_to.map(String::from);
    message.content = body.to_string();
    IncomingMessage {
        inbox_id: 1,
        channel: ChannelKind::Email,
        contact: Contact {
            id: 0,
            email: Some("ada@customer.test".into()),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            custom_attributes: serde_json::json!({}),
        },
        message,
        subject: Some(subject.to_string()),
    }
}

/// Poll until the predicate holds or a couple of seconds pass.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn incoming_email_creates_contact_conversation_and_message() {
    let h = Harness::new(Duration::from_secs(60), Duration::ZERO).await;

    let processed = h
        .dispatch
        .process_incoming(email("<m1@c.test>", None, "Invoice", "<p>Help me</p>"))
        .await
        .unwrap()
        .expect("message should be stored");

    assert_eq!(h.store.conversation_count().await, 1);
    assert_eq!(h.store.message_count().await, 1);

    let conversation = h.conversation(processed.conversation_uuid).await;
    assert_eq!(conversation.subject.as_deref(), Some("Invoice"));
    assert_eq!(conversation.status_id, Some(STATUS_OPEN));
    assert_eq!(conversation.contact.email.as_deref(), Some("ada@customer.test"));
    assert!(conversation.last_message.as_deref().unwrap().contains("Help me"));
    // A brand-new conversation has no waiting clock yet.
    assert!(conversation.waiting_since.is_none());

    h.shutdown().await;
}

#[tokio::test]
async fn identical_redelivery_is_a_silent_noop() {
    let h = Harness::new(Duration::from_secs(60), Duration::ZERO).await;

    let first = h
        .dispatch
        .process_incoming(email("<m1@c.test>", None, "Invoice", "hello"))
        .await
        .unwrap();
    assert!(first.is_some());

    let second = h
        .dispatch
        .process_incoming(email("<m1@c.test>", None, "Invoice", "hello"))
        .await
        .unwrap();
    assert!(second.is_none());

    assert_eq!(h.store.conversation_count().await, 1);
    assert_eq!(h.store.message_count().await, 1);

    h.shutdown().await;
}

#[tokio::test]
async fn replies_thread_into_the_existing_conversation() {
    let h = Harness::new(Duration::from_secs(60), Duration::ZERO).await;

    let first = h
        .dispatch
        .process_incoming(email("<m1@c.test>", None, "Invoice", "hello"))
        .await
        .unwrap()
        .unwrap();

    // Resolve, then let the contact follow up referencing the first message.
    h.store
        .resolve_conversation(first.conversation_uuid)
        .await
        .unwrap();

    let followup = h
        .dispatch
        .process_incoming(email("<m2@c.test>", Some("<m1@c.test>"), "Invoice", "any update?"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(followup.conversation_uuid, first.conversation_uuid);
    assert_eq!(h.store.conversation_count().await, 1);
    assert_eq!(h.store.message_count().await, 2);

    // The follow-up reopened the conversation and started the waiting clock.
    let conversation = h.conversation(first.conversation_uuid).await;
    assert_eq!(conversation.status_id, Some(STATUS_OPEN));
    assert!(conversation.waiting_since.is_some());

    h.shutdown().await;
}

#[tokio::test]
async fn outgoing_reply_is_sent_with_threading_headers() {
    let h = Harness::new(Duration::from_millis(30), Duration::ZERO).await;
    let agent = h.seed_agent().await;

    let incoming = h
        .dispatch
        .process_incoming(email("<m1@c.test>", None, "Invoice", "hello"))
        .await
        .unwrap()
        .unwrap();

    let reply = h
        .dispatch
        .send_reply(
            vec![],
            1,
            agent.id,
            incoming.conversation_uuid,
            "<p>Happy to help!</p>".into(),
            vec!["ada@customer.test".into()],
            vec![],
            vec![],
            serde_json::Map::new(),
        )
        .await
        .unwrap();
    assert_eq!(reply.status, MessageStatus::Pending);

    assert!(
        eventually(|| async {
            h.store.get_message(reply.uuid).await.unwrap().status == MessageStatus::Sent
        })
        .await,
        "reply should be picked up by the scanner and sent"
    );

    let sent = h.inbox.sent_messages();
    assert_eq!(sent.len(), 1);
    let wire = &sent[0];
    assert_eq!(wire.from.as_deref(), Some("support@helpdesk.test"));
    // References exclude the reply's own source id and end at the message
    // being answered.
    assert_eq!(wire.references, vec!["<m1@c.test>".to_string()]);
    assert_eq!(wire.in_reply_to.as_deref(), Some("<m1@c.test>"));

    // The reply-side conversation updates land after the status flip.
    let uuid = incoming.conversation_uuid;
    assert!(
        eventually(|| async { h.conversation(uuid).await.first_reply_at.is_some() }).await
    );
    let conversation = h.conversation(uuid).await;
    assert!(conversation.last_reply_at.is_some());
    assert!(conversation.waiting_since.is_none());

    h.shutdown().await;
}

#[tokio::test]
async fn failed_send_is_terminal_until_marked_pending() {
    let h = Harness::new(Duration::from_millis(30), Duration::ZERO).await;
    let agent = h.seed_agent().await;
    h.inbox.fail.store(true, Ordering::SeqCst);

    let incoming = h
        .dispatch
        .process_incoming(email("<m1@c.test>", None, "Invoice", "hello"))
        .await
        .unwrap()
        .unwrap();
    let reply = h
        .dispatch
        .send_reply(
            vec![],
            1,
            agent.id,
            incoming.conversation_uuid,
            "reply".into(),
            vec!["ada@customer.test".into()],
            vec![],
            vec![],
            serde_json::Map::new(),
        )
        .await
        .unwrap();

    assert!(
        eventually(|| async {
            h.store.get_message(reply.uuid).await.unwrap().status == MessageStatus::Failed
        })
        .await
    );

    // No automatic retry: the message stays failed across scan cycles.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        h.store.get_message(reply.uuid).await.unwrap().status,
        MessageStatus::Failed
    );
    assert!(h.inbox.sent_messages().is_empty());

    // Operator retry: flip back to pending, fix the channel, and the
    // scanner picks it up again.
    h.inbox.fail.store(false, Ordering::SeqCst);
    h.dispatch.mark_message_as_pending(reply.uuid).await.unwrap();

    assert!(
        eventually(|| async {
            h.store.get_message(reply.uuid).await.unwrap().status == MessageStatus::Sent
        })
        .await
    );
    assert_eq!(h.inbox.sent_messages().len(), 1);

    h.shutdown().await;
}

#[tokio::test]
async fn slow_send_is_never_queued_twice() {
    // Scanner ticks far more often than one send takes; the in-flight set
    // must keep the message from being handed to a second worker.
    let h = Harness::new(Duration::from_millis(20), Duration::from_millis(250)).await;
    let agent = h.seed_agent().await;

    let incoming = h
        .dispatch
        .process_incoming(email("<m1@c.test>", None, "Invoice", "hello"))
        .await
        .unwrap()
        .unwrap();
    let reply = h
        .dispatch
        .send_reply(
            vec![],
            1,
            agent.id,
            incoming.conversation_uuid,
            "reply".into(),
            vec!["ada@customer.test".into()],
            vec![],
            vec![],
            serde_json::Map::new(),
        )
        .await
        .unwrap();

    assert!(
        eventually(|| async {
            h.store.get_message(reply.uuid).await.unwrap().status == MessageStatus::Sent
        })
        .await
    );
    // Give further scanner ticks a chance to misbehave, then count.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.inbox.sent_messages().len(), 1);
    assert!(h.dispatch.in_flight_ids().is_empty());

    h.shutdown().await;
}

#[tokio::test]
async fn private_notes_are_born_sent_and_never_dispatched() {
    let h = Harness::new(Duration::from_millis(20), Duration::ZERO).await;
    let agent = h.seed_agent().await;

    let incoming = h
        .dispatch
        .process_incoming(email("<m1@c.test>", None, "Invoice", "hello"))
        .await
        .unwrap()
        .unwrap();
    let note = h
        .dispatch
        .send_private_note(
            vec![],
            agent.id,
            incoming.conversation_uuid,
            "<p>internal note</p>".into(),
        )
        .await
        .unwrap();
    assert_eq!(note.status, MessageStatus::Sent);
    assert!(note.private);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(h.inbox.sent_messages().is_empty());

    h.shutdown().await;
}

#[tokio::test]
async fn attachments_upload_once_per_conversation_content_id() {
    let h = Harness::new(Duration::from_secs(60), Duration::ZERO).await;

    let mut first = email("<m1@c.test>", None, "Logo", r#"<img src="cid:logo1">"#);
    first.message.attachments.push(Attachment {
        name: "logo.png".into(),
        content_type: "image/png".into(),
        content: vec![1, 2, 3],
        content_id: "logo1".into(),
        disposition: "inline".into(),
        size: 3,
    });
    let stored = h
        .dispatch
        .process_incoming(first)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.media.len(), 1);
    // Inline image content ids are rescoped to the conversation.
    assert!(
        stored
            .content
            .contains(&format!("cid:{}_logo1", stored.conversation_uuid))
    );
    assert!(h.store.has_thumbnail(stored.media[0].uuid).await);

    // The same inline image in a follow-up is reused, not re-uploaded.
    let mut second = email(
        "<m2@c.test>",
        Some("<m1@c.test>"),
        "Logo",
        r#"<img src="cid:logo1">"#,
    );
    second.message.attachments.push(Attachment {
        name: "logo.png".into(),
        content_type: "image/png".into(),
        content: vec![1, 2, 3],
        content_id: "logo1".into(),
        disposition: "inline".into(),
        size: 3,
    });
    let followup = h
        .dispatch
        .process_incoming(second)
        .await
        .unwrap()
        .unwrap();
    assert!(followup.media.is_empty());
    assert!(followup.content.contains("/uploads/"));

    h.shutdown().await;
}

#[tokio::test]
async fn new_conversation_rules_fire_and_assigner_distributes() {
    let h = Harness::new(Duration::from_secs(60), Duration::ZERO).await;
    let agent = h.seed_agent().await;

    let team = h
        .store
        .add_team(Team {
            id: 0,
            name: "Support".into(),
            assignment_type: AssignmentType::RoundRobin,
            max_auto_assigned_conversations: 0,
        })
        .await;
    h.store
        .add_team_member(
            team.id,
            TeamMember {
                user_id: agent.id,
                availability_status: AvailabilityStatus::Online,
            },
        )
        .await;
    h.store
        .add_rule(RuleRecord {
            id: 0,
            name: "route to support".into(),
            rule_type: RuleType::New,
            events: vec![],
            execution_mode: ExecutionMode::All,
            enabled: true,
            rules: serde_json::json!([{
                "groups": [{
                    "logical_op": "AND",
                    "conditions": [
                        {"source": "conversation", "field": "subject", "operator": "contains", "value": "invoice"},
                    ],
                }],
                "group_operator": "AND",
                "actions": [
                    {"type": "assign_team", "value": [team.id.to_string()]},
                ],
            }]),
        })
        .await;
    h.automation.reload_rules().await.unwrap();

    let incoming = h
        .dispatch
        .process_incoming(email("<m1@c.test>", None, "Invoice question", "hello"))
        .await
        .unwrap()
        .unwrap();

    // The automation worker routes the conversation to the team.
    let uuid = incoming.conversation_uuid;
    assert!(
        eventually(|| async {
            h.conversation(uuid).await.assigned_team_id == Some(team.id)
        })
        .await,
        "new-conversation rule should assign the team"
    );

    // One assigner cycle hands it to the only member.
    let assigner = deskflow::assigner::AutoAssigner::new(
        deskflow::config::AssignerConfig::default(),
        h.store.clone(),
        h.store.clone(),
        h.store.system_user().await.unwrap(),
    );
    assigner.reload_pools().await.unwrap();
    assigner.assign_conversations().await.unwrap();

    assert_eq!(
        h.conversation(uuid).await.assigned_user_id,
        Some(agent.id)
    );

    h.shutdown().await;
}

#[tokio::test]
async fn sla_next_response_cycle() {
    let h = Harness::new(Duration::from_millis(30), Duration::ZERO).await;
    let agent = h.seed_agent().await;

    let incoming = h
        .dispatch
        .process_incoming(email("<m1@c.test>", None, "Invoice", "hello"))
        .await
        .unwrap()
        .unwrap();
    let uuid = incoming.conversation_uuid;
    h.store.apply_sla_policy(uuid, 5, 10).await.unwrap();

    // A follow-up on a policy-bearing conversation opens one next-response
    // event; a second follow-up does not open another.
    h.dispatch
        .process_incoming(email("<m2@c.test>", Some("<m1@c.test>"), "Invoice", "ping"))
        .await
        .unwrap();
    assert_eq!(h.store.open_sla_event_count(10).await, 1);

    h.dispatch
        .process_incoming(email("<m3@c.test>", Some("<m1@c.test>"), "Invoice", "ping again"))
        .await
        .unwrap();
    assert_eq!(h.store.open_sla_event_count(10).await, 1);

    // An agent reply marks the event met.
    let reply = h
        .dispatch
        .send_reply(
            vec![],
            1,
            agent.id,
            uuid,
            "on it".into(),
            vec!["ada@customer.test".into()],
            vec![],
            vec![],
            serde_json::Map::new(),
        )
        .await
        .unwrap();
    assert!(
        eventually(|| async {
            h.store.get_message(reply.uuid).await.unwrap().status == MessageStatus::Sent
        })
        .await
    );
    assert!(
        eventually(|| async { h.store.open_sla_event_count(10).await == 0 }).await,
        "agent reply should mark the next-response event met"
    );

    h.shutdown().await;
}
