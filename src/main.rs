use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use deskflow::assigner::AutoAssigner;
use deskflow::automation::AutomationEngine;
use deskflow::automation::rule::{ExecutionMode, RuleRecord, RuleType};
use deskflow::config::{AssignerConfig, AutomationConfig, DispatchConfig};
use deskflow::dispatch::{DispatchDeps, DispatchEngine};
use deskflow::inbox::ConsoleInbox;
use deskflow::models::{
    AssignmentType, AvailabilityStatus, ChannelKind, Contact, IncomingMessage, Message,
    MessageStatus, MessageType, SenderType, Team, TeamMember, User, UserKind,
};
use deskflow::store::memory::{
    InboxRegistry, MemoryStore, NoopBroadcaster, NoopCompletionQueue, NoopWebhookSink,
};
use deskflow::store::{InboxRecord, PassthroughRenderer, UserStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("deskflow {} demo", env!("CARGO_PKG_VERSION"));

    // In-memory store and a console inbox stand in for the excluded
    // persistence and channel subsystems.
    let store = Arc::new(MemoryStore::new());
    let inboxes = Arc::new(InboxRegistry::new());
    let from_address = "support@deskflow.local";
    inboxes.register(
        Arc::new(ConsoleInbox::new(1, ChannelKind::Email, from_address)),
        InboxRecord {
            id: 1,
            channel: ChannelKind::Email,
            enabled: true,
            from_address: from_address.into(),
            help_center_id: None,
        },
    );

    let system_user = store.system_user().await?;

    // Seed one agent on a round-robin team.
    let agent = store
        .add_user(User {
            id: 0,
            kind: UserKind::Agent,
            email: Some("grace@deskflow.local".into()),
            first_name: "Grace".into(),
            last_name: "Hopper".into(),
            enabled: true,
            availability_status: AvailabilityStatus::Online,
        })
        .await;
    let team = store
        .add_team(Team {
            id: 0,
            name: "Support".into(),
            assignment_type: AssignmentType::RoundRobin,
            max_auto_assigned_conversations: 0,
        })
        .await;
    store
        .add_team_member(
            team.id,
            TeamMember {
                user_id: agent.id,
                availability_status: AvailabilityStatus::Online,
            },
        )
        .await;

    // One automation rule: route every new conversation to the team.
    store
        .add_rule(RuleRecord {
            id: 0,
            name: "route new conversations to support".into(),
            rule_type: RuleType::New,
            events: vec![],
            execution_mode: ExecutionMode::All,
            enabled: true,
            rules: serde_json::json!([{
                "groups": [{
                    "logical_op": "AND",
                    "conditions": [
                        {"source": "conversation", "field": "subject", "operator": "set"},
                    ],
                }],
                "group_operator": "AND",
                "actions": [
                    {"type": "assign_team", "value": [team.id.to_string()]},
                ],
            }]),
        })
        .await;

    let automation = Arc::new(AutomationEngine::new(
        AutomationConfig::default(),
        store.clone(),
        store.clone(),
        system_user.clone(),
    ));
    automation.reload_rules().await?;

    let dispatch = Arc::new(DispatchEngine::new(
        DispatchConfig {
            scan_interval: Duration::from_secs(2),
            ..Default::default()
        },
        DispatchDeps {
            message_store: store.clone(),
            conversation_store: store.clone(),
            user_store: store.clone(),
            team_store: store.clone(),
            media_store: store.clone(),
            inbox_store: inboxes.clone(),
            sla_store: store.clone(),
            webhooks: Arc::new(NoopWebhookSink),
            broadcaster: Arc::new(NoopBroadcaster),
            completions: Arc::new(NoopCompletionQueue),
            renderer: Arc::new(PassthroughRenderer),
            automation: automation.clone(),
        },
    ));

    let assigner = Arc::new(AutoAssigner::new(
        AssignerConfig {
            interval: Duration::from_secs(5),
        },
        store.clone(),
        store.clone(),
        system_user,
    ));

    let token = CancellationToken::new();
    dispatch.start(&token);
    automation.start(&token);
    assigner.start(&token);

    // Feed one demo email through the pipeline.
    let mut message = Message::new(MessageType::Incoming, MessageStatus::Received);
    message.inbox_id = 1;
    message.sender_type = SenderType::Contact;
    message.source_id = Some("<demo-1@customer.example>".into());
    message.content = "<p>Hello, I have a question about my invoice.</p>".into();
    dispatch.enqueue_incoming(IncomingMessage {
        inbox_id: 1,
        channel: ChannelKind::Email,
        contact: Contact {
            id: 0,
            email: Some("ada@customer.example".into()),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            custom_attributes: serde_json::json!({}),
        },
        message,
        subject: Some("Invoice question".into()),
    })?;

    info!("engines running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    token.cancel();
    dispatch.close().await;
    automation.close().await;
    assigner.close().await;
    Ok(())
}
