//! Automation engine: task queue, worker pool and rule snapshot.

use std::sync::Arc;
use std::sync::Mutex;

use arc_swap::ArcSwap;
use chrono::{Duration, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::AutomationConfig;
use crate::error::AutomationError;
use crate::models::{Conversation, User};
use crate::store::{ConversationStore, RuleStore};

use super::evaluator::rule_matches;
use super::rule::{ConversationEvent, ExecutionMode, Rule, RuleType};

/// Maximum number of queued evaluation tasks. Enqueues beyond this are
/// dropped and logged; callers are never blocked.
pub const MAX_QUEUE_SIZE: usize = 5000;

/// A unit of rule-evaluation work.
enum Task {
    NewConversation(Box<Conversation>),
    UpdateConversation(Box<Conversation>, ConversationEvent),
    TimeTrigger,
}

/// Evaluates the enabled rule set against conversation events.
pub struct AutomationEngine {
    config: AutomationConfig,
    /// Immutable rule snapshot, swapped wholesale on reload. Readers never
    /// lock.
    rules: ArcSwap<Vec<Rule>>,
    rule_store: Arc<dyn RuleStore>,
    conversation_store: Arc<dyn ConversationStore>,
    /// Actor automation actions are attributed to.
    system_user: User,
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Mutex<Option<CancellationToken>>,
}

impl AutomationEngine {
    pub fn new(
        config: AutomationConfig,
        rule_store: Arc<dyn RuleStore>,
        conversation_store: Arc<dyn ConversationStore>,
        system_user: User,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(MAX_QUEUE_SIZE);
        Self {
            config,
            rules: ArcSwap::from_pointee(Vec::new()),
            rule_store,
            conversation_store,
            system_user,
            sender: Mutex::new(Some(sender)),
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            handles: Mutex::new(Vec::new()),
            shutdown: Mutex::new(None),
        }
    }

    /// Re-fetch the enabled rule records and swap in a fresh snapshot.
    /// Called at startup and after every rule CRUD mutation.
    pub async fn reload_rules(&self) -> Result<(), AutomationError> {
        let records = self.rule_store.enabled_rules().await?;
        let mut rules = Vec::new();
        for record in &records {
            let definitions: Vec<super::rule::RuleDefinition> =
                match serde_json::from_value(record.rules.clone()) {
                    Ok(definitions) => definitions,
                    Err(e) => {
                        error!(record_id = record.id, error = %e, "error parsing rule record JSON, skipping");
                        continue;
                    }
                };
            rules.extend(
                definitions
                    .into_iter()
                    .map(|definition| Rule::from_definition(definition, record)),
            );
        }
        debug!(rules = rules.len(), records = records.len(), "reloaded automation rules");
        self.rules.store(Arc::new(rules));
        Ok(())
    }

    /// Spawn the worker pool and the time-trigger ticker.
    pub fn start(self: &Arc<Self>, parent: &CancellationToken) {
        let token = parent.child_token();
        let mut handles = Vec::new();

        for _ in 0..self.config.workers {
            let engine = Arc::clone(self);
            let token = token.clone();
            handles.push(tokio::spawn(async move { engine.worker(token).await }));
        }

        // Time-trigger ticker. The first trigger fires one full interval
        // after start, not immediately.
        {
            let engine = Arc::clone(self);
            let token = token.clone();
            let period = self.config.time_trigger_interval;
            handles.push(tokio::spawn(async move {
                let start = tokio::time::Instant::now() + period;
                let mut ticker = tokio::time::interval_at(start, period);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = ticker.tick() => {
                            info!("queuing automation time trigger");
                            engine.enqueue_task(Task::TimeTrigger);
                        }
                    }
                }
            }));
        }

        self.handles.lock().unwrap().extend(handles);
        *self.shutdown.lock().unwrap() = Some(token);
    }

    /// Stop accepting tasks, drain the queue and wait for the workers.
    pub async fn close(&self) {
        self.sender.lock().unwrap().take();
        if let Some(token) = self.shutdown.lock().unwrap().take() {
            token.cancel();
        }
        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        futures::future::join_all(handles).await;
    }

    /// Enqueue a new conversation for `new`-rule evaluation. Best-effort:
    /// a full queue drops the task with a warning.
    pub fn evaluate_new_conversation_rules(&self, conversation: Conversation) {
        self.enqueue_task(Task::NewConversation(Box::new(conversation)));
    }

    /// Enqueue a conversation update event for rule evaluation. Best-effort.
    pub fn evaluate_conversation_update_rules(
        &self,
        conversation: Conversation,
        event: ConversationEvent,
    ) {
        self.enqueue_task(Task::UpdateConversation(Box::new(conversation), event));
    }

    /// Fetch a fresh copy of the conversation and enqueue it for update-rule
    /// evaluation. For callers whose own copy may be stale.
    pub async fn evaluate_conversation_update_rules_by_id(
        &self,
        conversation_id: i64,
        conversation_uuid: Option<Uuid>,
        event: ConversationEvent,
    ) {
        let conversation = match self
            .conversation_store
            .get_conversation(conversation_id, conversation_uuid)
            .await
        {
            Ok(conversation) => conversation,
            Err(e) => {
                error!(conversation_id, error = %e, "error fetching conversation for rule evaluation");
                return;
            }
        };
        self.evaluate_conversation_update_rules(conversation, event);
    }

    /// Number of rules in the current snapshot.
    pub fn rule_count(&self) -> usize {
        self.rules.load().len()
    }

    /// Best-effort enqueue. Returns whether the task was queued; a closed
    /// engine silently refuses, a full queue drops with a warning.
    fn enqueue_task(&self, task: Task) -> bool {
        let sender = match &*self.sender.lock().unwrap() {
            Some(sender) => sender.clone(),
            None => return false,
        };
        match sender.try_send(task) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("automation task queue is full, dropping task");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    async fn worker(&self, token: CancellationToken) {
        loop {
            let task = {
                let mut receiver = self.receiver.lock().await;
                tokio::select! {
                    biased;
                    task = receiver.recv() => task,
                    _ = token.cancelled() => return,
                }
            };
            match task {
                Some(Task::NewConversation(conversation)) => {
                    self.handle_new_conversation(*conversation).await;
                }
                Some(Task::UpdateConversation(conversation, event)) => {
                    self.handle_update_conversation(*conversation, event).await;
                }
                Some(Task::TimeTrigger) => self.handle_time_trigger().await,
                None => return,
            }
        }
    }

    async fn handle_new_conversation(&self, conversation: Conversation) {
        debug!(conversation_uuid = %conversation.uuid, "evaluating new-conversation rules");
        let snapshot = self.rules.load_full();
        let rules: Vec<&Rule> = snapshot
            .iter()
            .filter(|r| r.rule_type == RuleType::New)
            .collect();
        if rules.is_empty() {
            return;
        }
        self.eval_conversation_rules(&rules, &conversation).await;
    }

    async fn handle_update_conversation(
        &self,
        conversation: Conversation,
        event: ConversationEvent,
    ) {
        debug!(
            conversation_uuid = %conversation.uuid,
            event = event.as_str(),
            "evaluating conversation-update rules"
        );
        let snapshot = self.rules.load_full();
        let rules: Vec<&Rule> = snapshot
            .iter()
            .filter(|r| r.rule_type == RuleType::Update && r.subscribed_to(event))
            .collect();
        if rules.is_empty() {
            return;
        }
        self.eval_conversation_rules(&rules, &conversation).await;
    }

    /// Full re-scan of recent conversations against the time-trigger rules.
    /// Runs at most once per trigger interval, so a linear pass is fine.
    async fn handle_time_trigger(&self) {
        let snapshot = self.rules.load_full();
        let rules: Vec<&Rule> = snapshot
            .iter()
            .filter(|r| r.rule_type == RuleType::TimeTrigger)
            .collect();
        if rules.is_empty() {
            return;
        }

        let thirty_days_ago = Utc::now() - Duration::days(30);
        let conversations = match self
            .conversation_store
            .conversations_created_after(thirty_days_ago)
            .await
        {
            Ok(conversations) => conversations,
            Err(e) => {
                error!(error = %e, "error fetching conversations for time trigger");
                return;
            }
        };
        info!(
            conversations = conversations.len(),
            rules = rules.len(),
            "running time-trigger rule evaluation"
        );

        for summary in conversations {
            // Re-fetch the full conversation; the scan query returns a
            // trimmed row.
            let conversation = match self
                .conversation_store
                .get_conversation(0, Some(summary.uuid))
                .await
            {
                Ok(conversation) => conversation,
                Err(e) => {
                    error!(conversation_uuid = %summary.uuid, error = %e, "error fetching conversation for time trigger");
                    continue;
                }
            };
            self.eval_conversation_rules(&rules, &conversation).await;
        }
    }

    /// Evaluate rules in order, applying the actions of every match. A
    /// first-match rule that fires stops further evaluation for this event.
    async fn eval_conversation_rules(&self, rules: &[&Rule], conversation: &Conversation) {
        for rule in rules {
            if !rule_matches(rule, conversation) {
                continue;
            }
            debug!(conversation_uuid = %conversation.uuid, "rule matched, applying actions");
            for action in &rule.actions {
                if let Err(e) = self
                    .conversation_store
                    .apply_action(action, conversation, &self.system_user)
                    .await
                {
                    error!(
                        action = ?action.action_type,
                        conversation_uuid = %conversation.uuid,
                        error = %e,
                        "error applying rule action"
                    );
                }
            }
            if rule.execution_mode == ExecutionMode::FirstMatch {
                debug!(conversation_uuid = %conversation.uuid, "first-match rule fired, stopping evaluation");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::rule::{
        ActionType, Condition, ConditionGroup, ConditionOperator, ConditionSubject,
        ConversationField, LogicalOp, RuleAction, RuleRecord,
    };
    use crate::error::StoreError;
    use crate::models::{AvailabilityStatus, Contact, UserKind};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn system_user() -> User {
        User {
            id: 1,
            kind: UserKind::System,
            email: None,
            first_name: "System".into(),
            last_name: String::new(),
            enabled: true,
            availability_status: AvailabilityStatus::Online,
        }
    }

    fn conversation(status_id: i64) -> Conversation {
        Conversation {
            id: 1,
            uuid: Uuid::new_v4(),
            reference_number: "100".into(),
            contact_id: 1,
            inbox_id: 1,
            assigned_user_id: None,
            assigned_team_id: None,
            status_id: Some(status_id),
            priority_id: None,
            subject: None,
            last_message: None,
            last_message_at: None,
            created_at: Utc::now(),
            first_reply_at: None,
            last_reply_at: None,
            resolved_at: None,
            waiting_since: None,
            sla_policy_id: None,
            applied_sla_id: None,
            contact: Contact::default(),
            meta: serde_json::json!({}),
        }
    }

    struct FixedRuleStore {
        records: Vec<RuleRecord>,
    }

    #[async_trait]
    impl RuleStore for FixedRuleStore {
        async fn enabled_rules(&self) -> Result<Vec<RuleRecord>, StoreError> {
            Ok(self.records.clone())
        }
    }

    /// Conversation store that counts applied actions.
    struct CountingStore {
        applied: AtomicUsize,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                applied: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ConversationStore for CountingStore {
        async fn create_conversation(
            &self,
            _contact_id: i64,
            _inbox_id: i64,
            _last_message: &str,
            _last_message_at: DateTime<Utc>,
            _subject: Option<&str>,
        ) -> Result<(i64, Uuid), StoreError> {
            unimplemented!()
        }

        async fn get_conversation(
            &self,
            _id: i64,
            _uuid: Option<Uuid>,
        ) -> Result<Conversation, StoreError> {
            Ok(conversation(1))
        }

        async fn conversation_uuid(&self, _id: i64) -> Result<Uuid, StoreError> {
            unimplemented!()
        }

        async fn update_first_reply_at(
            &self,
            _uuid: Uuid,
            _at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            unimplemented!()
        }

        async fn update_last_reply_at(
            &self,
            _uuid: Uuid,
            _at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            unimplemented!()
        }

        async fn update_waiting_since(
            &self,
            _uuid: Uuid,
            _at: Option<DateTime<Utc>>,
        ) -> Result<(), StoreError> {
            unimplemented!()
        }

        async fn update_last_message(
            &self,
            _conversation_id: i64,
            _last_message: &str,
            _sender_type: crate::models::SenderType,
            _at: DateTime<Utc>,
            _last_interaction_at: Option<DateTime<Utc>>,
            _meta: serde_json::Value,
        ) -> Result<(), StoreError> {
            unimplemented!()
        }

        async fn reopen(&self, _uuid: Uuid, _actor: &User) -> Result<(), StoreError> {
            unimplemented!()
        }

        async fn add_participant(&self, _user_id: i64, _uuid: Uuid) -> Result<(), StoreError> {
            unimplemented!()
        }

        async fn apply_action(
            &self,
            _action: &RuleAction,
            _conversation: &Conversation,
            _actor: &User,
        ) -> Result<(), StoreError> {
            self.applied.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn conversations_created_after(
            &self,
            _after: DateTime<Utc>,
        ) -> Result<Vec<Conversation>, StoreError> {
            Ok(vec![conversation(1)])
        }

        async fn unassigned_conversations(&self) -> Result<Vec<Conversation>, StoreError> {
            unimplemented!()
        }

        async fn update_user_assignee(
            &self,
            _uuid: Uuid,
            _user_id: i64,
            _actor: &User,
        ) -> Result<(), StoreError> {
            unimplemented!()
        }

        async fn active_conversation_count(&self, _user_id: i64) -> Result<usize, StoreError> {
            unimplemented!()
        }
    }

    fn status_equals_rule(value: &str, actions: usize) -> serde_json::Value {
        serde_json::json!({
            "groups": [{
                "logical_op": "AND",
                "conditions": [
                    {"source": "conversation", "field": "status", "operator": "equals", "value": value},
                ],
            }],
            "group_operator": "AND",
            "actions": (0..actions)
                .map(|_| serde_json::json!({"type": "set_priority", "value": ["4"]}))
                .collect::<Vec<_>>(),
        })
    }

    fn record(
        id: i64,
        rule_type: RuleType,
        events: Vec<ConversationEvent>,
        execution_mode: ExecutionMode,
        rules: serde_json::Value,
    ) -> RuleRecord {
        RuleRecord {
            id,
            name: format!("rule-{id}"),
            rule_type,
            events,
            execution_mode,
            enabled: true,
            rules,
        }
    }

    fn engine_with(
        records: Vec<RuleRecord>,
        store: Arc<CountingStore>,
    ) -> Arc<AutomationEngine> {
        Arc::new(AutomationEngine::new(
            AutomationConfig::default(),
            Arc::new(FixedRuleStore { records }),
            store,
            system_user(),
        ))
    }

    #[tokio::test]
    async fn reload_stamps_record_envelope_onto_sub_rules() {
        let records = vec![record(
            1,
            RuleType::Update,
            vec![ConversationEvent::MessageIncoming],
            ExecutionMode::All,
            serde_json::json!([
                status_equals_rule("1", 1),
                status_equals_rule("2", 1),
            ]),
        )];
        let engine = engine_with(records, Arc::new(CountingStore::new()));
        engine.reload_rules().await.unwrap();
        assert_eq!(engine.rule_count(), 2);
    }

    #[tokio::test]
    async fn reload_skips_malformed_rule_json() {
        let records = vec![
            record(
                1,
                RuleType::New,
                vec![],
                ExecutionMode::All,
                serde_json::json!({"not": "a list"}),
            ),
            record(
                2,
                RuleType::New,
                vec![],
                ExecutionMode::All,
                serde_json::json!([status_equals_rule("1", 1)]),
            ),
        ];
        let engine = engine_with(records, Arc::new(CountingStore::new()));
        engine.reload_rules().await.unwrap();
        assert_eq!(engine.rule_count(), 1);
    }

    #[tokio::test]
    async fn update_rules_filter_by_event() {
        let store = Arc::new(CountingStore::new());
        let records = vec![
            record(
                1,
                RuleType::Update,
                vec![ConversationEvent::MessageIncoming],
                ExecutionMode::All,
                serde_json::json!([status_equals_rule("1", 1)]),
            ),
            record(
                2,
                RuleType::Update,
                vec![ConversationEvent::PriorityChanged],
                ExecutionMode::All,
                serde_json::json!([status_equals_rule("1", 1)]),
            ),
        ];
        let engine = engine_with(records, Arc::clone(&store));
        engine.reload_rules().await.unwrap();

        engine
            .handle_update_conversation(conversation(1), ConversationEvent::MessageIncoming)
            .await;
        // Only the message_incoming rule applies its single action.
        assert_eq!(store.applied.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn first_match_stops_further_rules() {
        let store = Arc::new(CountingStore::new());
        let records = vec![record(
            1,
            RuleType::New,
            vec![],
            ExecutionMode::FirstMatch,
            serde_json::json!([
                status_equals_rule("1", 2),
                status_equals_rule("1", 5),
            ]),
        )];
        let engine = engine_with(records, Arc::clone(&store));
        engine.reload_rules().await.unwrap();

        engine.handle_new_conversation(conversation(1)).await;
        // Only the first matching rule's two actions run.
        assert_eq!(store.applied.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn all_mode_runs_every_matching_rule() {
        let store = Arc::new(CountingStore::new());
        let records = vec![record(
            1,
            RuleType::New,
            vec![],
            ExecutionMode::All,
            serde_json::json!([
                status_equals_rule("1", 1),
                status_equals_rule("2", 1),
                status_equals_rule("1", 1),
            ]),
        )];
        let engine = engine_with(records, Arc::clone(&store));
        engine.reload_rules().await.unwrap();

        engine.handle_new_conversation(conversation(1)).await;
        assert_eq!(store.applied.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn time_trigger_scans_recent_conversations() {
        let store = Arc::new(CountingStore::new());
        let records = vec![record(
            1,
            RuleType::TimeTrigger,
            vec![],
            ExecutionMode::All,
            serde_json::json!([status_equals_rule("1", 1)]),
        )];
        let engine = engine_with(records, Arc::clone(&store));
        engine.reload_rules().await.unwrap();

        engine.handle_time_trigger().await;
        assert_eq!(store.applied.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn full_queue_drops_task() {
        let engine = engine_with(vec![], Arc::new(CountingStore::new()));
        // No workers running, so the queue only fills.
        for _ in 0..MAX_QUEUE_SIZE {
            assert!(engine.enqueue_task(Task::TimeTrigger));
        }
        // Task 5001 is dropped, not queued and not an error.
        assert!(!engine.enqueue_task(Task::TimeTrigger));
    }

    #[tokio::test]
    async fn closed_engine_refuses_enqueue() {
        let engine = engine_with(vec![], Arc::new(CountingStore::new()));
        engine.close().await;
        assert!(!engine.enqueue_task(Task::TimeTrigger));
        // The public API swallows the refusal.
        engine.evaluate_new_conversation_rules(conversation(1));
    }

    #[tokio::test]
    async fn workers_drain_queue_before_close() {
        let store = Arc::new(CountingStore::new());
        let records = vec![record(
            1,
            RuleType::New,
            vec![],
            ExecutionMode::All,
            serde_json::json!([status_equals_rule("1", 1)]),
        )];
        let engine = engine_with(records, Arc::clone(&store));
        engine.reload_rules().await.unwrap();

        let token = CancellationToken::new();
        engine.start(&token);
        for _ in 0..5 {
            engine.evaluate_new_conversation_rules(conversation(1));
        }
        engine.close().await;
        assert_eq!(store.applied.load(Ordering::SeqCst), 5);
    }
}
