//! Dispatch engine lifecycle: queues, worker pools and the pending scanner.

use std::sync::{Arc, Mutex};

use dashmap::DashSet;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use uuid::Uuid;

use crate::automation::AutomationEngine;
use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::models::{IncomingMessage, Message, MessageStatus};
use crate::store::{
    Broadcaster, CompletionQueue, ConversationStore, InboxStore, MediaStore, MessageRenderer,
    MessageStore, SlaStore, TeamStore, UserStore, WebhookEvent, WebhookSink,
};

/// External collaborators the dispatch engine works through.
pub struct DispatchDeps {
    pub message_store: Arc<dyn MessageStore>,
    pub conversation_store: Arc<dyn ConversationStore>,
    pub user_store: Arc<dyn UserStore>,
    pub team_store: Arc<dyn TeamStore>,
    pub media_store: Arc<dyn MediaStore>,
    pub inbox_store: Arc<dyn InboxStore>,
    pub sla_store: Arc<dyn SlaStore>,
    pub webhooks: Arc<dyn WebhookSink>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub completions: Arc<dyn CompletionQueue>,
    pub renderer: Arc<dyn MessageRenderer>,
    pub automation: Arc<AutomationEngine>,
}

/// Moves messages between channels and conversation state.
pub struct DispatchEngine {
    pub(super) config: DispatchConfig,
    pub(super) deps: DispatchDeps,
    incoming_tx: Mutex<Option<mpsc::Sender<IncomingMessage>>>,
    outgoing_tx: Mutex<Option<mpsc::Sender<Message>>>,
    incoming_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<IncomingMessage>>>,
    outgoing_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Message>>>,
    /// Outgoing message ids currently held by a worker. The scanner skips
    /// these so a message is never queued twice.
    in_flight: DashSet<i64>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Mutex<Option<CancellationToken>>,
}

impl DispatchEngine {
    pub fn new(config: DispatchConfig, deps: DispatchDeps) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::channel(config.incoming_queue_size);
        let (outgoing_tx, outgoing_rx) = mpsc::channel(config.outgoing_queue_size);
        Self {
            config,
            deps,
            incoming_tx: Mutex::new(Some(incoming_tx)),
            outgoing_tx: Mutex::new(Some(outgoing_tx)),
            incoming_rx: Arc::new(tokio::sync::Mutex::new(incoming_rx)),
            outgoing_rx: Arc::new(tokio::sync::Mutex::new(outgoing_rx)),
            in_flight: DashSet::new(),
            handles: Mutex::new(Vec::new()),
            shutdown: Mutex::new(None),
        }
    }

    /// Spawn the incoming and outgoing worker pools plus the pending-message
    /// scanner.
    pub fn start(self: &Arc<Self>, parent: &CancellationToken) {
        let token = parent.child_token();
        let mut handles = Vec::new();

        for _ in 0..self.config.outgoing_workers {
            let engine = Arc::clone(self);
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                engine.outgoing_worker(token).await;
            }));
        }
        for _ in 0..self.config.incoming_workers {
            let engine = Arc::clone(self);
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                engine.incoming_worker(token).await;
            }));
        }
        {
            let engine = Arc::clone(self);
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                engine.scanner(token).await;
            }));
        }

        self.handles.lock().unwrap().extend(handles);
        *self.shutdown.lock().unwrap() = Some(token);
    }

    /// Stop accepting messages, drain both queues and wait for all workers.
    pub async fn close(&self) {
        self.incoming_tx.lock().unwrap().take();
        self.outgoing_tx.lock().unwrap().take();
        if let Some(token) = self.shutdown.lock().unwrap().take() {
            token.cancel();
        }
        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        futures::future::join_all(handles).await;
    }

    /// Enqueue an inbound message from a channel receiver. Never blocks:
    /// a saturated queue returns [`DispatchError::QueueFull`] and the
    /// producer owns its own retry/backoff.
    pub fn enqueue_incoming(&self, message: IncomingMessage) -> Result<(), DispatchError> {
        let sender = self
            .incoming_tx
            .lock()
            .unwrap()
            .as_ref()
            .cloned()
            .ok_or(DispatchError::Closed)?;
        match sender.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("incoming message queue is full");
                Err(DispatchError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DispatchError::Closed),
        }
    }

    /// Flip a message back to `Pending` so the scanner picks it up again.
    /// This is the explicit operator retry for failed sends.
    pub async fn mark_message_as_pending(&self, uuid: Uuid) -> Result<(), DispatchError> {
        self.update_message_status(uuid, MessageStatus::Pending)
            .await
    }

    /// Update a message's status, broadcast the property change and raise
    /// the message-updated webhook event.
    pub(super) async fn update_message_status(
        &self,
        uuid: Uuid,
        status: MessageStatus,
    ) -> Result<(), DispatchError> {
        self.deps
            .message_store
            .update_message_status(uuid, status)
            .await?;

        match self
            .deps
            .message_store
            .conversation_uuid_for_message(uuid)
            .await
        {
            Ok(conversation_uuid) => {
                self.deps.broadcaster.message_property_update(
                    conversation_uuid,
                    uuid,
                    "status",
                    status.as_str(),
                );
            }
            Err(e) => {
                error!(message_uuid = %uuid, error = %e, "error fetching conversation uuid for status broadcast");
            }
        }

        match self.deps.message_store.get_message(uuid).await {
            Ok(message) => match serde_json::to_value(&message) {
                Ok(payload) => self
                    .deps
                    .webhooks
                    .trigger(WebhookEvent::MessageUpdated, payload),
                Err(e) => error!(message_uuid = %uuid, error = %e, "error serializing message for webhook"),
            },
            Err(e) => {
                error!(message_uuid = %uuid, error = %e, "error fetching message for webhook event");
            }
        }
        Ok(())
    }

    /// Ids currently held by outgoing workers. Exposed for the scanner and
    /// for tests asserting the at-most-once-in-flight property.
    pub fn in_flight_ids(&self) -> Vec<i64> {
        self.in_flight.iter().map(|id| *id).collect()
    }

    async fn incoming_worker(&self, token: CancellationToken) {
        loop {
            let message = {
                let mut receiver = self.incoming_rx.lock().await;
                tokio::select! {
                    biased;
                    message = receiver.recv() => message,
                    _ = token.cancelled() => return,
                }
            };
            match message {
                Some(message) => {
                    if let Err(e) = self.process_incoming(message).await {
                        error!(error = %e, "error processing incoming message");
                    }
                }
                None => return,
            }
        }
    }

    async fn outgoing_worker(&self, token: CancellationToken) {
        loop {
            let message = {
                let mut receiver = self.outgoing_rx.lock().await;
                tokio::select! {
                    biased;
                    message = receiver.recv() => message,
                    _ = token.cancelled() => return,
                }
            };
            match message {
                Some(message) => {
                    let id = message.id;
                    self.send_outgoing(message).await;
                    // Whether the send succeeded or failed, the message is
                    // no longer in flight.
                    self.in_flight.remove(&id);
                }
                None => return,
            }
        }
    }

    /// Periodically queue pending outgoing messages, skipping ids already
    /// held by a worker. The id is recorded in flight before the hand-off.
    async fn scanner(&self, token: CancellationToken) {
        let period = self.config.scan_interval;
        let start = tokio::time::Instant::now() + period;
        let mut ticker = tokio::time::interval_at(start, period);
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let exclude = self.in_flight_ids();
            let pending = match self.deps.message_store.pending_outgoing(&exclude).await {
                Ok(pending) => pending,
                Err(e) => {
                    error!(error = %e, "error fetching pending outgoing messages");
                    continue;
                }
            };

            let sender = match self.outgoing_tx.lock().unwrap().as_ref().cloned() {
                Some(sender) => sender,
                None => return,
            };
            for message in pending {
                let id = message.id;
                self.in_flight.insert(id);
                if sender.send(message).await.is_err() {
                    self.in_flight.remove(&id);
                    return;
                }
            }
        }
    }
}
