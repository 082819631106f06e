//! Error types for deskflow.

use uuid::Uuid;

/// Top-level error type for the engine crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Automation error: {0}")]
    Automation(#[from] AutomationError),

    #[error("Assignment error: {0}")]
    Assigner(#[from] AssignerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Inbox error: {0}")]
    Inbox(#[from] InboxError),
}

/// Storage-layer errors surfaced through the store traits.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Shorthand for a not-found error on a numeric id.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Message dispatch errors.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("incoming message queue is closed")]
    Closed,

    #[error("incoming message queue is full")]
    QueueFull,

    #[error("inbox {inbox_id} is disabled")]
    InboxDisabled { inbox_id: i64 },

    #[error("reply has no `to` recipients")]
    EmptyRecipients,

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Inbox error: {0}")]
    Inbox(#[from] InboxError),
}

/// Automation engine errors.
#[derive(Debug, thiserror::Error)]
pub enum AutomationError {
    #[error("invalid rule record {record_id}: {reason}")]
    InvalidRule { record_id: i64, reason: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Auto-assigner errors.
#[derive(Debug, thiserror::Error)]
pub enum AssignerError {
    #[error("no assignment pool for team {team_id}")]
    TeamPoolNotFound { team_id: i64 },

    #[error("assignment pool for team {team_id} is empty")]
    EmptyPool { team_id: i64 },

    #[error("id {id} is already in the pool")]
    DuplicatePoolId { id: i64 },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Channel (inbox) errors.
#[derive(Debug, thiserror::Error)]
pub enum InboxError {
    #[error("inbox {id} not found")]
    NotFound { id: i64 },

    #[error("failed to send message {message_uuid} via inbox {inbox_id}: {reason}")]
    SendFailed {
        inbox_id: i64,
        message_uuid: Uuid,
        reason: String,
    },

    #[error("inbox {inbox_id} receive failed: {reason}")]
    ReceiveFailed { inbox_id: i64, reason: String },
}

/// Template rendering errors (the renderer itself is an external seam).
#[derive(Debug, thiserror::Error)]
#[error("template rendering failed: {0}")]
pub struct RenderError(pub String);

/// SLA store errors. The two sentinel variants are expected outcomes the
/// dispatch engine matches on, not failures.
#[derive(Debug, thiserror::Error)]
pub enum SlaError {
    #[error("an unmet SLA event already exists for this applied SLA and metric")]
    UnmetEventAlreadyExists,

    #[error("no SLA event found for this applied SLA and metric")]
    LatestEventNotFound,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type alias for the engine crate.
pub type Result<T> = std::result::Result<T, Error>;
