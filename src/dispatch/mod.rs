//! Message dispatch engine.
//!
//! Moves messages between channels and conversation state: bounded
//! incoming/outgoing queues drained by worker pools, a periodic scanner for
//! pending outgoing messages with an at-most-once-in-flight guarantee, email
//! thread reconstruction, and the post-message hooks that feed automation,
//! SLA tracking and the AI hand-off queue.

pub mod compose;
pub mod engine;
pub mod incoming;
pub mod outgoing;

pub use compose::ConversationActivity;
pub use engine::{DispatchDeps, DispatchEngine};
