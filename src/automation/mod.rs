//! Automation rule engine.
//!
//! Holds an in-memory snapshot of the enabled rules and evaluates it against
//! conversation events delivered through a bounded task queue, without ever
//! blocking the caller that raised the event.

pub mod engine;
pub mod evaluator;
pub mod rule;

pub use engine::{AutomationEngine, MAX_QUEUE_SIZE};
pub use rule::{ConversationEvent, ExecutionMode, Rule, RuleRecord, RuleType};
