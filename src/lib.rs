//! deskflow — asynchronous conversation-processing core for a helpdesk platform.
//!
//! Three cooperating engines:
//! - [`dispatch::DispatchEngine`] moves messages in and out of the system,
//!   threads inbound email into conversations and guarantees at most one
//!   in-flight send per outgoing message.
//! - [`automation::AutomationEngine`] evaluates the enabled rule set against
//!   conversation events and applies matching actions.
//! - [`assigner::AutoAssigner`] keeps one round-robin pool per team and
//!   distributes unassigned conversations to available members.
//!
//! Persistence, HTTP, auth, wire-protocol parsing, templating internals and
//! media storage live behind the narrow traits in [`store`] and [`inbox`].

pub mod assigner;
pub mod automation;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod inbox;
pub mod models;
pub mod store;
pub mod textutil;
