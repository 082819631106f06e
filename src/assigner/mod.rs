//! Conversation auto-assigner.
//!
//! Rebuilds one round-robin pool per team from current membership each
//! cycle and assigns team-routed but user-unassigned conversations to
//! members, honoring per-team capacity limits.

pub mod balancer;
pub mod engine;

pub use balancer::RoundRobinPool;
pub use engine::AutoAssigner;
