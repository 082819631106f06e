//! Team domain types.

use serde::{Deserialize, Serialize};

use super::user::AvailabilityStatus;

/// How a team distributes unassigned conversations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentType {
    RoundRobin,
    Manual,
}

/// A team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: i64,
    pub name: String,
    pub assignment_type: AssignmentType,
    /// Per-member cap on auto-assigned active conversations. 0 = unlimited.
    pub max_auto_assigned_conversations: usize,
}

/// A team member, as returned by the team store for pool rebuilds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMember {
    pub user_id: i64,
    pub availability_status: AvailabilityStatus,
}
