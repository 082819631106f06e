//! User domain types.

use serde::{Deserialize, Serialize};

/// What kind of user an account is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserKind {
    Agent,
    Contact,
    /// The internal actor automated changes are attributed to.
    System,
    /// An agent account backed by an AI assistant.
    AiAssistant,
}

/// Agent availability, as set manually or by presence tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityStatus {
    Online,
    Away,
    AwayManual,
    AwayAndReassigning,
}

impl AvailabilityStatus {
    /// Away statuses that exclude an agent from auto-assignment pools.
    pub fn excluded_from_assignment(self) -> bool {
        matches!(
            self,
            AvailabilityStatus::AwayManual | AvailabilityStatus::AwayAndReassigning
        )
    }
}

/// A user account (agent, contact, AI assistant or the system actor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub kind: UserKind,
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub enabled: bool,
    pub availability_status: AvailabilityStatus,
}

impl User {
    pub fn is_system(&self) -> bool {
        self.kind == UserKind::System
    }

    pub fn is_ai_assistant(&self) -> bool {
        self.kind == UserKind::AiAssistant
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn away_statuses_excluded_from_assignment() {
        assert!(AvailabilityStatus::AwayManual.excluded_from_assignment());
        assert!(AvailabilityStatus::AwayAndReassigning.excluded_from_assignment());
        assert!(!AvailabilityStatus::Online.excluded_from_assignment());
        // Plain `away` (auto-detected idle) still receives assignments.
        assert!(!AvailabilityStatus::Away.excluded_from_assignment());
    }
}
