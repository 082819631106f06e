//! Automation rule model.
//!
//! Rules are stored as records whose `rules` JSON field holds a list of
//! sub-rules. On reload the engine parses each record's list and stamps
//! every sub-rule with the parent record's type, events and execution mode;
//! the stamped [`Rule`]s form the in-memory snapshot.

use serde::{Deserialize, Serialize};

/// Maximum number of condition groups a rule may carry. More are skipped at
/// evaluation time, matching the stored-rule contract.
pub const MAX_GROUPS: usize = 2;

/// When a rule set is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleType {
    /// Evaluated once when a conversation is created.
    New,
    /// Evaluated on conversation update events.
    Update,
    /// Evaluated on the periodic time trigger.
    TimeTrigger,
}

/// Conversation events update rules subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationEvent {
    MessageIncoming,
    MessageOutgoing,
    StatusChanged,
    PriorityChanged,
    UserAssigned,
    TeamAssigned,
}

impl ConversationEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversationEvent::MessageIncoming => "message_incoming",
            ConversationEvent::MessageOutgoing => "message_outgoing",
            ConversationEvent::StatusChanged => "status_changed",
            ConversationEvent::PriorityChanged => "priority_changed",
            ConversationEvent::UserAssigned => "user_assigned",
            ConversationEvent::TeamAssigned => "team_assigned",
        }
    }
}

/// Whether a matched rule stops further rule evaluation for the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    FirstMatch,
    All,
}

/// AND/OR combinator, used both within a group and across groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOp {
    And,
    Or,
}

/// Built-in conversation fields a condition can inspect. Id-valued fields
/// compare as numeric strings; the hours-since fields compare as whole hours
/// elapsed at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationField {
    ContactEmail,
    Subject,
    Content,
    Status,
    Priority,
    AssignedTeam,
    AssignedUser,
    Inbox,
    HoursSinceCreated,
    HoursSinceFirstReply,
    HoursSinceLastReply,
    HoursSinceResolved,
}

/// Where a condition's left-hand value comes from. The variant is chosen at
/// deserialization from the condition's `source` tag, so evaluation never
/// re-interprets field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ConditionSubject {
    /// A built-in conversation field.
    Conversation { field: ConversationField },
    /// A key in the contact's custom attribute map.
    ContactCustomAttribute { field: String },
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEqual,
    Contains,
    NotContains,
    Set,
    NotSet,
    GreaterThan,
    LessThan,
}

/// A single rule condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(flatten)]
    pub subject: ConditionSubject,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub case_sensitive: bool,
}

/// A group of conditions combined with one logical operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionGroup {
    pub logical_op: LogicalOp,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// An action applied when a rule matches. Interpretation is owned by the
/// conversation store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub value: Vec<String>,
}

/// What a rule action does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    AssignTeam,
    AssignUser,
    SetStatus,
    SetPriority,
    SetSla,
    AddTags,
    RemoveTags,
    SendReply,
    SendPrivateNote,
}

/// The deserialized shape of one sub-rule inside a record's `rules` list.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleDefinition {
    #[serde(default)]
    pub groups: Vec<ConditionGroup>,
    pub group_operator: LogicalOp,
    #[serde(default)]
    pub actions: Vec<RuleAction>,
}

/// A stored automation rule record. The `rules` JSON carries the sub-rule
/// list; type/events/execution mode apply to every sub-rule in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleRecord {
    pub id: i64,
    pub name: String,
    pub rule_type: RuleType,
    #[serde(default)]
    pub events: Vec<ConversationEvent>,
    pub execution_mode: ExecutionMode,
    pub enabled: bool,
    pub rules: serde_json::Value,
}

/// A sub-rule stamped with its parent record's envelope; the unit the
/// evaluator works on.
#[derive(Debug, Clone)]
pub struct Rule {
    pub rule_type: RuleType,
    pub events: Vec<ConversationEvent>,
    pub execution_mode: ExecutionMode,
    pub groups: Vec<ConditionGroup>,
    pub group_operator: LogicalOp,
    pub actions: Vec<RuleAction>,
}

impl Rule {
    /// Stamp a parsed sub-rule with its record's envelope.
    pub fn from_definition(definition: RuleDefinition, record: &RuleRecord) -> Self {
        Self {
            rule_type: record.rule_type,
            events: record.events.clone(),
            execution_mode: record.execution_mode,
            groups: definition.groups,
            group_operator: definition.group_operator,
            actions: definition.actions,
        }
    }

    pub fn subscribed_to(&self, event: ConversationEvent) -> bool {
        self.events.contains(&event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_deserializes_conversation_field_variant() {
        let condition: Condition = serde_json::from_value(serde_json::json!({
            "source": "conversation",
            "field": "subject",
            "operator": "contains",
            "value": "refund",
        }))
        .unwrap();

        assert_eq!(
            condition.subject,
            ConditionSubject::Conversation {
                field: ConversationField::Subject
            }
        );
        assert_eq!(condition.operator, ConditionOperator::Contains);
        assert!(!condition.case_sensitive);
    }

    #[test]
    fn condition_deserializes_custom_attribute_variant() {
        let condition: Condition = serde_json::from_value(serde_json::json!({
            "source": "contact_custom_attribute",
            "field": "plan",
            "operator": "equals",
            "value": "enterprise",
            "case_sensitive": true,
        }))
        .unwrap();

        assert_eq!(
            condition.subject,
            ConditionSubject::ContactCustomAttribute {
                field: "plan".into()
            }
        );
        assert!(condition.case_sensitive);
    }

    #[test]
    fn condition_rejects_unknown_conversation_field() {
        let result: Result<Condition, _> = serde_json::from_value(serde_json::json!({
            "source": "conversation",
            "field": "no_such_field",
            "operator": "equals",
            "value": "x",
        }));
        assert!(result.is_err());
    }

    #[test]
    fn rule_definition_parses_full_shape() {
        let definition: RuleDefinition = serde_json::from_value(serde_json::json!({
            "groups": [
                {
                    "logical_op": "OR",
                    "conditions": [
                        {"source": "conversation", "field": "status", "operator": "equals", "value": "1"},
                        {"source": "conversation", "field": "priority", "operator": "equals", "value": "3"},
                    ],
                },
                {
                    "logical_op": "AND",
                    "conditions": [
                        {"source": "conversation", "field": "subject", "operator": "contains", "value": "refund"},
                    ],
                },
            ],
            "group_operator": "AND",
            "actions": [
                {"type": "set_priority", "value": ["4"]},
            ],
        }))
        .unwrap();

        assert_eq!(definition.groups.len(), 2);
        assert_eq!(definition.groups[0].logical_op, LogicalOp::Or);
        assert_eq!(definition.group_operator, LogicalOp::And);
        assert_eq!(definition.actions[0].action_type, ActionType::SetPriority);
    }

    #[test]
    fn stamping_copies_record_envelope() {
        let record = RuleRecord {
            id: 9,
            name: "close stale".into(),
            rule_type: RuleType::Update,
            events: vec![ConversationEvent::MessageIncoming],
            execution_mode: ExecutionMode::FirstMatch,
            enabled: true,
            rules: serde_json::json!([]),
        };
        let definition = RuleDefinition {
            groups: vec![],
            group_operator: LogicalOp::Or,
            actions: vec![],
        };

        let rule = Rule::from_definition(definition, &record);
        assert_eq!(rule.rule_type, RuleType::Update);
        assert_eq!(rule.execution_mode, ExecutionMode::FirstMatch);
        assert!(rule.subscribed_to(ConversationEvent::MessageIncoming));
        assert!(!rule.subscribed_to(ConversationEvent::MessageOutgoing));
    }
}
