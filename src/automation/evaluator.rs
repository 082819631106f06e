//! Condition evaluation for automation rules.
//!
//! Evaluation is pure: it reads a conversation snapshot and produces a
//! boolean per rule. Applying actions is the engine's job.

use chrono::Utc;
use tracing::{debug, error, warn};

use crate::models::Conversation;

use super::rule::{
    Condition, ConditionGroup, ConditionOperator, ConditionSubject, ConversationField, LogicalOp,
    MAX_GROUPS, Rule,
};

/// Whether a rule's condition groups match the conversation.
///
/// A rule with more than [`MAX_GROUPS`] groups is skipped with a warning,
/// and a rule with no non-empty group never fires.
pub fn rule_matches(rule: &Rule, conversation: &Conversation) -> bool {
    if rule.groups.len() > MAX_GROUPS {
        warn!(
            groups = rule.groups.len(),
            conversation_uuid = %conversation.uuid,
            "rule has more than {MAX_GROUPS} condition groups, skipping evaluation"
        );
        return false;
    }

    let mut group_results = Vec::with_capacity(rule.groups.len());
    for (idx, group) in rule.groups.iter().enumerate() {
        if group.conditions.is_empty() {
            debug!(
                group = idx + 1,
                conversation_uuid = %conversation.uuid,
                "empty condition group, skipping"
            );
            continue;
        }
        group_results.push(evaluate_group(group, conversation));
    }

    if group_results.is_empty() {
        return false;
    }

    match rule.group_operator {
        LogicalOp::And => group_results.iter().all(|r| *r),
        LogicalOp::Or => group_results.iter().any(|r| *r),
    }
}

/// Evaluate the conditions of one group under its logical operator,
/// short-circuiting.
fn evaluate_group(group: &ConditionGroup, conversation: &Conversation) -> bool {
    match group.logical_op {
        LogicalOp::And => group
            .conditions
            .iter()
            .all(|c| evaluate_condition(c, conversation)),
        LogicalOp::Or => group
            .conditions
            .iter()
            .any(|c| evaluate_condition(c, conversation)),
    }
}

/// Evaluate a single condition against the conversation.
pub fn evaluate_condition(condition: &Condition, conversation: &Conversation) -> bool {
    let Some(field_value) = extract_value(&condition.subject, conversation) else {
        return false;
    };

    let (field_value, rule_value) = if condition.case_sensitive {
        (field_value, condition.value.clone())
    } else {
        (field_value.to_lowercase(), condition.value.to_lowercase())
    };

    match condition.operator {
        ConditionOperator::Equals => field_value == rule_value,
        ConditionOperator::NotEqual => field_value != rule_value,
        ConditionOperator::Contains => contains_any(&field_value, &rule_value),
        ConditionOperator::NotContains => !contains_any(&field_value, &rule_value),
        ConditionOperator::Set => !field_value.is_empty(),
        ConditionOperator::NotSet => field_value.is_empty(),
        ConditionOperator::GreaterThan => parse_int(&field_value) > parse_int(&rule_value),
        ConditionOperator::LessThan => parse_int(&field_value) < parse_int(&rule_value),
    }
}

/// `contains` semantics: the rule value is a comma-separated token list;
/// each token and the field value are whitespace-normalized before the
/// substring check. The field value is never split.
fn contains_any(field_value: &str, rule_value: &str) -> bool {
    let normalized_field = normalize_whitespace(field_value);
    rule_value
        .split(',')
        .map(|token| normalize_whitespace(token.trim()))
        .any(|token| normalized_field.contains(&token))
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Numeric comparisons treat non-numbers as 0.
fn parse_int(s: &str) -> i64 {
    s.parse().unwrap_or(0)
}

/// Extract the condition's left-hand value from the conversation.
///
/// Built-in fields always yield a value (empty string when unset); `None`
/// means the condition cannot be evaluated at all (missing custom attribute
/// key or a malformed attribute map) and counts as not met.
fn extract_value(subject: &ConditionSubject, conversation: &Conversation) -> Option<String> {
    match subject {
        ConditionSubject::Conversation { field } => {
            Some(extract_conversation_field(*field, conversation))
        }
        ConditionSubject::ContactCustomAttribute { field } => {
            let Some(attributes) = conversation.contact.custom_attributes.as_object() else {
                error!(
                    conversation_uuid = %conversation.uuid,
                    "contact custom attributes are not a JSON object"
                );
                return None;
            };
            let Some(value) = attributes.get(field) else {
                warn!(
                    field = %field,
                    conversation_uuid = %conversation.uuid,
                    "field not found in contact custom attributes"
                );
                return None;
            };
            Some(coerce_attribute(value))
        }
    }
}

fn extract_conversation_field(field: ConversationField, conversation: &Conversation) -> String {
    match field {
        ConversationField::ContactEmail => conversation.contact.email.clone().unwrap_or_default(),
        ConversationField::Subject => conversation.subject.clone().unwrap_or_default(),
        ConversationField::Content => conversation.last_message.clone().unwrap_or_default(),
        ConversationField::Status => id_string(conversation.status_id),
        ConversationField::Priority => id_string(conversation.priority_id),
        ConversationField::AssignedTeam => id_string(conversation.assigned_team_id),
        ConversationField::AssignedUser => id_string(conversation.assigned_user_id),
        ConversationField::Inbox => conversation.inbox_id.to_string(),
        ConversationField::HoursSinceCreated => hours_since(Some(conversation.created_at)),
        ConversationField::HoursSinceFirstReply => hours_since(conversation.first_reply_at),
        ConversationField::HoursSinceLastReply => hours_since(conversation.last_reply_at),
        ConversationField::HoursSinceResolved => hours_since(conversation.resolved_at),
    }
}

fn id_string(id: Option<i64>) -> String {
    id.map(|v| v.to_string()).unwrap_or_default()
}

/// Whole hours elapsed since the timestamp, rounded; empty when unset.
fn hours_since(at: Option<chrono::DateTime<Utc>>) -> String {
    match at {
        Some(t) => {
            let hours = (Utc::now() - t).num_seconds() as f64 / 3600.0;
            format!("{hours:.0}")
        }
        None => String::new(),
    }
}

/// Coerce a custom-attribute JSON value to a comparison string. Fractional
/// numbers are truncated to their integer part.
fn coerce_attribute(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else {
                (n.as_f64().unwrap_or(0.0) as i64).to_string()
            }
        }
        serde_json::Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}
