//! Status conditions
//!
//! A small re-implementation of `metav1.Condition` with chrono timestamps,
//! plus the set/find helpers the controller uses to maintain `Ready`.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type reported by the controller
pub const READY_CONDITION: &str = "Ready";

/// Reason used when a pass completed without errors
pub const REASON_SUCCESS: &str = "Success";

/// Reason used for every failed pass except a missing target
pub const REASON_ERROR: &str = "Error";

/// Reason used when the target object does not exist
pub const REASON_NOT_FOUND: &str = "NotFound";

/// Status of a condition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Not yet determined
    #[default]
    Unknown,
}

/// Observability condition stored in `status.conditions`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (e.g., "Ready")
    #[serde(rename = "type")]
    pub type_: String,

    /// Condition status
    pub status: ConditionStatus,

    /// CamelCase machine readable reason
    #[serde(default)]
    pub reason: String,

    /// Human readable message
    #[serde(default)]
    pub message: String,

    /// Generation of the resource the condition was computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last time `status` changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// `Ready=True` after a clean pass
    pub fn ready(observed_generation: Option<i64>) -> Self {
        Self {
            type_: READY_CONDITION.to_string(),
            status: ConditionStatus::True,
            reason: REASON_SUCCESS.to_string(),
            message: REASON_SUCCESS.to_string(),
            observed_generation,
            last_transition_time: None,
        }
    }

    /// `Ready=False` carrying the failure
    pub fn not_ready(observed_generation: Option<i64>, reason: &str, message: impl Into<String>) -> Self {
        Self {
            type_: READY_CONDITION.to_string(),
            status: ConditionStatus::False,
            reason: reason.to_string(),
            message: message.into(),
            observed_generation,
            last_transition_time: None,
        }
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Insert or replace the condition with the same type.
///
/// `lastTransitionTime` only moves when the status flips, so re-setting an
/// identical condition leaves the list byte-for-byte unchanged.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition, now: DateTime<Utc>) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            condition.last_transition_time = if existing.status == condition.status {
                existing.last_transition_time.or(Some(now))
            } else {
                Some(now)
            };
            *existing = condition;
        }
        None => {
            condition.last_transition_time = Some(now);
            conditions.push(condition);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_set_condition_inserts_with_timestamp() {
        let now = Utc::now();
        let mut conditions = Vec::new();
        set_condition(&mut conditions, Condition::ready(Some(1)), now);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, Some(now));
    }

    #[test]
    fn test_transition_time_only_moves_on_status_change() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(30);
        let t2 = t1 + Duration::seconds(30);
        let mut conditions = Vec::new();

        set_condition(&mut conditions, Condition::not_ready(Some(1), REASON_ERROR, "boom"), t0);
        set_condition(&mut conditions, Condition::not_ready(Some(1), REASON_ERROR, "still boom"), t1);
        let ready = find_condition(&conditions, READY_CONDITION).unwrap();
        assert_eq!(ready.message, "still boom");
        assert_eq!(ready.last_transition_time, Some(t0));

        set_condition(&mut conditions, Condition::ready(Some(2)), t2);
        let ready = find_condition(&conditions, READY_CONDITION).unwrap();
        assert_eq!(ready.status, ConditionStatus::True);
        assert_eq!(ready.last_transition_time, Some(t2));
        assert_eq!(conditions.len(), 1);
    }

    #[test]
    fn test_status_serializes_pascal_case() {
        let json = serde_json::to_value(Condition::ready(None)).unwrap();
        assert_eq!(json["type"], "Ready");
        assert_eq!(json["status"], "True");
    }
}
