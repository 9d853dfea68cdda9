//! Lifecycle conditions reported on a managed object's status.
//!
//! An object carries at most one condition per [`ConditionType`]. Setting a
//! condition overwrites the slot; the transition time only moves when the
//! status or reason actually changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The dimension a condition describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// Whether the external resource is usable.
    Ready,
    /// Whether the last reconcile pass succeeded.
    Synced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Machine-readable reason attached to a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reason {
    Available,
    Creating,
    Deleting,
    ReconcileSuccess,
    ConfigError,
    DialError,
    ExecutionError,
    TypeMismatch,
    StoreError,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::Available => "Available",
            Reason::Creating => "Creating",
            Reason::Deleting => "Deleting",
            Reason::ReconcileSuccess => "ReconcileSuccess",
            Reason::ConfigError => "ConfigError",
            Reason::DialError => "DialError",
            Reason::ExecutionError => "ExecutionError",
            Reason::TypeMismatch => "TypeMismatch",
            Reason::StoreError => "StoreError",
        }
    }

    /// True for reasons that report a failed reconcile.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Reason::ConfigError
                | Reason::DialError
                | Reason::ExecutionError
                | Reason::TypeMismatch
                | Reason::StoreError
        )
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: ConditionType,
    pub status: ConditionStatus,
    pub reason: Reason,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    fn new(kind: ConditionType, status: ConditionStatus, reason: Reason) -> Self {
        Self {
            kind,
            status,
            reason,
            message: String::new(),
            last_transition_time: Utc::now(),
        }
    }

    /// The external resource is ready for use.
    pub fn available() -> Self {
        Self::new(ConditionType::Ready, ConditionStatus::True, Reason::Available)
    }

    /// The external resource is being created.
    pub fn creating() -> Self {
        Self::new(ConditionType::Ready, ConditionStatus::False, Reason::Creating)
    }

    /// The external resource is being deleted.
    pub fn deleting() -> Self {
        Self::new(ConditionType::Ready, ConditionStatus::False, Reason::Deleting)
    }

    pub fn reconcile_success() -> Self {
        Self::new(
            ConditionType::Synced,
            ConditionStatus::True,
            Reason::ReconcileSuccess,
        )
    }

    pub fn reconcile_error(reason: Reason, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::new(ConditionType::Synced, ConditionStatus::False, reason)
        }
    }

    /// True when both conditions describe the same state, ignoring time.
    pub fn equivalent(&self, other: &Condition) -> bool {
        self.kind == other.kind
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Set `condition` in `conditions`, replacing any existing condition of the
/// same type. Returns true if the status or reason changed.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.kind == condition.kind) {
        Some(existing) => {
            if existing.equivalent(&condition) {
                return false;
            }
            let transitioned =
                existing.status != condition.status || existing.reason != condition.reason;
            let last_transition_time = if transitioned {
                condition.last_transition_time
            } else {
                existing.last_transition_time
            };
            *existing = Condition {
                last_transition_time,
                ..condition
            };
            transitioned
        }
        None => {
            conditions.push(condition);
            true
        }
    }
}

pub fn get_condition(conditions: &[Condition], kind: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.kind == kind)
}
