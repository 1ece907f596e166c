//! Observed status and convergence conditions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// Condition type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionType {
    /// The external artifact exists and is usable
    Ready,
    /// The external configuration matches the desired configuration
    Synced,
}

/// Machine-readable reason attached to a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionReason {
    Available,
    Unavailable,
    Creating,
    Deleting,
    ReconcileSuccess,
    ReconcileError,
    /// A transient failure happened; the status value is the last confirmed one
    ReconcilePending,
}

impl fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionReason::Available => "Available",
            ConditionReason::Unavailable => "Unavailable",
            ConditionReason::Creating => "Creating",
            ConditionReason::Deleting => "Deleting",
            ConditionReason::ReconcileSuccess => "ReconcileSuccess",
            ConditionReason::ReconcileError => "ReconcileError",
            ConditionReason::ReconcilePending => "ReconcilePending",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: bool,
    pub reason: ConditionReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_transition_time: OffsetDateTime,
}

/// Secret bytes; never printed
#[derive(Clone, PartialEq, Eq, Default)]
pub struct SecretBytes(pub Vec<u8>);

impl SecretBytes {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for SecretBytes {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl From<String> for SecretBytes {
    fn from(value: String) -> Self {
        Self(value.into_bytes())
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes(<{} bytes>)", self.0.len())
    }
}

/// Connection details produced when an external artifact is created
pub type ConnectionDetails = BTreeMap<String, SecretBytes>;

/// Last-known state of the external artifact plus convergence conditions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedStatus {
    #[serde(default)]
    pub external_exists: bool,

    /// Empty until the first successful Create
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub external_identity: String,

    /// Configuration as last read from the target system
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_configuration: Option<Value>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub observed_generation: u64,

    /// Consecutive transient failures since the last successful pass
    #[serde(default)]
    pub consecutive_failures: u32,

    /// Details last handed to the connection publisher; held in memory only
    #[serde(skip)]
    pub connection_details: ConnectionDetails,
}

impl ObservedStatus {
    pub fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    pub fn is_ready(&self) -> bool {
        self.condition(ConditionType::Ready).is_some_and(|c| c.status)
    }

    pub fn is_synced(&self) -> bool {
        self.condition(ConditionType::Synced).is_some_and(|c| c.status)
    }

    /// Ready and Synced both true
    pub fn is_converged(&self) -> bool {
        self.is_ready() && self.is_synced()
    }

    /// Set a condition. The transition time only moves when the boolean value flips.
    pub fn set_condition(
        &mut self,
        condition_type: ConditionType,
        status: bool,
        reason: ConditionReason,
        message: Option<String>,
    ) {
        let now = OffsetDateTime::now_utc();
        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition_type)
        {
            Some(existing) => {
                if existing.status != status {
                    existing.last_transition_time = now;
                }
                existing.status = status;
                existing.reason = reason;
                existing.message = message;
            }
            None => self.conditions.push(Condition {
                condition_type,
                status,
                reason,
                message,
                last_transition_time: now,
            }),
        }
    }

    /// Keep the last confirmed value of a condition but flag it as pending with a cause
    pub fn mark_pending(&mut self, condition_type: ConditionType, message: impl Into<String>) {
        let status = self.condition(condition_type).is_some_and(|c| c.status);
        self.set_condition(
            condition_type,
            status,
            ConditionReason::ReconcilePending,
            Some(message.into()),
        );
    }

    pub fn set_available(&mut self) {
        self.set_condition(ConditionType::Ready, true, ConditionReason::Available, None);
    }

    pub fn set_unavailable(&mut self, reason: ConditionReason, message: impl Into<String>) {
        self.set_condition(ConditionType::Ready, false, reason, Some(message.into()));
    }

    pub fn set_synced(&mut self) {
        self.set_condition(
            ConditionType::Synced,
            true,
            ConditionReason::ReconcileSuccess,
            None,
        );
    }

    pub fn set_sync_error(&mut self, message: impl Into<String>) {
        self.set_condition(
            ConditionType::Synced,
            false,
            ConditionReason::ReconcileError,
            Some(message.into()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conditions_default_to_false() {
        let status = ObservedStatus::default();
        assert!(!status.is_ready());
        assert!(!status.is_synced());
        assert!(!status.is_converged());
    }

    #[test]
    fn test_set_condition_updates_in_place() {
        let mut status = ObservedStatus::default();
        status.set_available();
        status.set_synced();
        assert!(status.is_converged());
        assert_eq!(status.conditions.len(), 2);

        status.set_sync_error("boom");
        assert_eq!(status.conditions.len(), 2);
        let synced = status.condition(ConditionType::Synced).unwrap();
        assert!(!synced.status);
        assert_eq!(synced.reason, ConditionReason::ReconcileError);
        assert_eq!(synced.message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_transition_time_only_moves_on_flip() {
        let mut status = ObservedStatus::default();
        status.set_available();
        let first = status.condition(ConditionType::Ready).unwrap().last_transition_time;

        status.set_condition(ConditionType::Ready, true, ConditionReason::Available, None);
        let second = status.condition(ConditionType::Ready).unwrap().last_transition_time;
        assert_eq!(first, second);
    }

    #[test]
    fn test_mark_pending_keeps_value() {
        let mut status = ObservedStatus::default();
        status.set_available();
        status.mark_pending(ConditionType::Ready, "connection reset");

        let ready = status.condition(ConditionType::Ready).unwrap();
        assert!(ready.status);
        assert_eq!(ready.reason, ConditionReason::ReconcilePending);

        status.mark_pending(ConditionType::Synced, "connection reset");
        assert!(!status.is_synced());
    }

    #[test]
    fn test_secret_bytes_are_redacted() {
        let secret = SecretBytes::from("hunter2");
        assert_eq!(format!("{secret:?}"), "SecretBytes(<7 bytes>)");
    }

    #[test]
    fn test_connection_details_not_serialized() {
        let mut status = ObservedStatus::default();
        status
            .connection_details
            .insert("token".into(), SecretBytes::from("t"));
        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("connectionDetails").is_none());
    }
}
