//! Versioned per-actor state record.
//!
//! Everything an actor needs to resume lives here: its registration instant,
//! its periodic variables (each with its own `last_seen_ts`), and the small
//! amount of memo state behavior policies keep between windows. The record
//! round-trips through the persistence collaborator as an opaque serde value;
//! the scheduler never depends on storage key names.

use crate::core::time::Timestamp;
use crate::models::event::CatalogType;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Current layout version of [`ProfileState`].
pub const PROFILE_STATE_VERSION: u32 = 1;

#[derive(Debug, Error, PartialEq)]
pub enum ProfileStateError {
    #[error("Unsupported profile state version {found} (max supported {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
}

// ============================================================================
// Periodic variable records
// ============================================================================

/// Value of a periodic variable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Integer(i64),
    Float(f64),
}

impl VariableValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            VariableValue::Integer(v) => *v as f64,
            VariableValue::Float(v) => *v,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            VariableValue::Integer(v) => *v,
            VariableValue::Float(v) => v.round() as i64,
        }
    }
}

/// A variable's value plus the instant its last increment was applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableRecord {
    pub value: VariableValue,
    pub last_seen_ts: Timestamp,
}

/// Get/set port between variable managers and whatever stores the variables.
pub trait VariableStore {
    fn variable(&self, name: &str) -> Option<&VariableRecord>;
    fn set_variable(&mut self, name: &str, record: VariableRecord);
}

/// Named variables, ordered by name for stable serialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableSet(BTreeMap<String, VariableRecord>);

impl VariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VariableRecord)> {
        self.0.iter()
    }

    pub fn value(&self, name: &str) -> Option<VariableValue> {
        self.0.get(name).map(|record| record.value)
    }
}

impl VariableStore for VariableSet {
    fn variable(&self, name: &str) -> Option<&VariableRecord> {
        self.0.get(name)
    }

    fn set_variable(&mut self, name: &str, record: VariableRecord) {
        self.0.insert(name.to_string(), record);
    }
}

// ============================================================================
// Policy memo state
// ============================================================================

/// Interest an actor has in one shop item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemInterest {
    pub catalog_type: CatalogType,
    pub price: f64,
    /// Views left before the item gets checked out
    pub remaining_view_count: i64,
}

/// Per-actor checkout tendencies, drawn once from the configured ranges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CheckoutProbabilities {
    pub failure: f64,
    pub urgent: f64,
    pub cancellation: f64,
}

/// Purchase-funnel state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PurchaseState {
    pub item_interests: BTreeMap<String, ItemInterest>,
    #[serde(default)]
    pub checkout_probabilities: Option<CheckoutProbabilities>,
}

// ============================================================================
// Profile state
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileState {
    pub version: u32,
    pub profile_name: String,
    pub registration_ts: Timestamp,
    pub variables: VariableSet,
    /// Per-date "engaged today" decisions (pruned after two days)
    #[serde(default)]
    pub active_days: BTreeMap<NaiveDate, bool>,
    #[serde(default)]
    pub last_received_nudge_ts: Option<Timestamp>,
    #[serde(default)]
    pub purchase: PurchaseState,
}

impl ProfileState {
    pub fn new(profile_name: impl Into<String>, registration_ts: Timestamp) -> Self {
        Self {
            version: PROFILE_STATE_VERSION,
            profile_name: profile_name.into(),
            registration_ts,
            variables: VariableSet::new(),
            active_days: BTreeMap::new(),
            last_received_nudge_ts: None,
            purchase: PurchaseState::default(),
        }
    }

    /// Registered strictly before `ts`.
    pub fn registered(&self, ts: Timestamp) -> bool {
        self.registration_ts < ts
    }

    /// Float value of a variable, 0.0 when absent.
    pub fn float_variable(&self, name: &str) -> f64 {
        self.variables.value(name).map_or(0.0, |v| v.as_f64())
    }

    /// Reject records written by a newer layout.
    pub fn check_version(&self) -> Result<(), ProfileStateError> {
        if self.version > PROFILE_STATE_VERSION {
            return Err(ProfileStateError::UnsupportedVersion {
                found: self.version,
                supported: PROFILE_STATE_VERSION,
            });
        }
        Ok(())
    }
}

impl VariableStore for ProfileState {
    fn variable(&self, name: &str) -> Option<&VariableRecord> {
        self.variables.variable(name)
    }

    fn set_variable(&mut self, name: &str, record: VariableRecord) {
        self.variables.set_variable(name, record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ts(day: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2020, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_registered_is_strict() {
        let state = ProfileState::new("p", ts(2));
        assert!(!state.registered(ts(2)));
        assert!(state.registered(ts(3)));
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let mut state = ProfileState::new("p", ts(1));
        state.set_variable(
            "session_engagement",
            VariableRecord {
                value: VariableValue::Float(0.5),
                last_seen_ts: ts(1),
            },
        );
        state.active_days.insert(ts(1).date_naive(), true);

        let json = serde_json::to_string(&state).unwrap();
        let restored: ProfileState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, state);
        assert_eq!(restored.float_variable("session_engagement"), 0.5);
    }

    #[test]
    fn test_newer_version_rejected() {
        let mut state = ProfileState::new("p", ts(1));
        state.version = PROFILE_STATE_VERSION + 1;
        assert!(state.check_version().is_err());
    }

    #[test]
    fn test_integer_variable_stays_integer() {
        let value: VariableValue = serde_json::from_str("250").unwrap();
        assert_eq!(value, VariableValue::Integer(250));
        let value: VariableValue = serde_json::from_str("0.25").unwrap();
        assert_eq!(value, VariableValue::Float(0.25));
    }
}
