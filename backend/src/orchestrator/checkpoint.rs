//! Checkpoint - Save/Load Simulation State
//!
//! Enables serialization and deserialization of complete driver state so a
//! run can stop between ticks and resume later.
//!
//! # Critical Invariants
//!
//! - **Determinism**: Same seed + config produces identical results, whether
//!   or not the run was interrupted
//! - **Clock Consistency**: No actor and no relay boundary is ahead of the
//!   global clock
//! - **Lifecycle Exclusivity**: An actor id is active or inactive, never both
//! - **Config Matching**: State can only be loaded with matching config

use crate::core::time::Timestamp;
use crate::events::DetachedEventRelay;
use crate::models::profile_state::{ProfileState, VariableSet};
use crate::models::state::InactiveActor;
use crate::orchestrator::SimulationError;
use crate::scheduler::ActorScheduler;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Current layout version of [`StateSnapshot`].
pub const SNAPSHOT_VERSION: u32 = 1;

// ============================================================================
// Snapshot Structures
// ============================================================================

/// Complete driver state snapshot
///
/// Everything needed to resume from a committed tick boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u32,

    /// Committed global clock (last tick boundary)
    pub clock: Timestamp,

    pub tick_count: u64,

    /// Driver RNG state (CRITICAL for determinism)
    pub rng_state: u64,

    pub last_maintenance_ts: Timestamp,

    /// Driver-level periodic variables (population)
    pub driver_variables: VariableSet,

    /// All active actors
    pub actors: Vec<ActorSnapshot>,

    pub inactive_actors: Vec<InactiveActor>,

    /// Detached events not yet due
    pub relay: DetachedEventRelay,

    /// SHA256 hash of the config (for validation)
    pub config_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Active,
    Inactive,
}

/// Actor state snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorSnapshot {
    pub id: String,
    pub lifecycle: Lifecycle,
    pub rng_state: u64,
    /// Local clock, horizon and look-ahead buffer
    pub scheduler: ActorScheduler,
    pub state: ProfileState,
}

// ============================================================================
// Config Hashing
// ============================================================================

/// Compute deterministic SHA256 hash of config
///
/// Uses canonical JSON serialization with sorted keys so the hash does not
/// depend on map iteration order.
pub fn compute_config_hash<T: Serialize>(config: &T) -> Result<String, SimulationError> {
    use serde_json::Value;
    use std::collections::BTreeMap;

    let value = serde_json::to_value(config)
        .map_err(|e| SimulationError::SerializationError(format!("Config serialization failed: {}", e)))?;

    fn canonicalize(value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<String, Value> =
                    map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
                Value::Object(sorted.into_iter().collect())
            }
            Value::Array(arr) => Value::Array(arr.into_iter().map(canonicalize).collect()),
            other => other,
        }
    }

    let json = serde_json::to_string(&canonicalize(value))
        .map_err(|e| SimulationError::SerializationError(format!("Config serialization failed: {}", e)))?;

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// Validation Functions
// ============================================================================

/// Validate state snapshot integrity
///
/// Checks:
/// - Layout version and config hash
/// - Lifecycle exclusivity (no id twice, active snapshots marked active)
/// - Clock consistency of actors and relay
pub fn validate_snapshot(snapshot: &StateSnapshot, expected_config_hash: &str) -> Result<(), SimulationError> {
    // 1. Layout and config
    if snapshot.version > SNAPSHOT_VERSION {
        return Err(SimulationError::StateValidationError(format!(
            "Unsupported snapshot version {} (max supported {})",
            snapshot.version, SNAPSHOT_VERSION
        )));
    }
    if snapshot.config_hash != expected_config_hash {
        return Err(SimulationError::StateValidationError(format!(
            "Config hash mismatch: checkpoint {}, current {}",
            snapshot.config_hash, expected_config_hash
        )));
    }

    // 2. Lifecycle exclusivity
    let mut seen = BTreeSet::new();
    for actor in &snapshot.actors {
        if actor.lifecycle != Lifecycle::Active {
            return Err(SimulationError::StateValidationError(format!(
                "Actor {} listed as active but marked {:?}",
                actor.id, actor.lifecycle
            )));
        }
        if !seen.insert(actor.id.as_str()) {
            return Err(SimulationError::StateValidationError(format!(
                "Duplicate active actor {}",
                actor.id
            )));
        }
    }
    for inactive in &snapshot.inactive_actors {
        if !seen.insert(inactive.id.as_str()) {
            return Err(SimulationError::StateValidationError(format!(
                "Actor {} is both active and inactive (or listed twice)",
                inactive.id
            )));
        }
    }

    // 3. Clock consistency
    for actor in &snapshot.actors {
        if actor.scheduler.last_seen_ts() > snapshot.clock {
            return Err(SimulationError::StateValidationError(format!(
                "Actor {} clock {} is ahead of global clock {}",
                actor.id,
                actor.scheduler.last_seen_ts(),
                snapshot.clock
            )));
        }
    }
    if let Some(released_through) = snapshot.relay.released_through() {
        if released_through > snapshot.clock {
            return Err(SimulationError::StateValidationError(format!(
                "Relay released through {} beyond global clock {}",
                released_through, snapshot.clock
            )));
        }
    }

    Ok(())
}
