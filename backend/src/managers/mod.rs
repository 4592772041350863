//! Periodic variable managers.
//!
//! A periodic variable is a slow-changing hidden value (engagement,
//! population size) advanced in fixed increments. The manager's catch-up
//! loop makes the evolution independent of call granularity: advancing one
//! hour at a time or jumping a week at once walks the variable through the
//! same sequence of increments and emits the same set of updates.
//!
//! ```text
//! while current_ts - last_seen_ts >= increment:
//!     value = model.update_variable(value)
//!     last_seen_ts += increment
//!     emit (last_seen_ts, value)
//! ```

pub mod engagement;
pub mod population;

use crate::core::time::Timestamp;
use crate::models::event::{MetaAction, MetaEvent};
use crate::models::profile_state::{VariableRecord, VariableStore, VariableValue};
use crate::rng::RngManager;
use chrono::Duration;
use thiserror::Error;

pub use engagement::{generate_engagement_delta, EngagementConfig, EngagementModel, ENGAGEMENT_FLOOR};
pub use population::{PopulationConfig, PopulationModel, POPULATION_VARIABLE};

/// Default increment: one day.
pub fn default_increment() -> Duration {
    Duration::days(1)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VariableError {
    #[error("Variable '{variable}' updated before initialization")]
    NotInitialized { variable: String },
}

/// Variable-specific behavior plugged into a [`VariableManager`].
pub trait VariableModel {
    /// Name under which the variable is stored.
    fn name(&self) -> &str;

    /// Value used when the variable is absent from the store.
    fn initial_value(&self, rng: &mut RngManager) -> VariableValue;

    /// One increment's worth of change.
    fn update_variable(&self, current: VariableValue, rng: &mut RngManager) -> VariableValue;
}

/// "Set variable" instruction produced by one increment.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableUpdate {
    pub variable: String,
    pub value: VariableValue,
    /// Increment boundary at which the value takes effect
    pub ts: Timestamp,
}

impl VariableUpdate {
    /// Meta event stamped at the increment boundary.
    pub fn into_meta_event(self, actor_id: Option<&str>) -> MetaEvent {
        MetaEvent::new(
            self.ts,
            actor_id.map(str::to_string),
            MetaAction::SetVariable {
                variable: self.variable,
                value: self.value,
            },
        )
    }
}

/// Time-stepped updater for one variable.
#[derive(Debug, Clone)]
pub struct VariableManager<M: VariableModel> {
    model: M,
    increment: Duration,
    initialized: bool,
}

impl<M: VariableModel> VariableManager<M> {
    pub fn new(model: M) -> Self {
        Self::with_increment(model, default_increment())
    }

    /// # Panics
    /// Panics if `increment` is not positive.
    pub fn with_increment(model: M, increment: Duration) -> Self {
        assert!(increment > Duration::zero(), "increment must be positive");
        Self {
            model,
            increment,
            initialized: false,
        }
    }

    pub fn name(&self) -> &str {
        self.model.name()
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn increment(&self) -> Duration {
        self.increment
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Seed the variable if the store does not have it yet.
    ///
    /// A variable restored from persistence keeps its value and checkpoint.
    pub fn initialize<S: VariableStore + ?Sized>(
        &mut self,
        store: &mut S,
        initial_ts: Timestamp,
        rng: &mut RngManager,
    ) {
        if store.variable(self.model.name()).is_none() {
            let value = self.model.initial_value(rng);
            store.set_variable(
                self.model.name(),
                VariableRecord {
                    value,
                    last_seen_ts: initial_ts,
                },
            );
        }
        self.initialized = true;
    }

    /// Advance the variable to `current_ts` in whole increments.
    pub fn update<S: VariableStore + ?Sized>(
        &mut self,
        store: &mut S,
        current_ts: Timestamp,
        rng: &mut RngManager,
    ) -> Result<Vec<VariableUpdate>, VariableError> {
        let mut record = match (self.initialized, store.variable(self.model.name())) {
            (true, Some(record)) => record.clone(),
            _ => {
                return Err(VariableError::NotInitialized {
                    variable: self.model.name().to_string(),
                })
            }
        };

        let mut updates = Vec::new();
        while current_ts - record.last_seen_ts >= self.increment {
            record.value = self.model.update_variable(record.value, rng);
            record.last_seen_ts += self.increment;
            updates.push(VariableUpdate {
                variable: self.model.name().to_string(),
                value: record.value,
                ts: record.last_seen_ts,
            });
        }

        if !updates.is_empty() {
            store.set_variable(self.model.name(), record);
        }
        Ok(updates)
    }

    /// Current value, if the variable exists in `store`.
    pub fn value<S: VariableStore + ?Sized>(&self, store: &S) -> Option<VariableValue> {
        store.variable(self.model.name()).map(|record| record.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::profile_state::VariableSet;
    use chrono::{TimeZone, Utc};

    /// Counts increments.
    struct Counter;

    impl VariableModel for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn initial_value(&self, _rng: &mut RngManager) -> VariableValue {
            VariableValue::Integer(0)
        }

        fn update_variable(&self, current: VariableValue, _rng: &mut RngManager) -> VariableValue {
            VariableValue::Integer(current.as_i64() + 1)
        }
    }

    fn base() -> Timestamp {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_update_before_initialize_fails() {
        let mut manager = VariableManager::new(Counter);
        let mut store = VariableSet::new();
        let mut rng = RngManager::new(1);
        let err = manager.update(&mut store, base(), &mut rng).unwrap_err();
        assert_eq!(
            err,
            VariableError::NotInitialized {
                variable: "counter".to_string()
            }
        );
    }

    #[test]
    fn test_partial_increment_does_nothing() {
        let mut manager = VariableManager::new(Counter);
        let mut store = VariableSet::new();
        let mut rng = RngManager::new(1);
        manager.initialize(&mut store, base(), &mut rng);

        let updates = manager
            .update(&mut store, base() + Duration::hours(23), &mut rng)
            .unwrap();
        assert!(updates.is_empty());
        assert_eq!(manager.value(&store), Some(VariableValue::Integer(0)));
    }

    #[test]
    fn test_catch_up_stamps_each_boundary() {
        let mut manager = VariableManager::new(Counter);
        let mut store = VariableSet::new();
        let mut rng = RngManager::new(1);
        manager.initialize(&mut store, base(), &mut rng);

        let updates = manager
            .update(&mut store, base() + Duration::days(3) + Duration::hours(5), &mut rng)
            .unwrap();
        let stamps: Vec<Timestamp> = updates.iter().map(|u| u.ts).collect();
        assert_eq!(
            stamps,
            vec![
                base() + Duration::days(1),
                base() + Duration::days(2),
                base() + Duration::days(3)
            ]
        );
        assert_eq!(manager.value(&store), Some(VariableValue::Integer(3)));
        assert_eq!(
            store.variable("counter").unwrap().last_seen_ts,
            base() + Duration::days(3)
        );
    }

    #[test]
    fn test_initialize_keeps_existing_record() {
        let mut store = VariableSet::new();
        store.set_variable(
            "counter",
            VariableRecord {
                value: VariableValue::Integer(7),
                last_seen_ts: base(),
            },
        );
        let mut manager = VariableManager::new(Counter);
        let mut rng = RngManager::new(1);
        manager.initialize(&mut store, base() + Duration::days(10), &mut rng);
        assert_eq!(manager.value(&store), Some(VariableValue::Integer(7)));
        assert_eq!(store.variable("counter").unwrap().last_seen_ts, base());
    }

    #[test]
    fn test_update_into_meta_event() {
        let update = VariableUpdate {
            variable: "counter".to_string(),
            value: VariableValue::Integer(1),
            ts: base(),
        };
        let meta = update.into_meta_event(Some("actor-1"));
        assert_eq!(meta.actor_id.as_deref(), Some("actor-1"));
        assert_eq!(meta.ts, base());
    }
}
