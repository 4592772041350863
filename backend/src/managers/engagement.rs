//! Engagement: a biased random walk bounded to [0, 1].
//!
//! Once the level drops below [`ENGAGEMENT_FLOOR`] it snaps to zero and stays
//! there; an actor at zero engagement is inactive.

use crate::managers::VariableModel;
use crate::models::profile_state::{VariableRecord, VariableStore, VariableValue};
use crate::rng::RngManager;
use serde::{Deserialize, Serialize};

/// Levels below this are treated as zero.
pub const ENGAGEMENT_FLOOR: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngagementConfig {
    pub initial_min: f64,
    pub initial_max: f64,
    /// Probability that an increment changes the level at all
    pub change_probability: f64,
    /// Relative weight of a boost when a change happens
    pub boost_probability: f64,
    /// Relative weight of a decay when a change happens
    pub decay_probability: f64,
    pub change_min: f64,
    pub change_max: f64,
}

impl Default for EngagementConfig {
    fn default() -> Self {
        Self {
            initial_min: 0.0,
            initial_max: 1.0,
            change_probability: 0.0,
            boost_probability: 0.25,
            decay_probability: 0.75,
            change_min: 1.0,
            change_max: 1.0,
        }
    }
}

impl EngagementConfig {
    /// Fixed level that never changes.
    pub fn constant(level: f64) -> Self {
        Self {
            initial_min: level,
            initial_max: level,
            change_probability: 0.0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.initial_min) || !(0.0..=1.0).contains(&self.initial_max) {
            return Err("engagement initial range must lie within [0, 1]".to_string());
        }
        if self.initial_min > self.initial_max {
            return Err("engagement initial_min must not exceed initial_max".to_string());
        }
        if !(0.0..=1.0).contains(&self.change_probability) {
            return Err("engagement change_probability must lie within [0, 1]".to_string());
        }
        if self.change_probability > 0.0 && self.boost_probability + self.decay_probability <= 0.0 {
            return Err("engagement boost/decay weights must not both be zero".to_string());
        }
        if self.change_min > self.change_max {
            return Err("engagement change_min must not exceed change_max".to_string());
        }
        Ok(())
    }
}

/// Signed change for one increment (0.0 when nothing changes).
pub fn generate_engagement_delta(config: &EngagementConfig, rng: &mut RngManager) -> f64 {
    if !rng.chance(config.change_probability) {
        return 0.0;
    }

    let boost = rng.weighted_index(&[config.boost_probability, config.decay_probability]) == Some(0);
    let magnitude = rng.range_f64(config.change_min, config.change_max);
    if boost {
        magnitude
    } else {
        -magnitude
    }
}

fn clamp_level(level: f64) -> f64 {
    level.clamp(0.0, 1.0)
}

/// Engagement variable stored under `name`.
#[derive(Debug, Clone, PartialEq)]
pub struct EngagementModel {
    name: String,
    config: EngagementConfig,
}

impl EngagementModel {
    pub fn new(name: impl Into<String>, config: EngagementConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    pub fn config(&self) -> &EngagementConfig {
        &self.config
    }

    /// Current level, 0.0 when the variable has not been created.
    pub fn level<S: VariableStore + ?Sized>(&self, store: &S) -> f64 {
        store
            .variable(&self.name)
            .map_or(0.0, |record| record.value.as_f64())
    }

    /// Engaged at all: level at or above [`ENGAGEMENT_FLOOR`].
    pub fn is_active<S: VariableStore + ?Sized>(&self, store: &S) -> bool {
        self.level(store) >= ENGAGEMENT_FLOOR
    }

    /// Apply an out-of-band change (resurrection, nudge, forced churn).
    ///
    /// Keeps the variable's increment checkpoint untouched. Returns the new
    /// level, or `None` when the variable does not exist.
    pub fn adjust<S: VariableStore + ?Sized>(&self, store: &mut S, delta: f64) -> Option<f64> {
        let record = store.variable(&self.name)?.clone();
        let level = clamp_level(record.value.as_f64() + delta);
        store.set_variable(
            &self.name,
            VariableRecord {
                value: VariableValue::Float(level),
                last_seen_ts: record.last_seen_ts,
            },
        );
        Some(level)
    }
}

impl VariableModel for EngagementModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn initial_value(&self, rng: &mut RngManager) -> VariableValue {
        VariableValue::Float(rng.range_f64(self.config.initial_min, self.config.initial_max))
    }

    fn update_variable(&self, current: VariableValue, rng: &mut RngManager) -> VariableValue {
        let level = current.as_f64();
        if level < ENGAGEMENT_FLOOR {
            return VariableValue::Float(0.0);
        }

        let delta = generate_engagement_delta(&self.config, rng);
        VariableValue::Float(clamp_level(level + delta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::profile_state::VariableSet;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_constant_engagement_never_moves() {
        let model = EngagementModel::new("session_engagement", EngagementConfig::constant(1.0));
        let mut rng = RngManager::new(9);
        assert_eq!(model.initial_value(&mut rng), VariableValue::Float(1.0));

        let mut value = VariableValue::Float(1.0);
        for _ in 0..50 {
            value = model.update_variable(value, &mut rng);
        }
        assert_eq!(value, VariableValue::Float(1.0));
    }

    #[test]
    fn test_level_below_floor_snaps_to_zero() {
        let model = EngagementModel::new("e", EngagementConfig::default());
        let mut rng = RngManager::new(1);
        assert_eq!(
            model.update_variable(VariableValue::Float(0.00005), &mut rng),
            VariableValue::Float(0.0)
        );
    }

    #[test]
    fn test_walk_stays_in_unit_interval() {
        let config = EngagementConfig {
            change_probability: 1.0,
            change_min: 0.1,
            change_max: 0.6,
            boost_probability: 0.5,
            decay_probability: 0.5,
            ..EngagementConfig::default()
        };
        let model = EngagementModel::new("e", config);
        let mut rng = RngManager::new(77);
        let mut value = VariableValue::Float(0.5);
        for _ in 0..500 {
            value = model.update_variable(value, &mut rng);
            let level = value.as_f64();
            assert!((0.0..=1.0).contains(&level), "level {} out of bounds", level);
        }
    }

    #[test]
    fn test_adjust_clamps_and_keeps_checkpoint() {
        let model = EngagementModel::new("e", EngagementConfig::default());
        let mut store = VariableSet::new();
        let ts = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        store.set_variable(
            "e",
            VariableRecord {
                value: VariableValue::Float(0.4),
                last_seen_ts: ts,
            },
        );

        assert_eq!(model.adjust(&mut store, 1.0), Some(1.0));
        assert_eq!(model.adjust(&mut store, -100_000.0), Some(0.0));
        assert_eq!(store.variable("e").unwrap().last_seen_ts, ts);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngagementConfig {
            initial_min: 0.8,
            initial_max: 0.2,
            ..EngagementConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
