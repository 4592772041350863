//! Population size: a mean-reverting random walk over [min, max].

use crate::managers::VariableModel;
use crate::models::profile_state::VariableValue;
use crate::rng::RngManager;
use serde::{Deserialize, Serialize};

/// Name of the driver-level population variable.
pub const POPULATION_VARIABLE: &str = "population";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    pub initial_min: i64,
    pub initial_max: i64,
    pub target_min_count: i64,
    pub target_max_count: i64,
    /// Fraction of the range a single increment may move
    pub volatility: f64,
    /// Chance per maintenance run that one inactive actor comes back
    pub resurrection_probability: f64,
    pub inactive_nudge_check_ratio_per_hour: f64,
    pub prune_oldest_registered_users: bool,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            initial_min: 0,
            initial_max: 0,
            target_min_count: 100,
            target_max_count: 300,
            volatility: 0.05,
            resurrection_probability: 0.0,
            inactive_nudge_check_ratio_per_hour: 0.0,
            prune_oldest_registered_users: false,
        }
    }
}

impl PopulationConfig {
    /// Fixed population of `count` actors.
    pub fn fixed(count: i64) -> Self {
        Self {
            initial_min: count,
            initial_max: count,
            target_min_count: count,
            target_max_count: count,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.initial_min < 0 || self.target_min_count < 0 || self.target_max_count < 0 {
            return Err("population counts must not be negative".to_string());
        }
        if self.initial_min > self.initial_max {
            return Err("population initial_min must not exceed initial_max".to_string());
        }
        for (name, p) in [
            ("volatility", self.volatility),
            ("resurrection_probability", self.resurrection_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(format!("population {} must lie within [0, 1]", name));
            }
        }
        if self.inactive_nudge_check_ratio_per_hour < 0.0 {
            return Err("population inactive_nudge_check_ratio_per_hour must not be negative".to_string());
        }
        Ok(())
    }

    /// Count above which the oldest actors are pruned.
    pub fn prune_threshold(&self) -> f64 {
        self.target_max_count as f64 * (1.0 + self.volatility)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PopulationModel {
    config: PopulationConfig,
}

impl PopulationModel {
    pub fn new(config: PopulationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PopulationConfig {
        &self.config
    }

    fn increase_probability(ratio: f64) -> f64 {
        if 0.2 < ratio && ratio < 0.5 {
            0.4
        } else if 0.5 < ratio && ratio < 0.8 {
            0.6
        } else {
            1.0 - ratio
        }
    }
}

impl VariableModel for PopulationModel {
    fn name(&self) -> &str {
        POPULATION_VARIABLE
    }

    fn initial_value(&self, rng: &mut RngManager) -> VariableValue {
        VariableValue::Integer(rng.int_in_range(self.config.initial_min, self.config.initial_max))
    }

    fn update_variable(&self, current: VariableValue, rng: &mut RngManager) -> VariableValue {
        let min = self.config.target_min_count;
        let max = self.config.target_max_count;
        if max <= min {
            return VariableValue::Integer(min);
        }

        let current = current.as_i64();
        let span = (max - min) as f64;
        let ratio = (current - min) as f64 / span;

        let change_ratio = if rng.chance(Self::increase_probability(ratio)) {
            1.0 - ratio
        } else {
            -ratio
        };
        let change = (rng.next_f64() * span * self.config.volatility * change_ratio).round() as i64;

        VariableValue::Integer(current + change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degenerate_range_pins_to_min() {
        let model = PopulationModel::new(PopulationConfig::fixed(5));
        let mut rng = RngManager::new(3);
        assert_eq!(
            model.update_variable(VariableValue::Integer(40), &mut rng),
            VariableValue::Integer(5)
        );
    }

    #[test]
    fn test_walk_reverts_toward_range() {
        let config = PopulationConfig {
            target_min_count: 100,
            target_max_count: 200,
            volatility: 0.5,
            ..PopulationConfig::default()
        };
        let model = PopulationModel::new(config);
        let mut rng = RngManager::new(11);

        // At the floor the walk can only go up
        let value = model.update_variable(VariableValue::Integer(100), &mut rng);
        assert!(value.as_i64() >= 100, "population dropped below floor: {:?}", value);

        // At the ceiling it can only go down
        let value = model.update_variable(VariableValue::Integer(200), &mut rng);
        assert!(value.as_i64() <= 200, "population rose above ceiling: {:?}", value);
    }

    #[test]
    fn test_walk_stays_within_range() {
        let config = PopulationConfig {
            initial_min: 150,
            initial_max: 150,
            target_min_count: 100,
            target_max_count: 200,
            volatility: 1.0,
            ..PopulationConfig::default()
        };
        let model = PopulationModel::new(config);
        let mut rng = RngManager::new(5);
        let mut value = model.initial_value(&mut rng);
        for _ in 0..1000 {
            value = model.update_variable(value, &mut rng);
            assert!((100..=200).contains(&value.as_i64()), "out of range: {:?}", value);
        }
    }

    #[test]
    fn test_prune_threshold() {
        let config = PopulationConfig {
            target_max_count: 100,
            volatility: 0.1,
            ..PopulationConfig::default()
        };
        assert!((config.prune_threshold() - 110.0).abs() < 1e-9);
    }
}
