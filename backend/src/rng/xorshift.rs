//! xorshift64* random number generator
//!
//! Fast, deterministic PRNG used for every random decision an actor or the
//! driver makes. Same seed → same event stream, which is what makes a run
//! reproducible and a checkpoint resumable.
//!
//! # Determinism
//!
//! The generator state is a single `u64` and is serialized with the actor it
//! belongs to. Restoring the state restores the exact continuation of the
//! sequence.

use serde::{Deserialize, Serialize};
use uuid::{Builder, Uuid};

/// Deterministic random number generator using xorshift64*
///
/// # Example
/// ```
/// use synthetic_events_core_rs::RngManager;
///
/// let mut rng = RngManager::new(12345);
/// let value = rng.next();
/// let range_value = rng.range(0, 100); // [0, 100)
/// let coin = rng.chance(0.5);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RngManager {
    /// Internal state (64-bit)
    state: u64,
}

impl RngManager {
    /// Create a new RNG with given seed
    ///
    /// A zero seed is replaced by 1 (xorshift cannot leave the zero state).
    pub fn new(seed: u64) -> Self {
        let state = if seed == 0 { 1 } else { seed };
        Self { state }
    }

    /// Generate next random u64 value
    pub fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    /// Generate random value in range [min, max)
    ///
    /// # Panics
    /// Panics if min >= max
    pub fn range(&mut self, min: i64, max: i64) -> i64 {
        assert!(min < max, "min must be less than max");

        let value = self.next();
        let range_size = (max - min) as u64;
        min + (value % range_size) as i64
    }

    /// Random integer in [min, max), or `min` when the range is empty.
    ///
    /// Configuration ranges are allowed to collapse (`min == max`), so this
    /// is the variant behavior code uses.
    ///
    /// ```
    /// use synthetic_events_core_rs::RngManager;
    ///
    /// let mut rng = RngManager::new(7);
    /// assert_eq!(rng.int_in_range(5, 5), 5);
    /// let v = rng.int_in_range(5, 30);
    /// assert!((5..30).contains(&v));
    /// ```
    pub fn int_in_range(&mut self, min: i64, max: i64) -> i64 {
        if max <= min {
            return min;
        }
        self.range(min, max)
    }

    /// Get current RNG state (for checkpointing/replay)
    ///
    /// ```
    /// use synthetic_events_core_rs::RngManager;
    ///
    /// let mut rng = RngManager::new(12345);
    /// rng.next();
    /// let mut resumed = RngManager::new(rng.get_state());
    /// assert_eq!(rng.next(), resumed.next());
    /// ```
    pub fn get_state(&self) -> u64 {
        self.state
    }

    /// Generate random f64 in range [0.0, 1.0)
    pub fn next_f64(&mut self) -> f64 {
        let value = self.next();
        // Top 53 bits scaled by 2^-53
        (value >> 11) as f64 * (1.0 / ((1u64 << 53) as f64))
    }

    /// Uniform f64 in [min, max). Returns `min` when the bounds coincide.
    pub fn range_f64(&mut self, min: f64, max: f64) -> f64 {
        min + self.next_f64() * (max - min)
    }

    /// Bernoulli trial: true with probability `probability`.
    pub fn chance(&mut self, probability: f64) -> bool {
        self.next_f64() < probability
    }

    /// Sample from a normal distribution (Box-Muller).
    pub fn gaussian(&mut self, mean: f64, std_dev: f64) -> f64 {
        // 1 - u keeps the log argument in (0, 1]
        let u1 = 1.0 - self.next_f64();
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }

    /// Pick an index proportionally to `weights`.
    ///
    /// Returns `None` when there is nothing to pick from (empty slice or all
    /// weights non-positive).
    ///
    /// ```
    /// use synthetic_events_core_rs::RngManager;
    ///
    /// let mut rng = RngManager::new(1);
    /// assert_eq!(rng.weighted_index(&[0.0, 1.0, 0.0]), Some(1));
    /// assert_eq!(rng.weighted_index(&[]), None);
    /// ```
    pub fn weighted_index(&mut self, weights: &[f64]) -> Option<usize> {
        let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
        if total <= 0.0 {
            return None;
        }

        let mut target = self.next_f64() * total;
        let mut last_positive = None;
        for (index, weight) in weights.iter().enumerate() {
            if *weight <= 0.0 {
                continue;
            }
            if target < *weight {
                return Some(index);
            }
            target -= weight;
            last_positive = Some(index);
        }

        // Floating point leftovers land on the last eligible entry
        last_positive
    }

    /// Derive an independent generator from this one.
    ///
    /// Each actor gets its own fork at creation so its stream does not
    /// depend on how many other actors exist or how ticks are sized.
    pub fn fork(&mut self) -> RngManager {
        RngManager::new(self.next())
    }

    /// Deterministic version-4 UUID built from generator output.
    pub fn uuid(&mut self) -> Uuid {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.next().to_le_bytes());
        bytes[8..].copy_from_slice(&self.next().to_le_bytes());
        Builder::from_random_bytes(bytes).into_uuid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_seed_converted_to_nonzero() {
        let rng = RngManager::new(0);
        assert_ne!(rng.get_state(), 0, "Zero seed should be converted to 1");
    }

    #[test]
    #[should_panic(expected = "min must be less than max")]
    fn test_range_invalid_bounds() {
        let mut rng = RngManager::new(12345);
        rng.range(100, 50);
    }

    #[test]
    fn test_next_f64_in_range() {
        let mut rng = RngManager::new(12345);

        for _ in 0..1000 {
            let val = rng.next_f64();
            assert!(
                (0.0..1.0).contains(&val),
                "next_f64() produced value {} outside [0.0, 1.0)",
                val
            );
        }
    }

    #[test]
    fn test_range_f64_collapsed_bounds() {
        let mut rng = RngManager::new(3);
        assert_eq!(rng.range_f64(1.0, 1.0), 1.0);
    }

    #[test]
    fn test_chance_extremes() {
        let mut rng = RngManager::new(99);
        for _ in 0..100 {
            assert!(!rng.chance(0.0));
            assert!(rng.chance(1.0));
        }
    }

    #[test]
    fn test_weighted_index_skips_zero_weights() {
        let mut rng = RngManager::new(42);
        for _ in 0..200 {
            let index = rng.weighted_index(&[0.0, 2.0, 0.0, 1.0]).unwrap();
            assert!(index == 1 || index == 3, "picked zero-weight index {}", index);
        }
        assert_eq!(rng.weighted_index(&[0.0, -1.0]), None);
    }

    #[test]
    fn test_uuid_deterministic_and_v4() {
        let mut rng1 = RngManager::new(5);
        let mut rng2 = RngManager::new(5);
        let a = rng1.uuid();
        assert_eq!(a, rng2.uuid());
        assert_eq!(a.get_version_num(), 4);
        assert_ne!(a, rng1.uuid());
    }

    #[test]
    fn test_fork_is_independent_of_parent_continuation() {
        let mut parent = RngManager::new(11);
        let mut child = parent.fork();
        let parent_next = parent.next();
        let child_next = child.next();
        assert_ne!(parent_next, child_next);
    }
}
