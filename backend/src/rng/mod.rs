//! Deterministic random number generation
//!
//! Uses xorshift64* for fast, deterministic random number generation.
//! All randomness in the simulation goes through this module: the driver owns
//! one generator and every actor owns a fork of it.

mod xorshift;

pub use xorshift::RngManager;
