//! Core infrastructure: simulated time, the wall clock and retries.

pub mod retry;
pub mod time;
