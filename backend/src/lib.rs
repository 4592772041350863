//! Synthetic Events Core - Rust Engine
//!
//! Discrete-event scheduling core for long-running simulations that produce
//! synthetic, time-ordered behavioral event streams for many actors.
//!
//! # Architecture
//!
//! - **core**: Simulated time, the wall clock, retries
//! - **events**: Ordered event collections and the detached-event relay
//! - **managers**: Periodic variables (engagement, population)
//! - **models**: Events, actors, profile state, simulation state
//! - **policy**: Behavior policies that expand actor behavior into events
//! - **scheduler**: Per-actor windowed look-ahead
//! - **orchestrator**: The driver loop and checkpoints
//! - **catalog**, **nudge**, **persistence**, **sink**: external collaborators
//! - **rng**: Deterministic random number generation
//!
//! # Critical Invariants
//!
//! 1. Every delivered sequence is non-decreasing in time and never passes
//!    the tick boundary
//! 2. All randomness is deterministic (seeded RNG)
//! 3. Generating events in one call or many yields the same actor state

// Module declarations
pub mod catalog;
pub mod config;
pub mod core;
pub mod events;
pub mod managers;
pub mod models;
pub mod nudge;
pub mod orchestrator;
pub mod persistence;
pub mod policy;
pub mod rng;
pub mod scheduler;
pub mod sink;

// Re-exports for convenience
pub use config::{ConfigError, SimulationConfig};
pub use core::time::{ManualClock, SystemClock, TimeManager, Timestamp, WallClock};
pub use events::{DetachedEventRelay, EventCollection};
pub use models::{Actor, CatalogEvent, LogEvent, MetaEvent, SimulationState};
pub use orchestrator::{Collaborators, Driver, ErrorClass, RunSummary, SimulationError, StopHandle, TickResult};
pub use rng::RngManager;
pub use scheduler::ActorScheduler;
