//! Orchestrator - the driver loop and its checkpoints
//!
//! See `engine.rs` for the tick loop.

pub mod checkpoint;
pub mod engine;

// Re-export main types for convenience
pub use engine::{Collaborators, Driver, ErrorClass, RunSummary, SimulationError, StopHandle, TickResult};

// Re-export checkpoint types
pub use checkpoint::{ActorSnapshot, Lifecycle, StateSnapshot};
