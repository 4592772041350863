//! Domain models for the event simulator

pub mod actor;
pub mod event;
pub mod log_event;
pub mod profile_state;
pub mod state;

// Re-exports
pub use actor::Actor;
pub use event::{CatalogEvent, CatalogRef, CatalogType, Event, EventKind, MetaAction, MetaEvent, Timestamped};
pub use log_event::{LogAction, LogEvent};
pub use profile_state::{ProfileState, ProfileStateError, VariableStore, VariableValue};
pub use state::{InactiveActor, SimulationState};
