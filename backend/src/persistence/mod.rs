//! Persistence collaborator.
//!
//! The driver commits a [`StateSnapshot`] at every tick boundary and parks
//! the full state of each actor that goes inactive. Stores only move opaque
//! serde documents; they know nothing about the simulation.

pub mod file;
pub mod memory;

use crate::orchestrator::checkpoint::{ActorSnapshot, StateSnapshot};
use std::path::PathBuf;
use thiserror::Error;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub trait CheckpointStore {
    fn load_checkpoint(&self, key: &str) -> Result<Option<StateSnapshot>, PersistenceError>;

    fn save_checkpoint(&mut self, key: &str, snapshot: &StateSnapshot) -> Result<(), PersistenceError>;

    /// Park one actor's full state.
    fn store_actor(&mut self, key: &str, actor: &ActorSnapshot) -> Result<(), PersistenceError>;

    fn load_actor(&self, key: &str, actor_id: &str) -> Result<Option<ActorSnapshot>, PersistenceError>;
}
