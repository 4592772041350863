//! Event sinks and the fallback spool.
//!
//! A sink receives each tick's batch fully ordered and integrity-checked.
//! When a sink keeps failing the driver parks the batch in a
//! [`FallbackSpool`] and replays it before the next run's first tick.

pub mod jsonl;
pub mod memory;
pub mod spool;

use crate::events::EventCollection;
use std::path::PathBuf;
use thiserror::Error;

pub use jsonl::JsonLinesSink;
pub use memory::MemorySink;
pub use spool::{FallbackSpool, FileSpool, MemorySpool, SpoolError};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Delivery rejected: {0}")]
    Rejected(String),
}

pub trait EventSink {
    /// Stable name, used as the spool key.
    fn name(&self) -> &str;

    fn deliver(&mut self, events: &EventCollection) -> Result<(), SinkError>;
}
