//! Local store for batches a sink could not take.
//!
//! Batches are kept per sink name. Spooling again before a drain merges into
//! the parked batch, which keeps it time-ordered.

use crate::events::EventCollection;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("Spool I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Spool serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub trait FallbackSpool {
    fn spool(&mut self, sink_name: &str, events: &EventCollection) -> Result<(), SpoolError>;

    /// Remove and return the parked batch for a sink.
    fn drain(&mut self, sink_name: &str) -> Result<Option<EventCollection>, SpoolError>;
}

// ============================================================================
// In memory
// ============================================================================

/// Clones share the parked batches.
#[derive(Debug, Clone, Default)]
pub struct MemorySpool {
    batches: Rc<RefCell<BTreeMap<String, EventCollection>>>,
}

impl MemorySpool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events parked for a sink.
    pub fn spooled_len(&self, sink_name: &str) -> usize {
        self.batches.borrow().get(sink_name).map_or(0, EventCollection::len)
    }
}

impl FallbackSpool for MemorySpool {
    fn spool(&mut self, sink_name: &str, events: &EventCollection) -> Result<(), SpoolError> {
        self.batches
            .borrow_mut()
            .entry(sink_name.to_string())
            .or_default()
            .insert_events(events.clone());
        Ok(())
    }

    fn drain(&mut self, sink_name: &str) -> Result<Option<EventCollection>, SpoolError> {
        Ok(self.batches.borrow_mut().remove(sink_name))
    }
}

// ============================================================================
// On disk
// ============================================================================

/// One JSON file per sink under a directory.
#[derive(Debug, Clone)]
pub struct FileSpool {
    dir: PathBuf,
}

impl FileSpool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, sink_name: &str) -> PathBuf {
        let name: String = sink_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.spool.json", name))
    }

    fn read(path: &Path) -> Result<Option<EventCollection>, SpoolError> {
        match std::fs::read(path) {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SpoolError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

impl FallbackSpool for FileSpool {
    fn spool(&mut self, sink_name: &str, events: &EventCollection) -> Result<(), SpoolError> {
        let io_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source| SpoolError::Io { path, source }
        };
        std::fs::create_dir_all(&self.dir).map_err(io_error(&self.dir))?;

        let path = self.path_for(sink_name);
        let mut parked = Self::read(&path)?.unwrap_or_default();
        parked.insert_events(events.clone());

        let data = serde_json::to_vec(&parked)?;
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(io_error(&self.dir))?;
        tmp.write_all(&data).map_err(io_error(&path))?;
        tmp.persist(&path).map_err(|e| io_error(&path)(e.error))?;
        Ok(())
    }

    fn drain(&mut self, sink_name: &str) -> Result<Option<EventCollection>, SpoolError> {
        let path = self.path_for(sink_name);
        let parked = Self::read(&path)?;
        if parked.is_some() {
            std::fs::remove_file(&path).map_err(|source| SpoolError::Io { path, source })?;
        }
        Ok(parked)
    }
}
