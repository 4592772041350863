//! Directory of JSON documents.
//!
//! ```text
//! <root>/<key>/checkpoint.json
//! <root>/<key>/actors/<actor_id>.json
//! ```
//!
//! Writes go to a temporary file in the target directory and are renamed
//! into place, so a crash never leaves a half-written checkpoint.

use crate::orchestrator::checkpoint::{ActorSnapshot, StateSnapshot};
use crate::persistence::{CheckpointStore, PersistenceError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PersistenceError + '_ {
    move |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Atomically replace `path` with the JSON form of `value`.
fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let dir = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir).map_err(io_error(dir))?;

    let data = serde_json::to_vec_pretty(value)?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_error(dir))?;
    tmp.write_all(&data).map_err(io_error(path))?;
    tmp.persist(path).map_err(|e| io_error(path)(e.error))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistenceError> {
    match std::fs::read(path) {
        Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_error(path)(err)),
    }
}

/// Keep path components to a safe character set.
fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn checkpoint_path(&self, key: &str) -> PathBuf {
        self.root.join(sanitize(key)).join("checkpoint.json")
    }

    fn actor_path(&self, key: &str, actor_id: &str) -> PathBuf {
        self.root
            .join(sanitize(key))
            .join("actors")
            .join(format!("{}.json", sanitize(actor_id)))
    }
}

impl CheckpointStore for JsonFileStore {
    fn load_checkpoint(&self, key: &str) -> Result<Option<StateSnapshot>, PersistenceError> {
        read_json(&self.checkpoint_path(key))
    }

    fn save_checkpoint(&mut self, key: &str, snapshot: &StateSnapshot) -> Result<(), PersistenceError> {
        atomic_write_json(&self.checkpoint_path(key), snapshot)
    }

    fn store_actor(&mut self, key: &str, actor: &ActorSnapshot) -> Result<(), PersistenceError> {
        atomic_write_json(&self.actor_path(key, &actor.id), actor)
    }

    fn load_actor(&self, key: &str, actor_id: &str) -> Result<Option<ActorSnapshot>, PersistenceError> {
        read_json(&self.actor_path(key, actor_id))
    }
}
