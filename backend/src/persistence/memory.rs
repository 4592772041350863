//! In-memory store. Documents are kept as JSON text so every save and load
//! goes through the same serialization as the file store.

use crate::orchestrator::checkpoint::{ActorSnapshot, StateSnapshot};
use crate::persistence::{CheckpointStore, PersistenceError};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

#[derive(Debug, Default)]
struct Documents {
    checkpoints: BTreeMap<String, String>,
    actors: BTreeMap<(String, String), String>,
    failing_writes: u32,
}

impl Documents {
    fn check_write(&mut self) -> Result<(), PersistenceError> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(PersistenceError::Unavailable("injected write failure".to_string()));
        }
        Ok(())
    }
}

/// Clones share the same documents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    documents: Rc<RefCell<Documents>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail.
    pub fn fail_next_writes(&self, count: u32) {
        self.documents.borrow_mut().failing_writes = count;
    }

    pub fn checkpoint_count(&self) -> usize {
        self.documents.borrow().checkpoints.len()
    }

    pub fn actor_count(&self, key: &str) -> usize {
        self.documents
            .borrow()
            .actors
            .keys()
            .filter(|(k, _)| k == key)
            .count()
    }
}

impl CheckpointStore for MemoryStore {
    fn load_checkpoint(&self, key: &str) -> Result<Option<StateSnapshot>, PersistenceError> {
        self.documents
            .borrow()
            .checkpoints
            .get(key)
            .map(|json| serde_json::from_str(json))
            .transpose()
            .map_err(PersistenceError::from)
    }

    fn save_checkpoint(&mut self, key: &str, snapshot: &StateSnapshot) -> Result<(), PersistenceError> {
        let mut documents = self.documents.borrow_mut();
        documents.check_write()?;
        let json = serde_json::to_string(snapshot)?;
        documents.checkpoints.insert(key.to_string(), json);
        Ok(())
    }

    fn store_actor(&mut self, key: &str, actor: &ActorSnapshot) -> Result<(), PersistenceError> {
        let mut documents = self.documents.borrow_mut();
        documents.check_write()?;
        let json = serde_json::to_string(actor)?;
        documents.actors.insert((key.to_string(), actor.id.clone()), json);
        Ok(())
    }

    fn load_actor(&self, key: &str, actor_id: &str) -> Result<Option<ActorSnapshot>, PersistenceError> {
        self.documents
            .borrow()
            .actors
            .get(&(key.to_string(), actor_id.to_string()))
            .map(|json| serde_json::from_str(json))
            .transpose()
            .map_err(PersistenceError::from)
    }
}
