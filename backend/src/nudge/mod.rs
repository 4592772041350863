//! Nudge collaborator.
//!
//! Nudges are notifications an outside system sends to actors. Actors check
//! for them at the instants their ReceiveNudges meta events are stamped with.

use crate::core::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NudgeError {
    #[error("Nudge source unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nudge {
    pub nudge_id: String,
    pub subject_id: String,
    pub queued_at: Timestamp,
}

pub trait NudgeSource {
    /// Nudges for `actor_id` queued in `(since, until]`.
    fn retrieve_nudges(
        &self,
        actor_id: &str,
        since: Option<Timestamp>,
        until: Timestamp,
    ) -> Result<Vec<Nudge>, NudgeError>;
}

/// Source that never has anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNudges;

impl NudgeSource for NoNudges {
    fn retrieve_nudges(
        &self,
        _actor_id: &str,
        _since: Option<Timestamp>,
        _until: Timestamp,
    ) -> Result<Vec<Nudge>, NudgeError> {
        Ok(Vec::new())
    }
}

/// In-memory nudge queue. Clones share the same queue.
#[derive(Debug, Clone, Default)]
pub struct QueuedNudges {
    queued: Rc<RefCell<BTreeMap<String, Vec<Nudge>>>>,
}

impl QueuedNudges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, nudge: Nudge) {
        let mut queued = self.queued.borrow_mut();
        let nudges = queued.entry(nudge.subject_id.clone()).or_default();
        let index = nudges.partition_point(|n| n.queued_at <= nudge.queued_at);
        nudges.insert(index, nudge);
    }

    pub fn len(&self) -> usize {
        self.queued.borrow().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NudgeSource for QueuedNudges {
    fn retrieve_nudges(
        &self,
        actor_id: &str,
        since: Option<Timestamp>,
        until: Timestamp,
    ) -> Result<Vec<Nudge>, NudgeError> {
        Ok(self
            .queued
            .borrow()
            .get(actor_id)
            .map(|nudges| {
                nudges
                    .iter()
                    .filter(|n| since.map_or(true, |since| n.queued_at > since) && n.queued_at <= until)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
