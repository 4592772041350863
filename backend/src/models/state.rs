//! Simulation State
//!
//! Holds the active actors (owned, fully hydrated) and the summaries of the
//! inactive ones. An inactive actor's full state lives in the checkpoint
//! store until it is resurrected.
//!
//! # Invariants
//!
//! 1. An actor id is either active or inactive, never both
//! 2. Iteration order is by actor id, so a seeded run visits actors in the
//!    same order every time

use crate::core::time::Timestamp;
use crate::models::actor::Actor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What the driver remembers about an actor that is not currently simulated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InactiveActor {
    pub id: String,
    pub profile_name: String,
    pub registration_ts: Timestamp,
    pub last_seen_ts: Timestamp,
    pub last_received_nudge_ts: Option<Timestamp>,
}

#[derive(Debug, Default)]
pub struct SimulationState {
    active: BTreeMap<String, Actor>,
    inactive: BTreeMap<String, InactiveActor>,
}

impl SimulationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn inactive_count(&self) -> usize {
        self.inactive.len()
    }

    pub fn get_actor(&self, id: &str) -> Option<&Actor> {
        self.active.get(id)
    }

    pub fn get_actor_mut(&mut self, id: &str) -> Option<&mut Actor> {
        self.active.get_mut(id)
    }

    pub fn get_inactive(&self, id: &str) -> Option<&InactiveActor> {
        self.inactive.get(id)
    }

    pub fn actors(&self) -> impl Iterator<Item = &Actor> {
        self.active.values()
    }

    pub fn actors_mut(&mut self) -> impl Iterator<Item = &mut Actor> {
        self.active.values_mut()
    }

    pub fn inactive_actors(&self) -> impl Iterator<Item = &InactiveActor> {
        self.inactive.values()
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.active.keys().cloned().collect()
    }

    pub fn inactive_ids(&self) -> Vec<String> {
        self.inactive.keys().cloned().collect()
    }

    /// Add an active actor, replacing any inactive entry under the same id.
    pub fn activate(&mut self, actor: Actor) {
        self.inactive.remove(actor.id());
        self.active.insert(actor.id().to_string(), actor);
    }

    /// Remove an active actor, leaving its summary behind.
    pub fn deactivate(&mut self, id: &str) -> Option<Actor> {
        let actor = self.active.remove(id)?;
        self.inactive.insert(actor.id().to_string(), actor.summary());
        Some(actor)
    }

    /// Record or refresh an inactive summary.
    pub fn insert_inactive(&mut self, summary: InactiveActor) {
        self.active.remove(&summary.id);
        self.inactive.insert(summary.id.clone(), summary);
    }

    pub fn remove_inactive(&mut self, id: &str) -> Option<InactiveActor> {
        self.inactive.remove(id)
    }

    /// Active actor with the earliest registration still registered by `ts`.
    pub fn first_registered(&self, ts: Timestamp) -> Option<&Actor> {
        self.active
            .values()
            .filter(|actor| actor.state().registered(ts))
            .min_by_key(|actor| (actor.registration_ts(), actor.id().to_string()))
    }

    /// Active actor count per profile name.
    pub fn profile_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for actor in self.active.values() {
            *counts.entry(actor.profile_name().to_string()).or_insert(0) += 1;
        }
        counts
    }
}
