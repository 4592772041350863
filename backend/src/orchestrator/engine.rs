//! Driver - the top-level simulation loop
//!
//! One tick advances the global clock to the next boundary and delivers
//! everything that happened up to it:
//!
//! 1. Advance driver variables (population)
//! 2. Maintain the active population
//! 3. Periodic maintenance (resurrections)
//! 4. Generate events for every active actor
//! 5. Perform meta actions (nudge checks)
//! 6. Schedule the consequences of committed events
//! 7. Release due detached events
//! 8. Sort and assert integrity
//! 9. Deliver to sinks (spool on exhausted retries)
//! 10. Deactivate actors that went inactive
//! 11. Advance the clock
//! 12. Persist the checkpoint
//!
//! # Determinism
//!
//! The driver owns one seeded RNG; every actor owns a fork of it persisted
//! with the actor. Same seed + same config = identical event streams, with or
//! without a checkpoint restore in between.

use crate::catalog::CatalogProvider;
use crate::config::{ConfigError, ProfileConfig, SimulationConfig};
use crate::core::retry::RetryPolicy;
use crate::core::time::{seconds, ClockError, ClockMode, Timestamp, TimeManager, WallClock, SECONDS_IN_DAY};
use crate::events::{CollectionError, DetachedEventRelay, EventCollection, RelayError};
use crate::managers::{PopulationModel, VariableError, VariableManager};
use crate::models::actor::Actor;
use crate::models::event::MetaAction;
use crate::models::profile_state::{ProfileStateError, VariableSet};
use crate::models::state::SimulationState;
use crate::nudge::{Nudge, NudgeSource};
use crate::orchestrator::checkpoint::{
    compute_config_hash, validate_snapshot, Lifecycle, StateSnapshot, SNAPSHOT_VERSION,
};
use crate::persistence::{CheckpointStore, PersistenceError};
use crate::rng::RngManager;
use crate::scheduler::SchedulerError;
use crate::sink::{EventSink, FallbackSpool, SpoolError};
use chrono::Duration;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

// ============================================================================
// Errors
// ============================================================================

/// Broad class of a [`SimulationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// A scheduling bug: out-of-order or out-of-bound events, clock regressions
    Integrity,
    /// Bad or mismatched configuration, detected before any tick runs
    Configuration,
    /// An external collaborator stayed unavailable past its retry budget
    External,
}

/// Simulation error types. Everything that reaches the caller is fatal;
/// transient sink failures are absorbed by the spool inside the tick.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("Invalid config: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Actor {actor_id} uses unknown profile '{profile}'")]
    UnknownProfile { actor_id: String, profile: String },

    #[error("Actor not found: {0}")]
    ActorNotFound(String),

    #[error(transparent)]
    Integrity(#[from] CollectionError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Clock(#[from] ClockError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Variable error: {0}")]
    Variable(#[from] VariableError),

    #[error("Incompatible actor state: {0}")]
    ProfileState(#[from] ProfileStateError),

    #[error("Checkpoint store failed: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Fallback spool failed: {0}")]
    Spool(#[from] SpoolError),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("State validation failed: {0}")]
    StateValidationError(String),
}

impl SimulationError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SimulationError::InvalidConfig(_)
            | SimulationError::UnknownProfile { .. }
            | SimulationError::ActorNotFound(_)
            | SimulationError::ProfileState(_)
            | SimulationError::StateValidationError(_)
            | SimulationError::Scheduler(SchedulerError::Policy(_)) => ErrorClass::Configuration,
            SimulationError::Persistence(_) | SimulationError::Spool(_) => ErrorClass::External,
            SimulationError::Integrity(_)
            | SimulationError::Relay(_)
            | SimulationError::Clock(_)
            | SimulationError::Scheduler(_)
            | SimulationError::Variable(_)
            | SimulationError::SerializationError(_) => ErrorClass::Integrity,
        }
    }
}

// ============================================================================
// Collaborators and results
// ============================================================================

/// Everything outside the simulation the driver talks to.
pub struct Collaborators {
    pub store: Box<dyn CheckpointStore>,
    pub sinks: Vec<Box<dyn EventSink>>,
    pub spool: Box<dyn FallbackSpool>,
    pub catalog: Box<dyn CatalogProvider>,
    pub nudges: Box<dyn NudgeSource>,
    pub clock: Box<dyn WallClock>,
}

/// Cooperative stop flag, checked between ticks.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of a single tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickResult {
    /// Tick number (1-based, after the tick)
    pub tick: u64,
    pub start_ts: Timestamp,
    pub end_ts: Timestamp,
    pub mode: ClockMode,
    pub log_events: usize,
    pub catalog_events: usize,
    pub meta_events: usize,
    pub actors_added: usize,
    pub actors_resurrected: usize,
    pub actors_deactivated: usize,
    pub active_actors: usize,
    pub inactive_actors: usize,
    /// Sinks whose batch went to the spool
    pub spooled_sinks: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub ticks: u64,
    pub log_events: usize,
    pub catalog_events: usize,
    pub meta_events: usize,
    pub final_ts: Option<Timestamp>,
}

impl RunSummary {
    fn record(&mut self, result: &TickResult) {
        self.ticks += 1;
        self.log_events += result.log_events;
        self.catalog_events += result.catalog_events;
        self.meta_events += result.meta_events;
        self.final_ts = Some(result.end_ts);
    }
}

/// Pair every log event in `events` with the catalog events it implies.
fn with_catalog_events(catalog: &dyn CatalogProvider, mut events: EventCollection) -> EventCollection {
    let derived = events
        .log_events()
        .iter()
        .flat_map(|event| catalog.derive_associated_catalog_events(event))
        .collect();
    events.insert_catalog_events(derived);
    events
}

/// Consequences committed by the log events of `events`.
fn consequences_of(events: &EventCollection) -> EventCollection {
    let mut consequences = EventCollection::new();
    for event in events.log_events() {
        if let Some(follow_up) = event.detached_consequences() {
            consequences.insert_events(follow_up);
        }
    }
    consequences
}

// ============================================================================
// Driver
// ============================================================================

pub struct Driver {
    config: SimulationConfig,
    profiles: BTreeMap<String, Arc<ProfileConfig>>,
    config_hash: String,
    /// Key under which checkpoints and parked actors are stored
    checkpoint_key: String,

    state: SimulationState,
    time: TimeManager,
    rng: RngManager,
    population: VariableManager<PopulationModel>,
    driver_variables: VariableSet,
    relay: DetachedEventRelay,
    last_maintenance_ts: Timestamp,

    retry: RetryPolicy,
    collaborators: Collaborators,
    stop: StopHandle,
}

impl Driver {
    /// Create a driver, resuming from the stored checkpoint if there is one.
    ///
    /// Configuration problems (invalid values, checkpoints written under a
    /// different config, actors of unknown profiles) surface here, never
    /// from [`Driver::tick`]. Batches spooled by an earlier run are replayed
    /// before returning.
    pub fn new(config: SimulationConfig, collaborators: Collaborators) -> Result<Self, SimulationError> {
        config.validate()?;

        let global = &config.global;
        let profiles = config
            .users
            .profiles
            .iter()
            .map(|(name, profile)| (name.clone(), Arc::new(profile.clone())))
            .collect();
        let config_hash = compute_config_hash(&config)?;
        let checkpoint_key = global.app_id();
        let time = TimeManager::new(global.start_ts, global.end_ts, global.tick_increment())
            .with_online_threshold(global.online_threshold());
        let retry = RetryPolicy::from_config(&global.retry);
        let start_ts = global.start_ts;

        let mut rng = RngManager::new(global.seed);
        let mut population = VariableManager::new(PopulationModel::new(config.users.population.clone()));
        let mut driver_variables = VariableSet::new();
        population.initialize(&mut driver_variables, start_ts, &mut rng);

        let mut driver = Self {
            config,
            profiles,
            config_hash,
            checkpoint_key,
            state: SimulationState::new(),
            time,
            rng,
            population,
            driver_variables,
            relay: DetachedEventRelay::new(),
            last_maintenance_ts: start_ts,
            retry,
            collaborators,
            stop: StopHandle::default(),
        };

        let checkpoint = {
            let Collaborators { store, clock, .. } = &mut driver.collaborators;
            let key = &driver.checkpoint_key;
            driver
                .retry
                .run("load_checkpoint", clock.as_mut(), || store.load_checkpoint(key))?
        };
        if let Some(snapshot) = checkpoint {
            driver.restore(snapshot)?;
        }

        driver.replay_spool()?;
        Ok(driver)
    }

    fn restore(&mut self, snapshot: StateSnapshot) -> Result<(), SimulationError> {
        validate_snapshot(&snapshot, &self.config_hash)?;

        self.time.restore(snapshot.clock, snapshot.tick_count);
        self.rng = RngManager::new(snapshot.rng_state);
        self.last_maintenance_ts = snapshot.last_maintenance_ts;
        self.driver_variables = snapshot.driver_variables;
        self.relay = snapshot.relay;

        for actor_snapshot in snapshot.actors {
            let profile = self.profile_for(&actor_snapshot.id, &actor_snapshot.state.profile_name)?;
            self.state.activate(Actor::from_snapshot(actor_snapshot, profile)?);
        }
        for summary in snapshot.inactive_actors {
            self.state.insert_inactive(summary);
        }

        info!(
            clock = %snapshot.clock,
            tick = snapshot.tick_count,
            active = self.state.active_count(),
            inactive = self.state.inactive_count(),
            "Resumed from checkpoint"
        );
        Ok(())
    }

    fn profile_for(&self, actor_id: &str, profile_name: &str) -> Result<Arc<ProfileConfig>, SimulationError> {
        self.profiles
            .get(profile_name)
            .cloned()
            .ok_or_else(|| SimulationError::UnknownProfile {
                actor_id: actor_id.to_string(),
                profile: profile_name.to_string(),
            })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn time(&self) -> &TimeManager {
        &self.time
    }

    pub fn current_ts(&self) -> Timestamp {
        self.time.last_seen_ts()
    }

    pub fn relay(&self) -> &DetachedEventRelay {
        &self.relay
    }

    pub fn population_target(&self) -> i64 {
        self.population
            .value(&self.driver_variables)
            .map_or(0, |value| value.as_i64())
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Everything needed to resume from the current clock.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            version: SNAPSHOT_VERSION,
            clock: self.time.last_seen_ts(),
            tick_count: self.time.tick_count(),
            rng_state: self.rng.get_state(),
            last_maintenance_ts: self.last_maintenance_ts,
            driver_variables: self.driver_variables.clone(),
            actors: self
                .state
                .actors()
                .map(|actor| actor.to_snapshot(Lifecycle::Active))
                .collect(),
            inactive_actors: self.state.inactive_actors().cloned().collect(),
            relay: self.relay.clone(),
            config_hash: self.config_hash.clone(),
        }
    }

    // ========================================================================
    // External operations
    // ========================================================================

    /// Queue future events; they surface in the tick whose boundary reaches
    /// them.
    pub fn schedule_detached(&mut self, events: EventCollection) -> Result<(), SimulationError> {
        self.relay.schedule(events)?;
        Ok(())
    }

    /// Drop an active actor's engagement so it goes inactive after the next
    /// tick's generation.
    pub fn force_churn(&mut self, actor_id: &str) -> Result<(), SimulationError> {
        let actor = self
            .state
            .get_actor_mut(actor_id)
            .ok_or_else(|| SimulationError::ActorNotFound(actor_id.to_string()))?;
        actor.force_churn();
        info!(actor = actor_id, "Forced churn");
        Ok(())
    }

    // ========================================================================
    // Tick Loop Implementation
    // ========================================================================

    /// Execute one simulation tick
    ///
    /// Returns an error only for fatal conditions: integrity violations,
    /// exhausted checkpoint writes, spool failures.
    pub fn tick(&mut self) -> Result<TickResult, SimulationError> {
        let now = self.collaborators.clock.now();
        let boundary = self.time.next_boundary(now);
        let tick_start = self.time.last_seen_ts();
        let tick_end = boundary.end_ts;
        let mut batch = EventCollection::new();

        // STEP 1: DRIVER VARIABLES
        for update in self
            .population
            .update(&mut self.driver_variables, tick_end, &mut self.rng)?
        {
            debug!(variable = %update.variable, value = ?update.value, ts = %update.ts, "Driver variable updated");
            batch.insert(update.into_meta_event(None));
        }

        // STEP 2: POPULATION
        let actors_added = self.maintain_population(tick_start)?;

        // STEP 3: MAINTENANCE
        let mut actors_resurrected = 0;
        if tick_end - self.last_maintenance_ts >= self.config.global.maintenance_interval() {
            actors_resurrected = self.run_maintenance(tick_start, tick_end, boundary.mode, &mut batch)?;
            self.last_maintenance_ts = tick_end;
        }

        // STEP 4: GENERATE
        {
            let catalog = self.collaborators.catalog.as_ref();
            let global = &self.config.global;
            for actor in self.state.actors_mut() {
                let events = actor.generate_events(tick_end, catalog, global)?;
                debug!(
                    actor = actor.id(),
                    log_events = events.log_events().len(),
                    meta_events = events.meta_events().len(),
                    "Generated actor events"
                );
                batch.insert_events(events);
            }
        }

        // STEP 5: META ACTIONS
        self.perform_meta_actions(&mut batch)?;

        // STEP 6: SIDE-EFFECT HOOKS
        self.relay.schedule(consequences_of(&batch))?;

        // STEP 7: RELEASE DETACHED
        let released = self.relay.release_due(tick_end);
        if !released.is_empty() {
            debug!(count = released.len(), "Released detached events");
            batch.insert_events(with_catalog_events(self.collaborators.catalog.as_ref(), released));
        }

        // STEP 8: SORT AND ASSERT INTEGRITY
        batch.sort_by_ts();
        if let Err(violation) = batch.assert_integrity(tick_end) {
            error!(tick_end = %tick_end, error = %violation, "Integrity violation");
            return Err(violation.into());
        }

        // STEP 9: DELIVER
        let spooled_sinks = self.deliver(&batch)?;

        // STEP 10: DEACTIVATE
        let inactive_ids: Vec<String> = self
            .state
            .actors()
            .filter(|actor| !actor.is_active())
            .map(|actor| actor.id().to_string())
            .collect();
        for actor_id in &inactive_ids {
            self.deactivate(actor_id)?;
        }

        // STEP 11: ADVANCE TIME
        self.time.advance_to(tick_end)?;

        // STEP 12: PERSIST
        self.persist()?;

        let result = TickResult {
            tick: self.time.tick_count(),
            start_ts: tick_start,
            end_ts: tick_end,
            mode: boundary.mode,
            log_events: batch.log_events().len(),
            catalog_events: batch.catalog_events().len(),
            meta_events: batch.meta_events().len(),
            actors_added,
            actors_resurrected,
            actors_deactivated: inactive_ids.len(),
            active_actors: self.state.active_count(),
            inactive_actors: self.state.inactive_count(),
            spooled_sinks,
        };
        info!(
            tick = result.tick,
            end_ts = %tick_end,
            mode = ?boundary.mode,
            active = result.active_actors,
            inactive = result.inactive_actors,
            log_events = result.log_events,
            catalog_events = result.catalog_events,
            meta_events = result.meta_events,
            "Tick complete"
        );
        Ok(result)
    }

    /// Tick until the configured end or a stop request. Online ticks sleep
    /// `sleep_interval_seconds` in between.
    pub fn run(&mut self) -> Result<RunSummary, SimulationError> {
        self.run_for(None)
    }

    /// Like [`Driver::run`], stopping after at most `max_ticks` ticks.
    pub fn run_for(&mut self, max_ticks: Option<u64>) -> Result<RunSummary, SimulationError> {
        let mut summary = RunSummary::default();
        loop {
            if max_ticks.is_some_and(|max| summary.ticks >= max) {
                info!(clock = %self.time.last_seen_ts(), ticks = summary.ticks, "Tick limit reached");
                break;
            }
            if self.stop.is_stopped() {
                info!(clock = %self.time.last_seen_ts(), "Stop requested");
                break;
            }
            if self.time.is_finished() {
                info!(clock = %self.time.last_seen_ts(), "Simulation end reached");
                break;
            }

            let result = match self.tick() {
                Ok(result) => result,
                Err(err) => {
                    error!(class = ?err.class(), error = %err, "Simulation stopped by fatal error");
                    return Err(err);
                }
            };
            summary.record(&result);

            if result.mode == ClockMode::Online {
                let pause = self.config.global.sleep_interval();
                self.collaborators.clock.sleep(pause);
            }
        }
        Ok(summary)
    }

    // ========================================================================
    // Population
    // ========================================================================

    /// Add actors up to the population target, or prune the oldest one when
    /// far above it. Returns the number of actors added.
    fn maintain_population(&mut self, ts: Timestamp) -> Result<usize, SimulationError> {
        let target = self.population_target().max(0) as usize;
        let active = self.state.active_count();

        if active < target {
            let count = target - active;
            let added = self.add_actors(ts, count, target)?;
            info!(requested = count, added, ts = %ts, target, "Added actors");
            return Ok(added);
        }

        let population = &self.config.users.population;
        if population.prune_oldest_registered_users && active as f64 > population.prune_threshold() {
            let oldest = self.state.first_registered(ts).map(|actor| actor.id().to_string());
            if let Some(actor_id) = oldest {
                info!(actor = %actor_id, active, "Churning oldest registered actor due to overpopulation");
                self.force_churn(&actor_id)?;
            }
        }
        Ok(0)
    }

    /// Returns how many actors were created; fewer than `count` when no
    /// profile can be picked.
    fn add_actors(&mut self, ts: Timestamp, count: usize, target: usize) -> Result<usize, SimulationError> {
        let profile_names = self.pick_profiles(count, target);
        let added = profile_names.len();
        for profile_name in profile_names {
            let id = self.rng.uuid().to_string();
            let profile = self.profile_for(&id, &profile_name)?;
            let actor_rng = self.rng.fork();
            let registration_ts = if self.config.global.randomise_registration_times {
                ts + seconds(self.rng.next_f64() * SECONDS_IN_DAY as f64)
            } else {
                ts
            };
            debug!(actor = %id, profile = %profile_name, registration_ts = %registration_ts, "Created actor");
            self.state
                .activate(Actor::create(id, profile_name, profile, ts, registration_ts, actor_rng));
        }
        Ok(added)
    }

    /// Profiles for `count` new actors, weighted by occurrence probability,
    /// or by each profile's shortfall against its share of `target` when
    /// population counts are managed per profile.
    fn pick_profiles(&mut self, count: usize, target: usize) -> Vec<String> {
        let names: Vec<String> = self.profiles.keys().cloned().collect();
        let occurrence: Vec<f64> = self
            .profiles
            .values()
            .map(|profile| profile.occurrence_probability.max(0.0))
            .collect();
        let total: f64 = occurrence.iter().sum();

        let mut counts = self.state.profile_counts();
        let mut picked = Vec::with_capacity(count);
        for _ in 0..count {
            let weights: Vec<f64> = if self.config.global.manage_population_counts_per_profile && total > 0.0 {
                let shortfalls: Vec<f64> = names
                    .iter()
                    .zip(&occurrence)
                    .map(|(name, p)| {
                        let desired = p / total * target as f64;
                        (desired - counts.get(name).copied().unwrap_or(0) as f64).max(0.0)
                    })
                    .collect();
                if shortfalls.iter().any(|s| *s > 0.0) {
                    shortfalls
                } else {
                    occurrence.clone()
                }
            } else {
                occurrence.clone()
            };

            let Some(index) = self.rng.weighted_index(&weights) else {
                break;
            };
            let name = names[index].clone();
            *counts.entry(name.clone()).or_insert(0) += 1;
            picked.push(name);
        }
        picked
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Nudge-driven and random resurrections. Returns how many actors came
    /// back.
    fn run_maintenance(
        &mut self,
        tick_start: Timestamp,
        tick_end: Timestamp,
        mode: ClockMode,
        batch: &mut EventCollection,
    ) -> Result<usize, SimulationError> {
        debug!(ts = %tick_start, inactive = self.state.inactive_count(), "Running maintenance");
        let mut resurrected = 0;
        let population = self.config.users.population.clone();

        // Nudge checks only make sense close to real time
        if self.config.global.use_nudges
            && population.inactive_nudge_check_ratio_per_hour > 0.0
            && mode == ClockMode::Online
            && self.state.inactive_count() > 0
        {
            let ids = self.state.inactive_ids();
            let hours = (tick_end - self.last_maintenance_ts).num_seconds() as f64 / 3600.0;
            let ratio = population.inactive_nudge_check_ratio_per_hour * hours;
            let check_count = ((ratio * ids.len() as f64).round() as usize).max(1);
            let checked: BTreeSet<String> = (0..check_count)
                .map(|_| ids[self.rng.int_in_range(0, ids.len() as i64) as usize].clone())
                .collect();
            info!(count = checked.len(), "Checking inactive actors for nudges");

            for actor_id in checked {
                if self.resurrect_with_nudges(&actor_id, tick_start, batch)? {
                    resurrected += 1;
                }
            }
        }

        if population.resurrection_probability > 0.0
            && self.state.inactive_count() > 0
            && self.rng.chance(population.resurrection_probability)
        {
            let ids = self.state.inactive_ids();
            let actor_id = ids[self.rng.int_in_range(0, ids.len() as i64) as usize].clone();
            info!(actor = %actor_id, ts = %tick_start, "Resurrecting a random actor");
            let mut actor = self.rehydrate(&actor_id, tick_start)?;
            actor.boost_engagement(1.0);
            self.state.activate(actor);
            resurrected += 1;
        }

        Ok(resurrected)
    }

    /// Load a parked actor and restart its clock at `ts`.
    fn rehydrate(&mut self, actor_id: &str, ts: Timestamp) -> Result<Actor, SimulationError> {
        let snapshot = {
            let Collaborators { store, clock, .. } = &mut self.collaborators;
            let key = &self.checkpoint_key;
            self.retry
                .run("load_actor", clock.as_mut(), || store.load_actor(key, actor_id))?
        }
        .ok_or_else(|| SimulationError::ActorNotFound(actor_id.to_string()))?;

        let profile = self.profile_for(actor_id, &snapshot.state.profile_name)?;
        let mut actor = Actor::from_snapshot(snapshot, profile)?;
        actor.resume_at(ts)?;
        Ok(actor)
    }

    /// Retrieve nudges for an actor; failures are logged and treated as "no
    /// nudges" so the check is simply repeated later.
    fn fetch_nudges(&mut self, actor_id: &str, since: Option<Timestamp>, until: Timestamp) -> Vec<Nudge> {
        let Collaborators { nudges, clock, .. } = &mut self.collaborators;
        match self.retry.run("retrieve_nudges", clock.as_mut(), || {
            nudges.retrieve_nudges(actor_id, since, until)
        }) {
            Ok(found) => found,
            Err(err) => {
                warn!(actor = actor_id, error = %err, "Nudge retrieval failed");
                Vec::new()
            }
        }
    }

    /// Returns true if the actor became active again.
    fn resurrect_with_nudges(
        &mut self,
        actor_id: &str,
        ts: Timestamp,
        batch: &mut EventCollection,
    ) -> Result<bool, SimulationError> {
        let Some(summary) = self.state.get_inactive(actor_id).cloned() else {
            return Ok(false);
        };
        let since = summary.last_received_nudge_ts.max(Some(summary.last_seen_ts));
        let nudges = self.fetch_nudges(actor_id, since, ts);
        if nudges.is_empty() {
            return Ok(false);
        }

        let mut actor = self.rehydrate(actor_id, ts)?;
        let responses = actor.receive_nudges(&nudges, ts, self.collaborators.catalog.as_ref(), &self.config.global);
        batch.insert_events(with_catalog_events(self.collaborators.catalog.as_ref(), responses));

        if actor.is_active() {
            info!(actor = actor_id, nudges = nudges.len(), "Resurrected by nudges");
            self.state.activate(actor);
            Ok(true)
        } else {
            self.park(&actor)?;
            self.state.insert_inactive(actor.summary());
            Ok(false)
        }
    }

    /// Perform the ReceiveNudges meta events of this tick in timestamp order.
    fn perform_meta_actions(&mut self, batch: &mut EventCollection) -> Result<(), SimulationError> {
        let checks: Vec<(Timestamp, String)> = batch
            .meta_events()
            .iter()
            .filter(|event| event.action == MetaAction::ReceiveNudges)
            .filter_map(|event| event.actor_id.clone().map(|id| (event.ts, id)))
            .collect();

        for (ts, actor_id) in checks {
            let Some(since) = self
                .state
                .get_actor(&actor_id)
                .map(|actor| actor.state().last_received_nudge_ts)
            else {
                continue;
            };
            let nudges = self.fetch_nudges(&actor_id, since, ts);
            if nudges.is_empty() {
                continue;
            }

            let catalog = self.collaborators.catalog.as_ref();
            let Some(actor) = self.state.get_actor_mut(&actor_id) else {
                continue;
            };
            let responses = actor.receive_nudges(&nudges, ts, catalog, &self.config.global);
            debug!(actor = %actor_id, nudges = nudges.len(), responses = responses.len(), "Performed nudge check");
            batch.insert_events(with_catalog_events(catalog, responses));
        }
        Ok(())
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    /// Deliver to every sink; a sink that stays unavailable gets the batch
    /// spooled instead. Returns the names of spooled sinks.
    fn deliver(&mut self, batch: &EventCollection) -> Result<Vec<String>, SimulationError> {
        let mut spooled = Vec::new();
        if batch.is_empty() {
            return Ok(spooled);
        }

        let Collaborators { sinks, spool, clock, .. } = &mut self.collaborators;
        for sink in sinks.iter_mut() {
            let name = sink.name().to_string();
            if let Err(err) = self.retry.run(&name, clock.as_mut(), || sink.deliver(batch)) {
                error!(sink = %name, error = %err, events = batch.len(), "Delivery retries exhausted, spooling batch");
                spool.spool(&name, batch)?;
                spooled.push(name);
            }
        }
        Ok(spooled)
    }

    /// Deliver batches spooled by an earlier run. A batch that fails again
    /// goes back to the spool.
    fn replay_spool(&mut self) -> Result<(), SimulationError> {
        let Collaborators { sinks, spool, clock, .. } = &mut self.collaborators;
        for sink in sinks.iter_mut() {
            let name = sink.name().to_string();
            let Some(parked) = spool.drain(&name)? else {
                continue;
            };
            match self.retry.run(&name, clock.as_mut(), || sink.deliver(&parked)) {
                Ok(()) => info!(sink = %name, events = parked.len(), "Replayed spooled batch"),
                Err(err) => {
                    warn!(sink = %name, error = %err, "Spooled batch replay failed, keeping it spooled");
                    spool.spool(&name, &parked)?;
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Lifecycle and persistence
    // ========================================================================

    /// Move an actor out of the active set. Its look-ahead (and what that
    /// look-ahead commits to) goes to the relay; its state goes to the store.
    fn deactivate(&mut self, actor_id: &str) -> Result<(), SimulationError> {
        let Some(mut actor) = self.state.deactivate(actor_id) else {
            return Ok(());
        };
        let pending = actor.take_pending();
        let consequences = consequences_of(&pending);
        self.relay.schedule(pending)?;
        self.relay.schedule(consequences)?;
        self.park(&actor)?;
        info!(actor = actor_id, last_seen = %actor.last_seen_ts(), "Actor became inactive");
        Ok(())
    }

    fn park(&mut self, actor: &Actor) -> Result<(), SimulationError> {
        let snapshot = actor.to_snapshot(Lifecycle::Inactive);
        let Collaborators { store, clock, .. } = &mut self.collaborators;
        let key = &self.checkpoint_key;
        self.retry
            .run("store_actor", clock.as_mut(), || store.store_actor(key, &snapshot))?;
        Ok(())
    }

    /// Commit the checkpoint; exhausting the retry budget is fatal.
    fn persist(&mut self) -> Result<(), SimulationError> {
        let snapshot = self.snapshot();
        let Collaborators { store, clock, .. } = &mut self.collaborators;
        let key = &self.checkpoint_key;
        if let Err(err) = self
            .retry
            .run("save_checkpoint", clock.as_mut(), || store.save_checkpoint(key, &snapshot))
        {
            error!(error = %err, clock = %snapshot.clock, "Checkpoint write failed");
            return Err(err.into());
        }
        Ok(())
    }

    /// Time until the simulated clock catches up with real time.
    pub fn lag(&self) -> Duration {
        self.collaborators.clock.now() - self.time.last_seen_ts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ReferenceCatalog;
    use crate::config::{BehaviorKind, EventTypeKind, ScheduleConfig};
    use crate::core::time::ManualClock;
    use crate::managers::PopulationConfig;
    use crate::models::log_event::{IdentifyAction, LogAction};
    use crate::nudge::NoNudges;
    use crate::persistence::MemoryStore;
    use crate::sink::{MemorySink, MemorySpool};
    use chrono::TimeZone;

    fn base() -> Timestamp {
        chrono::Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
    }

    fn config(actors: i64, ticks: i64) -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.global.start_ts = base();
        config.global.end_ts = Some(base() + Duration::minutes(ticks));
        config.global.tick_increment_seconds = 60;
        config.global.randomise_registration_times = false;
        config.global.retry.initial_backoff_ms = 1;
        config.global.retry.max_attempts = 2;
        config.users.population = PopulationConfig::fixed(actors);
        config.users.profiles.insert(
            "steady".to_string(),
            ProfileConfig {
                user_type: BehaviorKind::EventPerPeriod,
                occurrence_probability: 1.0,
                event_probabilities: [(EventTypeKind::Page, 1.0)].into_iter().collect(),
                schedule: ScheduleConfig {
                    seconds_per_event: 10,
                    ..ScheduleConfig::default()
                },
                ..ProfileConfig::default()
            },
        );
        config
    }

    fn driver(config: SimulationConfig, store: MemoryStore, sink: MemorySink, spool: MemorySpool) -> Driver {
        let catalog = ReferenceCatalog::from_config(&config);
        Driver::new(
            config,
            Collaborators {
                store: Box::new(store),
                sinks: vec![Box::new(sink)],
                spool: Box::new(spool),
                catalog: Box::new(catalog),
                nudges: Box::new(NoNudges),
                clock: Box::new(ManualClock::new(base() + Duration::days(3650))),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_population_created_on_first_tick() {
        let sink = MemorySink::default();
        let mut driver = driver(config(3, 5), MemoryStore::new(), sink.clone(), MemorySpool::new());

        let result = driver.tick().unwrap();
        assert_eq!(result.actors_added, 3);
        assert_eq!(result.mode, ClockMode::Offline);
        assert_eq!(result.end_ts, base() + Duration::minutes(1));

        let registrations = sink
            .events()
            .log_events()
            .iter()
            .filter(|e| {
                e.action
                    == LogAction::Identify {
                        action: IdentifyAction::Register,
                    }
            })
            .count();
        assert_eq!(registrations, 3);
    }

    #[test]
    fn test_added_count_reflects_actors_created() {
        let mut driver = driver(config(3, 5), MemoryStore::new(), MemorySink::default(), MemorySpool::new());
        // No profile left to pick from
        for profile in driver.profiles.values_mut() {
            *profile = Arc::new(ProfileConfig {
                occurrence_probability: 0.0,
                ..(**profile).clone()
            });
        }

        let result = driver.tick().unwrap();
        assert_eq!(result.actors_added, 0);
        assert_eq!(result.active_actors, 0);
    }

    #[test]
    fn test_run_stops_at_end() {
        let sink = MemorySink::default();
        let mut driver = driver(config(2, 10), MemoryStore::new(), sink.clone(), MemorySpool::new());

        let summary = driver.run().unwrap();
        assert_eq!(summary.ticks, 10);
        assert_eq!(summary.final_ts, Some(base() + Duration::minutes(10)));
        assert!(driver.time().is_finished());
        assert_eq!(sink.events().log_events().len(), summary.log_events);
    }

    #[test]
    fn test_run_for_stops_at_tick_limit() {
        let mut driver = driver(config(1, 10), MemoryStore::new(), MemorySink::default(), MemorySpool::new());
        let summary = driver.run_for(Some(4)).unwrap();
        assert_eq!(summary.ticks, 4);
        assert_eq!(driver.current_ts(), base() + Duration::minutes(4));

        // The rest of the run picks up where the limit stopped it
        let rest = driver.run_for(Some(100)).unwrap();
        assert_eq!(rest.ticks, 6);
        assert!(driver.time().is_finished());
    }

    #[test]
    fn test_online_run_sleeps_between_ticks() {
        let mut config = config(1, 0);
        config.global.end_ts = None;
        config.global.sleep_interval_seconds = 30;
        let clock = ManualClock::new(base() + Duration::minutes(5));
        let mut driver = Driver::new(
            config.clone(),
            Collaborators {
                store: Box::new(MemoryStore::new()),
                sinks: vec![Box::new(MemorySink::default())],
                spool: Box::new(MemorySpool::new()),
                catalog: Box::new(ReferenceCatalog::from_config(&config)),
                nudges: Box::new(NoNudges),
                clock: Box::new(clock.clone()),
            },
        )
        .unwrap();

        let summary = driver.run_for(Some(8)).unwrap();
        assert_eq!(summary.ticks, 8);
        assert!(clock.now() > base() + Duration::minutes(5), "online ticks slept on the wall clock");
    }

    #[test]
    fn test_stop_handle_halts_between_ticks() {
        let mut driver = driver(config(1, 10), MemoryStore::new(), MemorySink::default(), MemorySpool::new());
        driver.stop_handle().stop();
        let summary = driver.run().unwrap();
        assert_eq!(summary.ticks, 0);
    }

    #[test]
    fn test_failed_delivery_is_spooled_and_replayed() {
        let store = MemoryStore::new();
        let sink = MemorySink::default();
        let spool = MemorySpool::new();
        let mut first = driver(config(1, 5), store.clone(), sink.clone(), spool.clone());

        sink.fail_next(2);
        let result = first.tick().unwrap();
        assert_eq!(result.spooled_sinks, vec!["memory".to_string()]);
        assert!(spool.spooled_len("memory") > 0);
        assert!(sink.events().is_empty());

        // A new run replays the spooled batch before its first tick
        let _second = driver(config(1, 5), store, sink.clone(), spool.clone());
        assert_eq!(spool.spooled_len("memory"), 0);
        assert_eq!(sink.events().log_events().len(), result.log_events);
    }

    #[test]
    fn test_exhausted_checkpoint_write_is_fatal() {
        let store = MemoryStore::new();
        let mut driver = driver(config(1, 5), store.clone(), MemorySink::default(), MemorySpool::new());
        store.fail_next_writes(2);

        let err = driver.tick().unwrap_err();
        assert_eq!(err.class(), ErrorClass::External);
    }

    #[test]
    fn test_unknown_profile_is_configuration_error() {
        let err = SimulationError::UnknownProfile {
            actor_id: "a".to_string(),
            profile: "ghost".to_string(),
        };
        assert_eq!(err.class(), ErrorClass::Configuration);
    }

    #[test]
    fn test_forced_churn_moves_actor_to_relay_and_store() {
        let store = MemoryStore::new();
        let mut driver = driver(config(1, 5), store.clone(), MemorySink::default(), MemorySpool::new());
        driver.tick().unwrap();

        // Event-per-period actors never churn, so use a session actor
        let session_actor = Actor::create(
            "s1",
            "steady",
            Arc::new(ProfileConfig {
                event_probabilities: [(EventTypeKind::Page, 1.0)].into_iter().collect(),
                ..ProfileConfig::default()
            }),
            driver.current_ts(),
            driver.current_ts() - Duration::days(1),
            RngManager::new(4),
        );
        driver.state.activate(session_actor);
        driver.force_churn("s1").unwrap();
        driver.tick().unwrap();

        assert!(driver.state().get_actor("s1").is_none());
        assert!(driver.state().get_inactive("s1").is_some());
        assert_eq!(store.actor_count(&driver.config().global.app_id()), 1);
        assert!(matches!(
            driver.force_churn("nobody"),
            Err(SimulationError::ActorNotFound(_))
        ));
    }

    #[test]
    fn test_random_resurrection_restores_parked_actor() {
        let mut config = config(1, 5);
        config.users.population.resurrection_probability = 1.0;
        config.global.maintenance_interval_seconds = 60;
        let session = ProfileConfig {
            event_probabilities: [(EventTypeKind::Page, 1.0)].into_iter().collect(),
            ..ProfileConfig::default()
        };
        config.users.profiles.insert("session".to_string(), session.clone());
        let mut driver = driver(config, MemoryStore::new(), MemorySink::default(), MemorySpool::new());
        driver.tick().unwrap();

        let session_actor = Actor::create(
            "s1",
            "session",
            Arc::new(session),
            driver.current_ts(),
            driver.current_ts() - Duration::days(1),
            RngManager::new(4),
        );
        driver.state.activate(session_actor);
        driver.force_churn("s1").unwrap();
        driver.tick().unwrap();
        assert!(driver.state().get_inactive("s1").is_some());

        let result = driver.tick().unwrap();
        assert_eq!(result.actors_resurrected, 1);
        let actor = driver.state().get_actor("s1").expect("actor is active again");
        assert!(actor.is_active());
        assert_eq!(actor.last_seen_ts(), result.end_ts);
        assert!(driver.state().get_inactive("s1").is_none());
    }
}
