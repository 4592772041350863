//! Actor model
//!
//! One simulated user. An actor owns:
//! - its behavior policy (picked once from its profile)
//! - its engagement variables and profile state
//! - its own random generator (a fork of the driver's)
//! - an [`ActorScheduler`] holding its local clock and look-ahead
//!
//! While active it is owned by the driver's [`crate::models::state::SimulationState`];
//! when it goes inactive it is reduced to an
//! [`InactiveActor`] summary and its full state goes to the checkpoint store.

use crate::catalog::CatalogProvider;
use crate::config::{BehaviorKind, GlobalConfig, ProfileConfig};
use crate::core::time::Timestamp;
use crate::events::EventCollection;
use crate::managers::{EngagementModel, VariableError, VariableManager};
use crate::models::event::{format_ts, CatalogEvent, CatalogType, MetaEvent};
use crate::models::log_event::{IdentifyAction, LogAction, LogEvent};
use crate::models::profile_state::{ProfileState, ProfileStateError};
use crate::models::state::InactiveActor;
use crate::nudge::Nudge;
use crate::orchestrator::checkpoint::{ActorSnapshot, Lifecycle};
use crate::policy::{create_policy, BehaviorPolicy, PolicyContext};
use crate::rng::RngManager;
use crate::scheduler::{ActorScheduler, SchedulerError, WindowSource};
use serde_json::json;
use std::sync::Arc;

/// Everything behavior-related the scheduler consults while filling windows.
#[derive(Debug)]
struct ActorBehavior {
    policy: Box<dyn BehaviorPolicy>,
    variables: Vec<VariableManager<EngagementModel>>,
    state: ProfileState,
    rng: RngManager,
}

impl ActorBehavior {
    fn new(profile: Arc<ProfileConfig>, mut state: ProfileState, mut rng: RngManager) -> Self {
        let policy = create_policy(profile);
        let variables = policy
            .variables()
            .into_iter()
            .map(|model| {
                let mut manager = VariableManager::new(model);
                let registration_ts = state.registration_ts;
                manager.initialize(&mut state, registration_ts, &mut rng);
                manager
            })
            .collect();
        Self {
            policy,
            variables,
            state,
            rng,
        }
    }

    fn context<'a>(
        &'a mut self,
        actor_id: &'a str,
        global: &'a GlobalConfig,
        catalog: &'a dyn CatalogProvider,
    ) -> (&'a dyn BehaviorPolicy, PolicyContext<'a>) {
        (
            self.policy.as_ref(),
            PolicyContext {
                actor_id,
                global,
                catalog,
                state: &mut self.state,
                rng: &mut self.rng,
            },
        )
    }
}

/// Scheduler-facing view of an actor for one `generate_events` call.
struct ActorWindow<'a> {
    actor_id: &'a str,
    behavior: &'a mut ActorBehavior,
    global: &'a GlobalConfig,
    catalog: &'a dyn CatalogProvider,
}

impl ActorWindow<'_> {
    /// Registration events, if the actor registers inside the window.
    fn registration_events(&self, ts: Timestamp) -> EventCollection {
        let state = &self.behavior.state;
        let mut events = EventCollection::new();
        events.insert(CatalogEvent::new(
            ts,
            CatalogType::User,
            self.actor_id,
            json!({
                "id": self.actor_id,
                "profile": state.profile_name,
                "registration_ts": format_ts(ts),
            }),
        ));
        events.insert(LogEvent::new(
            ts,
            self.actor_id,
            true,
            LogAction::Identify {
                action: IdentifyAction::Register,
            },
        ));
        events
    }
}

impl WindowSource for ActorWindow<'_> {
    fn create_events(
        &mut self,
        window_start: Timestamp,
        window_end: Timestamp,
    ) -> Result<Option<EventCollection>, SchedulerError> {
        let registration_ts = self.behavior.state.registration_ts;
        let mut events = EventCollection::new();
        let mut start = window_start;

        if !self.behavior.state.registered(window_start) && registration_ts <= window_end {
            events = self.registration_events(registration_ts);
            start = registration_ts;
        }
        if !self.behavior.state.registered(window_end) {
            return Ok(None);
        }

        let (policy, mut ctx) = self.behavior.context(self.actor_id, self.global, self.catalog);
        if let Some(custom) = policy.create_custom_events(&mut ctx, start, window_end)? {
            events.insert_events(custom);
        }
        Ok(Some(events))
    }

    fn update_variables(&mut self, horizon: Timestamp) -> Result<Vec<MetaEvent>, SchedulerError> {
        let behavior = &mut *self.behavior;
        let mut meta_events = Vec::new();
        for manager in &mut behavior.variables {
            for update in manager.update(&mut behavior.state, horizon, &mut behavior.rng)? {
                meta_events.push(update.into_meta_event(Some(self.actor_id)));
            }
        }
        Ok(meta_events)
    }
}

#[derive(Debug)]
pub struct Actor {
    id: String,
    scheduler: ActorScheduler,
    behavior: ActorBehavior,
}

impl Actor {
    /// New actor whose clock starts at `created_ts`.
    ///
    /// Variables start at `registration_ts`, which may lie before or after
    /// `created_ts`; the registration events are emitted in whichever window
    /// contains it.
    pub fn create(
        id: impl Into<String>,
        profile_name: impl Into<String>,
        profile: Arc<ProfileConfig>,
        created_ts: Timestamp,
        registration_ts: Timestamp,
        rng: RngManager,
    ) -> Self {
        let state = ProfileState::new(profile_name, registration_ts);
        Self {
            id: id.into(),
            scheduler: ActorScheduler::new(created_ts),
            behavior: ActorBehavior::new(profile, state, rng),
        }
    }

    /// Rehydrate a persisted actor.
    pub fn from_snapshot(snapshot: ActorSnapshot, profile: Arc<ProfileConfig>) -> Result<Self, ProfileStateError> {
        snapshot.state.check_version()?;
        Ok(Self {
            id: snapshot.id,
            scheduler: snapshot.scheduler,
            behavior: ActorBehavior::new(profile, snapshot.state, RngManager::new(snapshot.rng_state)),
        })
    }

    pub fn to_snapshot(&self, lifecycle: Lifecycle) -> ActorSnapshot {
        ActorSnapshot {
            id: self.id.clone(),
            lifecycle,
            rng_state: self.behavior.rng.get_state(),
            scheduler: self.scheduler.clone(),
            state: self.behavior.state.clone(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> BehaviorKind {
        self.behavior.policy.kind()
    }

    pub fn profile_name(&self) -> &str {
        &self.behavior.state.profile_name
    }

    pub fn state(&self) -> &ProfileState {
        &self.behavior.state
    }

    pub fn scheduler(&self) -> &ActorScheduler {
        &self.scheduler
    }

    pub fn last_seen_ts(&self) -> Timestamp {
        self.scheduler.last_seen_ts()
    }

    pub fn registration_ts(&self) -> Timestamp {
        self.behavior.state.registration_ts
    }

    /// Everything this actor did up to `end_ts`.
    pub fn generate_events(
        &mut self,
        end_ts: Timestamp,
        catalog: &dyn CatalogProvider,
        global: &GlobalConfig,
    ) -> Result<EventCollection, SchedulerError> {
        let mut window = ActorWindow {
            actor_id: &self.id,
            behavior: &mut self.behavior,
            global,
            catalog,
        };
        self.scheduler.generate_events(end_ts, &mut window, catalog)
    }

    pub fn is_active(&self) -> bool {
        self.behavior.policy.is_active(&self.behavior.state)
    }

    /// Drop engagement to zero; the actor goes inactive after its current
    /// tick.
    pub fn force_churn(&mut self) {
        self.boost_engagement(-1.0);
    }

    /// Out-of-band engagement change. Returns the new level, `None` for
    /// policies without an engagement variable.
    pub fn boost_engagement(&mut self, delta: f64) -> Option<f64> {
        let engagement = self.behavior.policy.activity_variable()?;
        engagement.adjust(&mut self.behavior.state, delta)
    }

    /// React to nudges received at `received_ts`.
    ///
    /// Nudges already seen are skipped. If the actor reacts to anything its
    /// look-ahead is dropped so the next window is planned with the changed
    /// engagement.
    pub fn receive_nudges(
        &mut self,
        nudges: &[Nudge],
        received_ts: Timestamp,
        catalog: &dyn CatalogProvider,
        global: &GlobalConfig,
    ) -> EventCollection {
        let seen_through = self.behavior.state.last_received_nudge_ts;
        let mut responses = EventCollection::new();
        for nudge in nudges {
            let already_seen = seen_through.map_or(false, |last| nudge.queued_at <= last);
            if already_seen || nudge.queued_at > received_ts {
                continue;
            }
            let (policy, mut ctx) = self.behavior.context(&self.id, global, catalog);
            if let Some(response) = policy.respond_to_nudge(&mut ctx, nudge, received_ts) {
                responses.insert(response);
            }
        }

        if !responses.is_empty() {
            self.scheduler.discard_schedule();
        }
        responses
    }

    /// Restart at `ts` after a period of inactivity.
    ///
    /// Variables catch up silently: the increments that fell into the
    /// inactive period change the state but emit nothing.
    pub fn resume_at(&mut self, ts: Timestamp) -> Result<(), VariableError> {
        self.scheduler.resume_at(ts);
        let resumed_at = self.scheduler.last_seen_ts();
        let behavior = &mut self.behavior;
        for manager in &mut behavior.variables {
            manager.update(&mut behavior.state, resumed_at, &mut behavior.rng)?;
        }
        Ok(())
    }

    /// Hand over the look-ahead (the actor is going inactive).
    pub fn take_pending(&mut self) -> EventCollection {
        self.scheduler.discard_schedule()
    }

    pub fn summary(&self) -> InactiveActor {
        InactiveActor {
            id: self.id.clone(),
            profile_name: self.behavior.state.profile_name.clone(),
            registration_ts: self.behavior.state.registration_ts,
            last_seen_ts: self.scheduler.last_seen_ts(),
            last_received_nudge_ts: self.behavior.state.last_received_nudge_ts,
        }
    }
}
