//! Behavior policies
//!
//! A behavior policy decides what an actor does inside one scheduling
//! window. It is consulted by the actor's scheduler only, one window at a
//! time, and never sees the global clock.
//!
//! # Policy Interface
//!
//! All policies implement [`BehaviorPolicy`]:
//!
//! ```rust
//! use synthetic_events_core_rs::config::BehaviorKind;
//! use synthetic_events_core_rs::core::time::Timestamp;
//! use synthetic_events_core_rs::events::EventCollection;
//! use synthetic_events_core_rs::policy::{BehaviorPolicy, PolicyContext, PolicyError};
//!
//! #[derive(Debug)]
//! struct Idle;
//!
//! impl BehaviorPolicy for Idle {
//!     fn kind(&self) -> BehaviorKind {
//!         BehaviorKind::EventPerPeriod
//!     }
//!
//!     fn create_custom_events(
//!         &self,
//!         _ctx: &mut PolicyContext<'_>,
//!         _window_start: Timestamp,
//!         _window_end: Timestamp,
//!     ) -> Result<Option<EventCollection>, PolicyError> {
//!         Ok(None)
//!     }
//! }
//! ```
//!
//! Available policies, picked per profile by [`create_policy`]:
//! 1. **EventPerPeriod**: one event every fixed period, always active
//! 2. **SessionEngagement**: daily sessions driven by an engagement level
//! 3. **PurchaseEngagement**: sessions plus a shop-item purchase funnel

pub mod fixed_period;
pub mod generator;
pub mod purchase;
pub mod session;

use crate::catalog::CatalogProvider;
use crate::config::{BehaviorKind, GlobalConfig, ProfileConfig};
use crate::core::time::Timestamp;
use crate::events::EventCollection;
use crate::managers::EngagementModel;
use crate::models::event::CatalogType;
use crate::models::log_event::LogEvent;
use crate::models::profile_state::ProfileState;
use crate::nudge::Nudge;
use crate::rng::RngManager;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use fixed_period::EventPerPeriodPolicy;
pub use purchase::{PurchasePolicy, PURCHASE_ENGAGEMENT};
pub use session::{SessionPolicy, SESSION_ENGAGEMENT};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("No event type has a positive probability")]
    NoEventTypes,

    #[error("Catalog '{catalog_type}' has no records to pick from")]
    EmptyCatalog { catalog_type: CatalogType },
}

/// Everything a policy may read or change while filling a window.
pub struct PolicyContext<'a> {
    pub actor_id: &'a str,
    pub global: &'a GlobalConfig,
    pub catalog: &'a dyn CatalogProvider,
    pub state: &'a mut ProfileState,
    pub rng: &'a mut RngManager,
}

pub trait BehaviorPolicy: fmt::Debug {
    fn kind(&self) -> BehaviorKind;

    /// Engagement variables the actor's scheduler keeps up to date.
    fn variables(&self) -> Vec<EngagementModel> {
        Vec::new()
    }

    /// Engagement level that decides whether the actor is active.
    fn activity_variable(&self) -> Option<&EngagementModel> {
        None
    }

    fn is_active(&self, state: &ProfileState) -> bool {
        self.activity_variable()
            .map_or(true, |engagement| engagement.is_active(state))
    }

    /// Candidate events for `[window_start, window_end]`.
    ///
    /// Events may run past `window_end` (a session started late keeps going)
    /// but must not start before `window_start`.
    fn create_custom_events(
        &self,
        ctx: &mut PolicyContext<'_>,
        window_start: Timestamp,
        window_end: Timestamp,
    ) -> Result<Option<EventCollection>, PolicyError>;

    /// The actor's reaction to a nudge it just received, if it reacts.
    fn respond_to_nudge(
        &self,
        _ctx: &mut PolicyContext<'_>,
        _nudge: &Nudge,
        _received_ts: Timestamp,
    ) -> Option<LogEvent> {
        None
    }
}

/// Policy for actors of `profile`.
pub fn create_policy(profile: Arc<ProfileConfig>) -> Box<dyn BehaviorPolicy> {
    match profile.user_type {
        BehaviorKind::EventPerPeriod => Box::new(EventPerPeriodPolicy::new(profile)),
        BehaviorKind::SessionEngagement => Box::new(SessionPolicy::new(profile)),
        BehaviorKind::PurchaseEngagement => Box::new(PurchasePolicy::new(profile)),
    }
}
