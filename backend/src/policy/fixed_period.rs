//! Event-per-period policy: one event of a weighted type every
//! `seconds_per_event`, from the window start while a full period fits.
//!
//! The actor is always active and always online. Useful as a steady load
//! generator.

use crate::config::{BehaviorKind, ProfileConfig};
use crate::core::time::Timestamp;
use crate::events::EventCollection;
use crate::policy::generator;
use crate::policy::{BehaviorPolicy, PolicyContext, PolicyError};
use chrono::Duration;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct EventPerPeriodPolicy {
    profile: Arc<ProfileConfig>,
}

impl EventPerPeriodPolicy {
    pub fn new(profile: Arc<ProfileConfig>) -> Self {
        Self { profile }
    }

    pub fn period(&self) -> Duration {
        Duration::seconds(self.profile.schedule.seconds_per_event)
    }
}

impl BehaviorPolicy for EventPerPeriodPolicy {
    fn kind(&self) -> BehaviorKind {
        BehaviorKind::EventPerPeriod
    }

    fn create_custom_events(
        &self,
        ctx: &mut PolicyContext<'_>,
        window_start: Timestamp,
        window_end: Timestamp,
    ) -> Result<Option<EventCollection>, PolicyError> {
        let period = self.period();
        if period <= Duration::zero() {
            return Ok(None);
        }

        let mut log_events = Vec::new();
        let mut ts = window_start;
        while window_end - ts >= period {
            let kind = generator::pick_event_type(ctx.rng, &self.profile.event_probabilities)?;
            log_events.push(generator::single_event(ctx, kind, ts, true)?);
            ts += period;
        }

        Ok(Some(EventCollection::from_parts(log_events, Vec::new(), Vec::new())))
    }
}
