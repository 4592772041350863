//! Per-actor event scheduling.
//!
//! An [`ActorScheduler`] answers "what happened for this actor between its
//! last known instant and `end_ts`" while only simulating forward, one
//! fixed window (one day) at a time:
//!
//! ```text
//! last_seen_ts ──────────── end_ts
//!      │   pending buffer    │
//!      └──── schedule_end_ts ┴──► next window filled on demand
//! ```
//!
//! # Invariants
//!
//! - `last_seen_ts <= schedule_end_ts`
//! - every pending event has `ts >= last_seen_ts`
//! - after `generate_events(end_ts)`, `last_seen_ts == end_ts`
//!
//! Behavior is only consulted in [`ActorScheduler::fill_event_schedule`], so
//! generating a week at once or an hour at a time walks through the same
//! windows and leaves the actor in the same state.

use crate::catalog::CatalogProvider;
use crate::core::time::{schedule_window, Timestamp};
use crate::events::EventCollection;
use crate::managers::VariableError;
use crate::models::event::MetaEvent;
use crate::policy::PolicyError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Variable(#[from] VariableError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("Clock regression: events requested up to {requested}, already seen {last_seen}")]
    ClockRegression {
        last_seen: Timestamp,
        requested: Timestamp,
    },

    #[error("Behavior produced an event at {ts} before window start {window_start}")]
    EventBeforeWindow {
        ts: Timestamp,
        window_start: Timestamp,
    },
}

/// Actor-specific side of the scheduler: behavior and periodic variables.
pub trait WindowSource {
    /// Candidate events for `[window_start, window_end]`, `None` when the
    /// actor has nothing to do. Events may run past `window_end` but never
    /// start before `window_start`.
    fn create_events(
        &mut self,
        window_start: Timestamp,
        window_end: Timestamp,
    ) -> Result<Option<EventCollection>, SchedulerError>;

    /// Advance every periodic variable to `horizon`; one meta event per
    /// increment, stamped at the increment boundary.
    fn update_variables(&mut self, horizon: Timestamp) -> Result<Vec<MetaEvent>, SchedulerError>;
}

/// Local clock, look-ahead horizon and pending buffer of one actor.
///
/// Serializable as a whole so a restored actor continues from exactly the
/// look-ahead it had planned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorScheduler {
    last_seen_ts: Timestamp,
    schedule_end_ts: Timestamp,
    pending: EventCollection,
}

impl ActorScheduler {
    /// Scheduler whose clock starts at `last_seen_ts` with nothing planned.
    pub fn new(last_seen_ts: Timestamp) -> Self {
        Self {
            last_seen_ts,
            schedule_end_ts: last_seen_ts,
            pending: EventCollection::new(),
        }
    }

    pub fn last_seen_ts(&self) -> Timestamp {
        self.last_seen_ts
    }

    pub fn schedule_end_ts(&self) -> Timestamp {
        self.schedule_end_ts
    }

    pub fn pending(&self) -> &EventCollection {
        &self.pending
    }

    /// Everything due up to `end_ts`.
    ///
    /// Fills whole windows until the horizon covers `end_ts`, releases the
    /// due part of the buffer (log events strictly before `end_ts`, catalog
    /// and meta events up to and including it), pairs every log event with
    /// its catalog events and moves the clock to `end_ts`.
    pub fn generate_events<W: WindowSource + ?Sized>(
        &mut self,
        end_ts: Timestamp,
        source: &mut W,
        catalog: &dyn CatalogProvider,
    ) -> Result<EventCollection, SchedulerError> {
        if end_ts < self.last_seen_ts {
            return Err(SchedulerError::ClockRegression {
                last_seen: self.last_seen_ts,
                requested: end_ts,
            });
        }

        let mut generated = EventCollection::new();
        while self.schedule_end_ts < end_ts {
            generated.insert_events(self.pending.take());
            self.fill_event_schedule(source)?;
        }

        generated.insert_events(self.pending.pop_events_before(end_ts));
        self.last_seen_ts = end_ts;

        let catalog_events = generated
            .log_events()
            .iter()
            .flat_map(|event| catalog.derive_associated_catalog_events(event))
            .collect();
        generated.insert_catalog_events(catalog_events);

        Ok(generated)
    }

    /// Extend the horizon by one window.
    ///
    /// The horizon ends up covering everything in the buffer: a session that
    /// starts late in the window and runs past its end widens the horizon
    /// instead of being cut off. Variables advance to the widened horizon so
    /// their updates never land before the next window starts.
    pub fn fill_event_schedule<W: WindowSource + ?Sized>(
        &mut self,
        source: &mut W,
    ) -> Result<(), SchedulerError> {
        let window_start = self.schedule_end_ts;
        let candidate_end = window_start + schedule_window();

        if let Some(events) = source.create_events(window_start, candidate_end)? {
            if let Some(earliest) = events.get_earliest_ts() {
                if earliest < window_start {
                    return Err(SchedulerError::EventBeforeWindow {
                        ts: earliest,
                        window_start,
                    });
                }
            }
            self.pending.insert_events(events);
        }

        let horizon = self
            .pending
            .get_latest_ts()
            .map_or(candidate_end, |latest| latest.max(candidate_end));

        for meta in source.update_variables(horizon)? {
            self.pending.insert(meta);
        }

        self.schedule_end_ts = self
            .pending
            .get_latest_ts()
            .map_or(horizon, |latest| latest.max(horizon));

        debug!(
            window_start = %window_start,
            schedule_end = %self.schedule_end_ts,
            pending = self.pending.len(),
            "Filled event schedule"
        );
        Ok(())
    }

    /// Hand over the look-ahead buffer; the next call re-plans from the
    /// current clock.
    pub fn discard_schedule(&mut self) -> EventCollection {
        self.schedule_end_ts = self.last_seen_ts;
        self.pending.take()
    }

    /// Restart the clock at `ts` with an empty schedule. Never moves the
    /// clock backwards.
    pub fn resume_at(&mut self, ts: Timestamp) {
        let ts = ts.max(self.last_seen_ts);
        self.last_seen_ts = ts;
        self.schedule_end_ts = ts;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ReferenceCatalog;
    use crate::models::event::MetaAction;
    use crate::models::log_event::{LogAction, LogEvent};
    use chrono::{Duration, TimeZone, Utc};

    fn base() -> Timestamp {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
    }

    /// One search event every `step`, optionally spilling past the window.
    struct Ticker {
        step: Duration,
        spill: Duration,
        windows: Vec<(Timestamp, Timestamp)>,
    }

    impl Ticker {
        fn new(step: Duration) -> Self {
            Self {
                step,
                spill: Duration::zero(),
                windows: Vec::new(),
            }
        }
    }

    impl WindowSource for Ticker {
        fn create_events(
            &mut self,
            window_start: Timestamp,
            window_end: Timestamp,
        ) -> Result<Option<EventCollection>, SchedulerError> {
            self.windows.push((window_start, window_end));
            let mut events = EventCollection::new();
            let mut ts = window_start;
            while ts + self.step <= window_end + self.spill {
                events.insert(LogEvent::new(
                    ts,
                    "actor",
                    true,
                    LogAction::Search {
                        query: "q".to_string(),
                        result_count: 1,
                    },
                ));
                ts += self.step;
            }
            Ok(Some(events))
        }

        fn update_variables(&mut self, _horizon: Timestamp) -> Result<Vec<MetaEvent>, SchedulerError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_clock_advances_without_events() {
        struct Idle;
        impl WindowSource for Idle {
            fn create_events(
                &mut self,
                _: Timestamp,
                _: Timestamp,
            ) -> Result<Option<EventCollection>, SchedulerError> {
                Ok(None)
            }
            fn update_variables(&mut self, _: Timestamp) -> Result<Vec<MetaEvent>, SchedulerError> {
                Ok(Vec::new())
            }
        }

        let catalog = ReferenceCatalog::new();
        let mut scheduler = ActorScheduler::new(base());
        let events = scheduler
            .generate_events(base() + Duration::days(3), &mut Idle, &catalog)
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(scheduler.last_seen_ts(), base() + Duration::days(3));
        assert_eq!(scheduler.schedule_end_ts(), base() + Duration::days(3));
    }

    #[test]
    fn test_windows_are_one_day() {
        let catalog = ReferenceCatalog::new();
        let mut source = Ticker::new(Duration::hours(6));
        let mut scheduler = ActorScheduler::new(base());

        scheduler
            .generate_events(base() + Duration::days(2) + Duration::hours(1), &mut source, &catalog)
            .unwrap();

        assert_eq!(source.windows.len(), 3);
        assert_eq!(source.windows[0], (base(), base() + Duration::days(1)));
        assert_eq!(source.windows[1].0, base() + Duration::days(1));
    }

    #[test]
    fn test_horizon_widens_to_spill_over() {
        let catalog = ReferenceCatalog::new();
        let mut source = Ticker::new(Duration::hours(6));
        source.spill = Duration::hours(13);
        let mut scheduler = ActorScheduler::new(base());

        scheduler
            .generate_events(base() + Duration::hours(1), &mut source, &catalog)
            .unwrap();

        // Events at 0, 6, 12, 18, 24, 30
        assert_eq!(scheduler.schedule_end_ts(), base() + Duration::hours(30));
        assert!(scheduler.last_seen_ts() <= scheduler.schedule_end_ts());
    }

    #[test]
    fn test_regression_rejected() {
        let catalog = ReferenceCatalog::new();
        let mut source = Ticker::new(Duration::hours(1));
        let mut scheduler = ActorScheduler::new(base() + Duration::days(1));

        let err = scheduler
            .generate_events(base(), &mut source, &catalog)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ClockRegression { .. }));
    }

    #[test]
    fn test_event_before_window_rejected() {
        struct Backdated;
        impl WindowSource for Backdated {
            fn create_events(
                &mut self,
                window_start: Timestamp,
                _: Timestamp,
            ) -> Result<Option<EventCollection>, SchedulerError> {
                let mut events = EventCollection::new();
                events.insert(MetaEvent::new(
                    window_start - Duration::seconds(1),
                    None,
                    MetaAction::ReceiveNudges,
                ));
                Ok(Some(events))
            }
            fn update_variables(&mut self, _: Timestamp) -> Result<Vec<MetaEvent>, SchedulerError> {
                Ok(Vec::new())
            }
        }

        let catalog = ReferenceCatalog::new();
        let mut scheduler = ActorScheduler::new(base());
        let err = scheduler
            .generate_events(base() + Duration::hours(1), &mut Backdated, &catalog)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::EventBeforeWindow { .. }));
    }

    #[test]
    fn test_discard_schedule_resets_horizon() {
        let catalog = ReferenceCatalog::new();
        let mut source = Ticker::new(Duration::hours(1));
        let mut scheduler = ActorScheduler::new(base());
        scheduler
            .generate_events(base() + Duration::hours(3), &mut source, &catalog)
            .unwrap();

        let dropped = scheduler.discard_schedule();
        assert!(!dropped.is_empty());
        assert!(scheduler.pending().is_empty());
        assert_eq!(scheduler.schedule_end_ts(), base() + Duration::hours(3));
    }

    #[test]
    fn test_resume_never_rewinds() {
        let mut scheduler = ActorScheduler::new(base() + Duration::days(2));
        scheduler.resume_at(base());
        assert_eq!(scheduler.last_seen_ts(), base() + Duration::days(2));
        scheduler.resume_at(base() + Duration::days(5));
        assert_eq!(scheduler.last_seen_ts(), base() + Duration::days(5));
        assert_eq!(scheduler.schedule_end_ts(), base() + Duration::days(5));
    }
}
