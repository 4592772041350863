//! Detached-event relay.
//!
//! A process-wide future-event queue. Any component may schedule events at
//! arbitrary future timestamps (a checkout's delivery, an inactive actor's
//! remaining look-ahead); the driver drains whatever is due at every tick
//! boundary. Realization is purely a function of the global clock passing
//! the event's timestamp.

use crate::core::time::Timestamp;
use crate::events::collection::EventCollection;
use crate::models::event::EventKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("Detached {kind} event at {ts} scheduled behind released boundary {released_through}")]
    AlreadyReleased {
        kind: EventKind,
        ts: Timestamp,
        released_through: Timestamp,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetachedEventRelay {
    pending: EventCollection,
    /// Last boundary passed to `release_due`
    released_through: Option<Timestamp>,
}

impl DetachedEventRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule future events.
    ///
    /// Events must still be releasable: log events at or after the last
    /// released boundary, catalog and meta events strictly after it.
    /// Anything earlier would surface out of order in a later tick.
    pub fn schedule(&mut self, events: EventCollection) -> Result<(), RelayError> {
        if let Some(released_through) = self.released_through {
            if let Some(event) = events.log_events().iter().find(|e| e.ts < released_through) {
                return Err(RelayError::AlreadyReleased {
                    kind: EventKind::Log,
                    ts: event.ts,
                    released_through,
                });
            }
            if let Some(event) = events.catalog_events().iter().find(|e| e.ts <= released_through) {
                return Err(RelayError::AlreadyReleased {
                    kind: EventKind::Catalog,
                    ts: event.ts,
                    released_through,
                });
            }
            if let Some(event) = events.meta_events().iter().find(|e| e.ts <= released_through) {
                return Err(RelayError::AlreadyReleased {
                    kind: EventKind::Meta,
                    ts: event.ts,
                    released_through,
                });
            }
        }

        self.pending.insert_events(events);
        Ok(())
    }

    /// Remove and return everything due by `tick_end`.
    pub fn release_due(&mut self, tick_end: Timestamp) -> EventCollection {
        let released = self.pending.pop_events_before(tick_end);
        self.released_through = Some(
            self.released_through
                .map_or(tick_end, |previous| previous.max(tick_end)),
        );
        released
    }

    pub fn pending(&self) -> &EventCollection {
        &self.pending
    }

    pub fn released_through(&self) -> Option<Timestamp> {
        self.released_through
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::{CatalogEvent, CatalogType};
    use crate::models::log_event::{LogAction, LogEvent};
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    fn base() -> Timestamp {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
    }

    fn delivery_at(ts: Timestamp) -> EventCollection {
        let mut events = EventCollection::new();
        events.insert(LogEvent::new(
            ts,
            "a",
            true,
            LogAction::Delivery {
                order_id: "o".to_string(),
                delivery_id: "d".to_string(),
                item_ids: vec![],
            },
        ));
        events
    }

    #[test]
    fn test_release_only_when_due() {
        let mut relay = DetachedEventRelay::new();
        relay.schedule(delivery_at(base() + Duration::days(5))).unwrap();

        for day in 1..5 {
            assert!(relay.release_due(base() + Duration::days(day)).is_empty());
        }
        // Log events are released strictly after their timestamp
        assert!(relay.release_due(base() + Duration::days(5)).is_empty());
        let released = relay.release_due(base() + Duration::days(6));
        assert_eq!(released.log_events().len(), 1);
        assert!(relay.is_empty());
    }

    #[test]
    fn test_schedule_behind_release_rejected() {
        let mut relay = DetachedEventRelay::new();
        relay.release_due(base() + Duration::hours(2));

        let err = relay.schedule(delivery_at(base() + Duration::hours(1))).unwrap_err();
        assert!(matches!(err, RelayError::AlreadyReleased { kind: EventKind::Log, .. }));

        // A log event exactly at the released boundary is still pending
        assert!(relay.schedule(delivery_at(base() + Duration::hours(2))).is_ok());

        let mut catalog = EventCollection::new();
        catalog.insert(CatalogEvent::new(
            base() + Duration::hours(2),
            CatalogType::Order,
            "o",
            json!({}),
        ));
        assert!(relay.schedule(catalog).is_err());
    }
}
