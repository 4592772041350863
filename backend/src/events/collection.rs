//! Ordered, mergeable event container.
//!
//! An [`EventCollection`] keeps three independently time-ordered sequences
//! (log, catalog, meta). The same type serves as an actor's look-ahead
//! buffer, as the process-wide detached-event relay and as a tick's output
//! batch.
//!
//! # Ordering
//!
//! Inserts are stable merges: among events with equal timestamps, events
//! already in the collection come first and inserted events keep their
//! relative order.
//!
//! # Boundary rule
//!
//! [`EventCollection::pop_events_before`] is asymmetric: log events are due
//! when `ts < bound`, catalog and meta events when `ts <= bound`. A catalog or
//! meta event stamped exactly at a tick boundary is released in that tick; a
//! log event stamped exactly at the boundary waits for the next one.

use crate::core::time::Timestamp;
use crate::models::event::{CatalogEvent, Event, EventKind, MetaEvent, Timestamped};
use crate::models::log_event::LogEvent;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CollectionError {
    #[error("Integrity violation: {kind} event at {ts} exceeds bound {bound}")]
    IntegrityViolation {
        kind: EventKind,
        ts: Timestamp,
        bound: Timestamp,
    },

    #[error("Integrity violation: {kind} events out of order ({earlier} after {later})")]
    OutOfOrder {
        kind: EventKind,
        earlier: Timestamp,
        later: Timestamp,
    },
}

/// Three time-ordered event sequences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventCollection {
    log_events: Vec<LogEvent>,
    catalog_events: Vec<CatalogEvent>,
    meta_events: Vec<MetaEvent>,
}

impl EventCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from unsorted parts (stable sort per sequence).
    pub fn from_parts(
        mut log_events: Vec<LogEvent>,
        mut catalog_events: Vec<CatalogEvent>,
        mut meta_events: Vec<MetaEvent>,
    ) -> Self {
        log_events.sort_by_key(|e| e.ts);
        catalog_events.sort_by_key(|e| e.ts);
        meta_events.sort_by_key(|e| e.ts);
        Self {
            log_events,
            catalog_events,
            meta_events,
        }
    }

    pub fn log_events(&self) -> &[LogEvent] {
        &self.log_events
    }

    pub fn catalog_events(&self) -> &[CatalogEvent] {
        &self.catalog_events
    }

    pub fn meta_events(&self) -> &[MetaEvent] {
        &self.meta_events
    }

    /// Insert one event after any existing event with the same timestamp.
    pub fn insert(&mut self, event: impl Into<Event>) {
        match event.into() {
            Event::Log(e) => insert_sorted(&mut self.log_events, e),
            Event::Catalog(e) => insert_sorted(&mut self.catalog_events, e),
            Event::Meta(e) => insert_sorted(&mut self.meta_events, e),
        }
    }

    /// Merge another collection into this one.
    pub fn insert_events(&mut self, other: EventCollection) {
        merge_sorted(&mut self.log_events, other.log_events);
        merge_sorted(&mut self.catalog_events, other.catalog_events);
        merge_sorted(&mut self.meta_events, other.meta_events);
    }

    /// Remove and return every event due by `ts`.
    ///
    /// Log events: `event.ts < ts`. Catalog and meta events: `event.ts <= ts`.
    pub fn pop_events_before(&mut self, ts: Timestamp) -> EventCollection {
        let log_split = self.log_events.partition_point(|e| e.ts < ts);
        let catalog_split = self.catalog_events.partition_point(|e| e.ts <= ts);
        let meta_split = self.meta_events.partition_point(|e| e.ts <= ts);

        EventCollection {
            log_events: self.log_events.drain(..log_split).collect(),
            catalog_events: self.catalog_events.drain(..catalog_split).collect(),
            meta_events: self.meta_events.drain(..meta_split).collect(),
        }
    }

    /// Take everything, leaving the collection empty.
    pub fn take(&mut self) -> EventCollection {
        std::mem::take(self)
    }

    /// Every event must satisfy `ts <= current_ts` and each sequence must be
    /// non-decreasing.
    pub fn assert_integrity(&self, current_ts: Timestamp) -> Result<(), CollectionError> {
        check_sequence(&self.log_events, EventKind::Log, current_ts)?;
        check_sequence(&self.catalog_events, EventKind::Catalog, current_ts)?;
        check_sequence(&self.meta_events, EventKind::Meta, current_ts)
    }

    /// Stable sort of all three sequences.
    pub fn sort_by_ts(&mut self) {
        self.log_events.sort_by_key(|e| e.ts);
        self.catalog_events.sort_by_key(|e| e.ts);
        self.meta_events.sort_by_key(|e| e.ts);
    }

    pub fn is_empty(&self) -> bool {
        self.log_events.is_empty() && self.catalog_events.is_empty() && self.meta_events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.log_events.len() + self.catalog_events.len() + self.meta_events.len()
    }

    /// Latest timestamp across all sequences, `None` when empty.
    pub fn get_latest_ts(&self) -> Option<Timestamp> {
        [
            self.log_events.last().map(|e| e.ts),
            self.catalog_events.last().map(|e| e.ts),
            self.meta_events.last().map(|e| e.ts),
        ]
        .into_iter()
        .flatten()
        .max()
    }

    /// Earliest timestamp across all sequences, `None` when empty.
    pub fn get_earliest_ts(&self) -> Option<Timestamp> {
        [
            self.log_events.first().map(|e| e.ts),
            self.catalog_events.first().map(|e| e.ts),
            self.meta_events.first().map(|e| e.ts),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    pub fn clear(&mut self) {
        self.log_events.clear();
        self.catalog_events.clear();
        self.meta_events.clear();
    }

    /// Append catalog events (merged into order).
    pub fn insert_catalog_events(&mut self, events: Vec<CatalogEvent>) {
        let mut sorted = events;
        sorted.sort_by_key(|e| e.ts);
        merge_sorted(&mut self.catalog_events, sorted);
    }

    /// Drain the meta sequence.
    pub fn take_meta_events(&mut self) -> Vec<MetaEvent> {
        std::mem::take(&mut self.meta_events)
    }

    /// Consume into the three sequences.
    pub fn into_parts(self) -> (Vec<LogEvent>, Vec<CatalogEvent>, Vec<MetaEvent>) {
        (self.log_events, self.catalog_events, self.meta_events)
    }
}

fn insert_sorted<T: Timestamped>(events: &mut Vec<T>, event: T) {
    let ts = event.ts();
    let index = events.partition_point(|e| e.ts() <= ts);
    events.insert(index, event);
}

/// Stable O(n + m) merge of two sorted sequences; `existing` wins ties.
fn merge_sorted<T: Timestamped>(existing: &mut Vec<T>, incoming: Vec<T>) {
    if incoming.is_empty() {
        return;
    }
    if existing.is_empty() {
        *existing = incoming;
        return;
    }
    // Fast path: everything incoming is at or after the current tail
    if let (Some(last), Some(first)) = (existing.last(), incoming.first()) {
        if last.ts() <= first.ts() {
            existing.extend(incoming);
            return;
        }
    }

    let mut merged = Vec::with_capacity(existing.len() + incoming.len());
    let mut left = std::mem::take(existing).into_iter().peekable();
    let mut right = incoming.into_iter().peekable();

    loop {
        let take_left = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => l.ts() <= r.ts(),
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_left { left.next() } else { right.next() };
        if let Some(event) = next {
            merged.push(event);
        }
    }

    *existing = merged;
}

fn check_sequence<T: Timestamped>(
    events: &[T],
    kind: EventKind,
    bound: Timestamp,
) -> Result<(), CollectionError> {
    let mut previous: Option<Timestamp> = None;
    for event in events {
        let ts = event.ts();
        if ts > bound {
            return Err(CollectionError::IntegrityViolation { kind, ts, bound });
        }
        if let Some(prev) = previous {
            if ts < prev {
                return Err(CollectionError::OutOfOrder {
                    kind,
                    earlier: ts,
                    later: prev,
                });
            }
        }
        previous = Some(ts);
    }
    Ok(())
}
