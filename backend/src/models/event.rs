//! Timestamped events produced by the simulation.
//!
//! There are exactly three kinds of event:
//! - **Log**: behavioral events performed by an actor (page views, logins,
//!   checkouts, ...). See [`crate::models::log_event`].
//! - **Catalog**: reference-data records implied by behavior (a user, an item,
//!   a video).
//! - **Meta**: internal state-change instructions (variable updates, nudge
//!   checks) stamped at the instant they take effect.
//!
//! Every event is immutable once created; its `ts` is fixed at construction.
//!
//! # Example
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use synthetic_events_core_rs::models::event::{Event, MetaAction, MetaEvent, Timestamped};
//!
//! let ts = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
//! let event = Event::Meta(MetaEvent::new(ts, Some("actor-1".to_string()), MetaAction::ReceiveNudges));
//! assert_eq!(event.ts(), ts);
//! assert_eq!(event.kind().as_str(), "meta");
//! ```

use crate::core::time::Timestamp;
use crate::models::log_event::LogEvent;
use crate::models::profile_state::VariableValue;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Anything that sits on the simulated timeline.
pub trait Timestamped {
    fn ts(&self) -> Timestamp;
}

/// The three event kinds an [`crate::events::EventCollection`] keeps apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Log,
    Catalog,
    Meta,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Log => "log",
            EventKind::Catalog => "catalog",
            EventKind::Meta => "meta",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Catalog events
// ============================================================================

/// Reference-data record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogType {
    App,
    User,
    Page,
    MediaVideo,
    MediaAudio,
    MediaImage,
    Drug,
    Blood,
    Oxygen,
    MedicalEquipment,
    Order,
}

impl CatalogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogType::App => "app",
            CatalogType::User => "user",
            CatalogType::Page => "page",
            CatalogType::MediaVideo => "media_video",
            CatalogType::MediaAudio => "media_audio",
            CatalogType::MediaImage => "media_image",
            CatalogType::Drug => "drug",
            CatalogType::Blood => "blood",
            CatalogType::Oxygen => "oxygen",
            CatalogType::MedicalEquipment => "medical_equipment",
            CatalogType::Order => "order",
        }
    }

    /// Shop item types a purchase funnel can pick from.
    pub fn is_shop_item(&self) -> bool {
        matches!(
            self,
            CatalogType::Drug | CatalogType::Blood | CatalogType::Oxygen | CatalogType::MedicalEquipment
        )
    }
}

impl fmt::Display for CatalogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pointer from a log event to a record it implies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogRef {
    pub catalog_type: CatalogType,
    pub id: String,
}

impl CatalogRef {
    pub fn new(catalog_type: CatalogType, id: impl Into<String>) -> Self {
        Self {
            catalog_type,
            id: id.into(),
        }
    }
}

/// A reference-data record made visible at `ts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEvent {
    pub ts: Timestamp,
    pub catalog_type: CatalogType,
    pub id: String,
    pub data: Value,
}

impl CatalogEvent {
    pub fn new(ts: Timestamp, catalog_type: CatalogType, id: impl Into<String>, data: Value) -> Self {
        Self {
            ts,
            catalog_type,
            id: id.into(),
            data,
        }
    }

    /// JSON rendering delivered to sinks.
    pub fn as_payload(&self) -> Value {
        json!({
            "ts": format_ts(self.ts),
            "catalog_type": self.catalog_type.as_str(),
            "id": self.id,
            "data": self.data,
        })
    }
}

impl Timestamped for CatalogEvent {
    fn ts(&self) -> Timestamp {
        self.ts
    }
}

// ============================================================================
// Meta events
// ============================================================================

/// Internal instruction carried by a [`MetaEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetaAction {
    /// A periodic variable took `value` at the event's instant.
    SetVariable { variable: String, value: VariableValue },
    /// The actor checks for nudges sent to it.
    ReceiveNudges,
}

/// Internal state-change event. Driver-level variables have no actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaEvent {
    pub ts: Timestamp,
    pub actor_id: Option<String>,
    pub action: MetaAction,
}

impl MetaEvent {
    pub fn new(ts: Timestamp, actor_id: Option<String>, action: MetaAction) -> Self {
        Self { ts, actor_id, action }
    }

    pub fn as_payload(&self) -> Value {
        let mut payload = json!({
            "ts": format_ts(self.ts),
            "actor_id": self.actor_id,
        });
        if let (Value::Object(map), Ok(Value::Object(action))) = (&mut payload, serde_json::to_value(&self.action)) {
            map.extend(action);
        }
        payload
    }
}

impl Timestamped for MetaEvent {
    fn ts(&self) -> Timestamp {
        self.ts
    }
}

// ============================================================================
// Tagged variant
// ============================================================================

/// Any event, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    Log(LogEvent),
    Catalog(CatalogEvent),
    Meta(MetaEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Log(_) => EventKind::Log,
            Event::Catalog(_) => EventKind::Catalog,
            Event::Meta(_) => EventKind::Meta,
        }
    }
}

impl Timestamped for Event {
    fn ts(&self) -> Timestamp {
        match self {
            Event::Log(e) => e.ts,
            Event::Catalog(e) => e.ts,
            Event::Meta(e) => e.ts,
        }
    }
}

impl From<LogEvent> for Event {
    fn from(event: LogEvent) -> Self {
        Event::Log(event)
    }
}

impl From<CatalogEvent> for Event {
    fn from(event: CatalogEvent) -> Self {
        Event::Catalog(event)
    }
}

impl From<MetaEvent> for Event {
    fn from(event: MetaEvent) -> Self {
        Event::Meta(event)
    }
}

/// Timestamp format used in payloads (`2020-01-01T00:00:00.000Z`).
pub fn format_ts(ts: Timestamp) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}
