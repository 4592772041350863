//! Behavioral ("log") events.
//!
//! A log event belongs to exactly one actor. Besides its payload it exposes
//! two hooks used by the scheduling core:
//!
//! - [`LogEvent::catalog_refs`]: the reference-data records the event implies.
//!   The scheduler turns them into catalog events through the catalog
//!   collaborator so each behavioral event ships with its records.
//! - [`LogEvent::detached_consequences`]: future events the log event commits
//!   to once it is part of a tick's output (a checkout's payment, delivery
//!   scheduling, delivery or cancellation). Their timestamps are decided when
//!   the event is created, so the hook is pure data.

use crate::core::time::Timestamp;
use crate::events::EventCollection;
use crate::models::event::{format_ts, CatalogRef, CatalogType, Event, Timestamped};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifyAction {
    Register,
    Login,
    Logout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppAction {
    Open,
    Close,
    Background,
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Video,
    Audio,
    Image,
}

impl MediaType {
    pub fn catalog_type(&self) -> CatalogType {
        match self {
            MediaType::Video => CatalogType::MediaVideo,
            MediaType::Audio => CatalogType::MediaAudio,
            MediaType::Image => CatalogType::MediaImage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaAction {
    Impression,
    Play,
    Pause,
    Finish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemAction {
    View,
    AddToCart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NudgeResponseAction {
    Open,
    Discard,
    Block,
}

/// A purchasable catalog record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopItem {
    pub id: String,
    pub catalog_type: CatalogType,
    pub price: f64,
}

/// What happens to a successful order after checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckoutOutcome {
    Delivered {
        delivery_id: String,
        delivery_ts: Timestamp,
        /// Order rating left after delivery, if any
        rating: Option<(Timestamp, f64)>,
    },
    Cancelled {
        cancel_ts: Timestamp,
        reason: String,
    },
}

/// Follow-up timeline decided at checkout time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutPlan {
    pub payment_ts: Timestamp,
    pub schedule_ts: Timestamp,
    pub outcome: CheckoutOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkout {
    pub order_id: String,
    pub items: Vec<ShopItem>,
    pub total_price: f64,
    pub is_successful: bool,
    pub is_urgent: bool,
    /// Present for successful orders only
    pub plan: Option<CheckoutPlan>,
}

/// Typed payload of a log event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum LogAction {
    Identify {
        action: IdentifyAction,
    },
    App {
        action: AppAction,
    },
    Page {
        page_id: String,
    },
    Search {
        query: String,
        result_count: u32,
    },
    Media {
        media_type: MediaType,
        media_id: String,
        action: MediaAction,
        position_ms: i64,
    },
    Item {
        item: ShopItem,
        action: ItemAction,
    },
    Checkout(Box<Checkout>),
    Payment {
        order_id: String,
        amount: f64,
    },
    ScheduleDelivery {
        order_id: String,
        delivery_ts: Timestamp,
        is_urgent: bool,
    },
    Delivery {
        order_id: String,
        delivery_id: String,
        item_ids: Vec<String>,
    },
    CancelCheckout {
        order_id: String,
        reason: String,
    },
    Rate {
        subject_type: CatalogType,
        subject_id: String,
        rating: f64,
    },
    NudgeResponse {
        nudge_id: String,
        action: NudgeResponseAction,
    },
}

impl LogAction {
    /// Event type name used in payloads.
    pub fn name(&self) -> &'static str {
        match self {
            LogAction::Identify { .. } => "identify",
            LogAction::App { .. } => "app",
            LogAction::Page { .. } => "page",
            LogAction::Search { .. } => "search",
            LogAction::Media { .. } => "media",
            LogAction::Item { .. } => "item",
            LogAction::Checkout(_) => "checkout",
            LogAction::Payment { .. } => "payment",
            LogAction::ScheduleDelivery { .. } => "schedule_delivery",
            LogAction::Delivery { .. } => "delivery",
            LogAction::CancelCheckout { .. } => "cancel_checkout",
            LogAction::Rate { .. } => "rate",
            LogAction::NudgeResponse { .. } => "nudge_response",
        }
    }
}

/// A behavioral event performed by one actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub ts: Timestamp,
    pub actor_id: String,
    pub online: bool,
    pub action: LogAction,
}

impl LogEvent {
    pub fn new(ts: Timestamp, actor_id: impl Into<String>, online: bool, action: LogAction) -> Self {
        Self {
            ts,
            actor_id: actor_id.into(),
            online,
            action,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.action.name()
    }

    /// Records implied by this event.
    pub fn catalog_refs(&self) -> Vec<CatalogRef> {
        match &self.action {
            LogAction::Page { page_id } => vec![CatalogRef::new(CatalogType::Page, page_id.clone())],
            LogAction::Media {
                media_type,
                media_id,
                ..
            } => vec![CatalogRef::new(media_type.catalog_type(), media_id.clone())],
            LogAction::Item { item, .. } => vec![CatalogRef::new(item.catalog_type, item.id.clone())],
            LogAction::Checkout(checkout) => checkout
                .items
                .iter()
                .map(|item| CatalogRef::new(item.catalog_type, item.id.clone()))
                .chain(std::iter::once(CatalogRef::new(
                    CatalogType::Order,
                    checkout.order_id.clone(),
                )))
                .collect(),
            LogAction::Delivery { order_id, .. } => {
                vec![CatalogRef::new(CatalogType::Order, order_id.clone())]
            }
            LogAction::Rate {
                subject_type,
                subject_id,
                ..
            } => vec![CatalogRef::new(*subject_type, subject_id.clone())],
            _ => Vec::new(),
        }
    }

    /// Future events this event commits to once emitted.
    ///
    /// Only successful checkouts have consequences: a payment, the delivery
    /// being scheduled, then either a cancellation or a delivery (optionally
    /// followed by an order rating).
    pub fn detached_consequences(&self) -> Option<EventCollection> {
        let LogAction::Checkout(checkout) = &self.action else {
            return None;
        };
        if !checkout.is_successful {
            return None;
        }
        let plan = checkout.plan.as_ref()?;

        let follow_up = |ts: Timestamp, action: LogAction| -> Event {
            Event::Log(LogEvent::new(ts, self.actor_id.clone(), self.online, action))
        };

        let mut events = vec![follow_up(
            plan.payment_ts,
            LogAction::Payment {
                order_id: checkout.order_id.clone(),
                amount: checkout.total_price,
            },
        )];

        match &plan.outcome {
            CheckoutOutcome::Delivered {
                delivery_id,
                delivery_ts,
                rating,
            } => {
                events.push(follow_up(
                    plan.schedule_ts,
                    LogAction::ScheduleDelivery {
                        order_id: checkout.order_id.clone(),
                        delivery_ts: *delivery_ts,
                        is_urgent: checkout.is_urgent,
                    },
                ));
                events.push(follow_up(
                    *delivery_ts,
                    LogAction::Delivery {
                        order_id: checkout.order_id.clone(),
                        delivery_id: delivery_id.clone(),
                        item_ids: checkout.items.iter().map(|item| item.id.clone()).collect(),
                    },
                ));
                if let Some((rate_ts, value)) = rating {
                    events.push(follow_up(
                        *rate_ts,
                        LogAction::Rate {
                            subject_type: CatalogType::Order,
                            subject_id: checkout.order_id.clone(),
                            rating: *value,
                        },
                    ));
                }
            }
            CheckoutOutcome::Cancelled { cancel_ts, reason } => {
                events.push(follow_up(
                    plan.schedule_ts,
                    LogAction::ScheduleDelivery {
                        order_id: checkout.order_id.clone(),
                        delivery_ts: *cancel_ts,
                        is_urgent: checkout.is_urgent,
                    },
                ));
                events.push(follow_up(
                    *cancel_ts,
                    LogAction::CancelCheckout {
                        order_id: checkout.order_id.clone(),
                        reason: reason.clone(),
                    },
                ));
            }
        }

        let mut collection = EventCollection::new();
        for event in events {
            collection.insert(event);
        }
        Some(collection)
    }

    /// JSON rendering delivered to sinks.
    pub fn as_payload(&self) -> Value {
        json!({
            "u_id": self.actor_id,
            "ts": format_ts(self.ts),
            "ol": self.online,
            "type": self.event_type(),
            "props": serde_json::to_value(&self.action).unwrap_or(Value::Null),
        })
    }
}

impl Timestamped for LogEvent {
    fn ts(&self) -> Timestamp {
        self.ts
    }
}
