//! Event sequences shared by the policies.
//!
//! Every generator takes the instant the sequence starts at and returns the
//! events together with the instant the sequence ends at, so callers can
//! chain sequences without overlapping them.

use crate::config::EventTypeKind;
use crate::core::time::{seconds, Timestamp};
use crate::models::event::CatalogType;
use crate::models::log_event::{LogAction, LogEvent, MediaAction, MediaType};
use crate::policy::{PolicyContext, PolicyError};
use crate::rng::RngManager;
use chrono::Duration;
use serde_json::Value;
use std::collections::BTreeMap;

const PAGE_COUNT_MIN: i64 = 1;
const PAGE_COUNT_MAX: i64 = 5;
const PAGE_VIEW_SECONDS: (f64, f64) = (30.0, 60.0);
const MEDIA_VIEW_SECONDS: (i64, i64) = (30, 60);
const MEDIA_PAUSE_PROBABILITY: f64 = 0.3;
/// Share of the view after which a pause can happen
const MEDIA_PAUSE_MAX_RATIO: f64 = 0.6;

/// Weighted pick among the configured event types.
pub fn pick_event_type(
    rng: &mut RngManager,
    probabilities: &BTreeMap<EventTypeKind, f64>,
) -> Result<EventTypeKind, PolicyError> {
    let kinds: Vec<EventTypeKind> = probabilities.keys().copied().collect();
    let weights: Vec<f64> = probabilities.values().copied().collect();
    rng.weighted_index(&weights)
        .and_then(|index| kinds.get(index).copied())
        .ok_or(PolicyError::NoEventTypes)
}

/// Short random pause between two steps of a sequence.
pub fn short_pause(rng: &mut RngManager) -> Duration {
    seconds(rng.range_f64(0.5, 5.0))
}

pub fn random_record_id(ctx: &mut PolicyContext<'_>, catalog_type: CatalogType) -> Result<String, PolicyError> {
    ctx.catalog
        .random_record_id(catalog_type, ctx.rng)
        .ok_or(PolicyError::EmptyCatalog { catalog_type })
}

fn media_type(kind: EventTypeKind) -> Option<MediaType> {
    match kind {
        EventTypeKind::Video => Some(MediaType::Video),
        EventTypeKind::Audio => Some(MediaType::Audio),
        EventTypeKind::Image => Some(MediaType::Image),
        EventTypeKind::Page | EventTypeKind::Search => None,
    }
}

fn media_length_ms(ctx: &PolicyContext<'_>, media_type: MediaType, media_id: &str) -> i64 {
    ctx.catalog
        .lookup(media_type.catalog_type(), media_id)
        .and_then(|record| record.get("length").and_then(Value::as_i64))
        .unwrap_or(0)
}

fn search_action(rng: &mut RngManager) -> LogAction {
    LogAction::Search {
        query: format!("query {}", rng.int_in_range(0, 1000)),
        result_count: rng.int_in_range(0, 100) as u32,
    }
}

/// The first event of a sequence of `kind`, on its own.
pub fn single_event(
    ctx: &mut PolicyContext<'_>,
    kind: EventTypeKind,
    ts: Timestamp,
    online: bool,
) -> Result<LogEvent, PolicyError> {
    let action = match media_type(kind) {
        Some(media_type) => LogAction::Media {
            media_type,
            media_id: random_record_id(ctx, media_type.catalog_type())?,
            action: MediaAction::Impression,
            position_ms: 0,
        },
        None if kind == EventTypeKind::Search => search_action(ctx.rng),
        None => LogAction::Page {
            page_id: random_record_id(ctx, CatalogType::Page)?,
        },
    };
    Ok(LogEvent::new(ts, ctx.actor_id, online, action))
}

/// A full sequence of `kind` starting at `ts`.
pub fn event_sequence(
    ctx: &mut PolicyContext<'_>,
    kind: EventTypeKind,
    ts: Timestamp,
    online: bool,
) -> Result<(Vec<LogEvent>, Timestamp), PolicyError> {
    match media_type(kind) {
        Some(media_type) => media_sequence(ctx, media_type, ts, online),
        None if kind == EventTypeKind::Search => {
            let event = LogEvent::new(ts, ctx.actor_id, online, search_action(ctx.rng));
            let end = ts + seconds(ctx.rng.range_f64(PAGE_VIEW_SECONDS.0, PAGE_VIEW_SECONDS.1));
            Ok((vec![event], end))
        }
        None => page_sequence(ctx, ts, online),
    }
}

fn page_sequence(
    ctx: &mut PolicyContext<'_>,
    mut ts: Timestamp,
    online: bool,
) -> Result<(Vec<LogEvent>, Timestamp), PolicyError> {
    let count = ctx.rng.int_in_range(PAGE_COUNT_MIN, PAGE_COUNT_MAX);
    let mut events = Vec::with_capacity(count as usize);
    for _ in 0..count {
        ts += seconds(ctx.rng.range_f64(PAGE_VIEW_SECONDS.0, PAGE_VIEW_SECONDS.1));
        let page_id = random_record_id(ctx, CatalogType::Page)?;
        events.push(LogEvent::new(ts, ctx.actor_id, online, LogAction::Page { page_id }));
    }
    Ok((events, ts))
}

fn media_sequence(
    ctx: &mut PolicyContext<'_>,
    media_type: MediaType,
    mut ts: Timestamp,
    online: bool,
) -> Result<(Vec<LogEvent>, Timestamp), PolicyError> {
    let media_id = random_record_id(ctx, media_type.catalog_type())?;
    let length = media_length_ms(ctx, media_type, &media_id);
    let actor_id = ctx.actor_id;
    let media = |ts: Timestamp, action: MediaAction, position_ms: i64| {
        LogEvent::new(
            ts,
            actor_id,
            online,
            LogAction::Media {
                media_type,
                media_id: media_id.clone(),
                action,
                position_ms,
            },
        )
    };

    let mut events = vec![media(ts, MediaAction::Impression, 0)];
    ts += short_pause(ctx.rng);
    events.push(media(ts, MediaAction::Play, 0));

    let view = Duration::seconds(ctx.rng.int_in_range(MEDIA_VIEW_SECONDS.0, MEDIA_VIEW_SECONDS.1));
    if media_type == MediaType::Image {
        return Ok((events, ts + view));
    }

    let play_ts = ts;
    ts += view;
    if ctx.rng.chance(MEDIA_PAUSE_PROBABILITY) {
        let ratio = ctx.rng.next_f64() * MEDIA_PAUSE_MAX_RATIO;
        let pause_ts = play_ts + seconds(view.num_seconds() as f64 * ratio);
        let position = (length as f64 * ratio).round() as i64;
        events.push(media(pause_ts, MediaAction::Pause, position));
    }
    events.push(media(ts, MediaAction::Finish, length));

    let (rating, ts) = rate_event(ctx, ts, media_type.catalog_type(), &media_id, online);
    events.extend(rating);
    Ok((events, ts))
}

/// Rating of `subject_id`, left with the global rating probability a short
/// while after `ts`.
pub fn rate_event(
    ctx: &mut PolicyContext<'_>,
    ts: Timestamp,
    subject_type: CatalogType,
    subject_id: &str,
    online: bool,
) -> (Option<LogEvent>, Timestamp) {
    let probability = ctx.global.rating_probability;
    if probability <= 0.0 || !ctx.rng.chance(probability) {
        return (None, ts);
    }

    let ts = ts + Duration::seconds(ctx.rng.int_in_range(5, 31));
    let rating = random_rating(ctx.rng);
    let event = LogEvent::new(
        ts,
        ctx.actor_id,
        online,
        LogAction::Rate {
            subject_type,
            subject_id: subject_id.to_string(),
            rating,
        },
    );
    (Some(event), ts)
}

/// Whole star rating in [1, 5].
pub fn random_rating(rng: &mut RngManager) -> f64 {
    1.0 + rng.int_in_range(0, 5) as f64
}
