//! Session engagement policy.
//!
//! Each day the actor is either engaged or not; an engaged actor runs a
//! number of sessions whose start hours follow the profile's hourly
//! distribution. A session is:
//!
//! ```text
//! [app open] login  body...  logout [app close] [app rating]
//! ```
//!
//! with app open/close (and backgrounding inside the body) for mobile
//! profiles only.

use crate::config::{BehaviorKind, ProductUserType, ProfileConfig};
use crate::core::time::{seconds, Timestamp};
use crate::events::EventCollection;
use crate::managers::{generate_engagement_delta, EngagementModel};
use crate::models::event::{CatalogType, MetaAction, MetaEvent};
use crate::models::log_event::{AppAction, IdentifyAction, LogAction, LogEvent, NudgeResponseAction};
use crate::nudge::Nudge;
use crate::policy::generator;
use crate::policy::{BehaviorPolicy, PolicyContext, PolicyError};
use chrono::{Datelike, Duration, Timelike};
use std::sync::Arc;

/// Variable holding the session engagement level.
pub const SESSION_ENGAGEMENT: &str = "session_engagement";

/// Share of engaged days a fully disengaged actor still gets.
const GUARANTEED_ENGAGEMENT_FOR_SESSION: f64 = 0.8;

#[derive(Debug, Clone)]
pub struct SessionPolicy {
    profile: Arc<ProfileConfig>,
    engagement: EngagementModel,
}

impl SessionPolicy {
    pub fn new(profile: Arc<ProfileConfig>) -> Self {
        let engagement = EngagementModel::new(SESSION_ENGAGEMENT, profile.session_engagement.clone());
        Self { profile, engagement }
    }

    pub fn profile(&self) -> &ProfileConfig {
        &self.profile
    }

    pub fn engagement(&self) -> &EngagementModel {
        &self.engagement
    }

    /// Sessions and nudge checks for the window.
    ///
    /// `body(ctx, body_start, duration, online)` fills each session between
    /// login and logout and returns the events with the instant it ended.
    pub fn create_sessions<F>(
        &self,
        ctx: &mut PolicyContext<'_>,
        window_start: Timestamp,
        window_end: Timestamp,
        mut body: F,
    ) -> Result<Option<EventCollection>, PolicyError>
    where
        F: FnMut(&mut PolicyContext<'_>, Timestamp, Duration, bool) -> Result<(Vec<LogEvent>, Timestamp), PolicyError>,
    {
        if !self.engagement.is_active(&*ctx.state) {
            return Ok(None);
        }

        let mut log_events = Vec::new();
        if self.engaged_today(ctx, window_start) {
            let count = self.session_count(ctx, window_start);
            for session_start in self.start_timestamps(ctx, window_start, count) {
                if session_start >= window_end {
                    continue;
                }
                log_events.extend(self.create_session(ctx, session_start, &mut body)?);
            }
        }

        let mut meta_events = Vec::new();
        if ctx.global.use_nudges {
            let nudges = &self.profile.nudges;
            let checks = ctx.rng.int_in_range(nudges.checks_per_day_min, nudges.checks_per_day_max);
            for check_ts in self.start_timestamps(ctx, window_start, checks) {
                if check_ts < window_end {
                    meta_events.push(MetaEvent::new(
                        check_ts,
                        Some(ctx.actor_id.to_string()),
                        MetaAction::ReceiveNudges,
                    ));
                }
            }
        }

        Ok(Some(EventCollection::from_parts(log_events, Vec::new(), meta_events)))
    }

    /// Decide, once per calendar date, whether the actor shows up at all.
    fn engaged_today(&self, ctx: &mut PolicyContext<'_>, ts: Timestamp) -> bool {
        let date = ts.date_naive();
        let keep_from = (ts - Duration::days(2)).date_naive();
        ctx.state.active_days.retain(|day, _| *day >= keep_from);

        if let Some(engaged) = ctx.state.active_days.get(&date) {
            return *engaged;
        }

        let weekday = ts.weekday().num_days_from_monday() as usize;
        let day_probability = self
            .profile
            .session_day_of_week_probabilities
            .get(weekday)
            .copied()
            .unwrap_or(1.0);

        let engaged = if day_probability < 1.0 && ctx.rng.next_f64() > day_probability {
            false
        } else {
            let level = self.engagement.level(&*ctx.state);
            let threshold =
                GUARANTEED_ENGAGEMENT_FOR_SESSION + (1.0 - GUARANTEED_ENGAGEMENT_FOR_SESSION) * level;
            ctx.rng.next_f64() <= threshold
        };

        ctx.state.active_days.insert(date, engaged);
        engaged
    }

    fn session_count(&self, ctx: &mut PolicyContext<'_>, window_start: Timestamp) -> i64 {
        let min = self.profile.session_min_count;
        let max = self.profile.session_max_count;
        let mut count = (min as f64 + (max - min) as f64 * ctx.rng.next_f64()).round() as i64;

        if ctx.global.use_nudges {
            if let Some(last_nudge) = ctx.state.last_received_nudge_ts {
                let nudges = &self.profile.nudges;
                if last_nudge <= window_start
                    && (window_start - last_nudge).num_days() < nudges.bonus_session_days
                {
                    count += nudges.bonus_session_count;
                }
            }
        }
        count
    }

    /// `count` instants within a day of `start`, hours weighted by the
    /// profile's hourly start distribution.
    fn start_timestamps(&self, ctx: &mut PolicyContext<'_>, start: Timestamp, count: i64) -> Vec<Timestamp> {
        let hourly = &self.profile.session_hourly_start_probabilities;
        let weights: Vec<f64> = (0..24)
            .map(|offset| {
                let hour = (start + Duration::hours(offset)).hour() as usize;
                hourly.get(hour).copied().unwrap_or(0.0)
            })
            .collect();

        let mut timestamps = Vec::new();
        for _ in 0..count.max(0) {
            let Some(offset) = ctx.rng.weighted_index(&weights) else {
                break;
            };
            timestamps.push(
                start + Duration::hours(offset as i64) + seconds(ctx.rng.next_f64() * 3600.0),
            );
        }
        timestamps.sort();
        timestamps
    }

    fn create_session<F>(
        &self,
        ctx: &mut PolicyContext<'_>,
        session_start: Timestamp,
        body: &mut F,
    ) -> Result<Vec<LogEvent>, PolicyError>
    where
        F: FnMut(&mut PolicyContext<'_>, Timestamp, Duration, bool) -> Result<(Vec<LogEvent>, Timestamp), PolicyError>,
    {
        let profile = &self.profile;
        let online = ctx.rng.chance(profile.online_probability);
        let span = profile.session_length_max_seconds - profile.session_length_min_seconds;
        let duration = Duration::seconds(
            profile.session_length_min_seconds + (ctx.rng.next_f64() * span as f64).floor() as i64,
        );
        let mobile = profile.product_user_type == ProductUserType::Mobile;
        let actor_id = ctx.actor_id;
        let log = |ts: Timestamp, action: LogAction| LogEvent::new(ts, actor_id, online, action);

        let mut events = Vec::new();
        let mut ts = session_start;

        if mobile {
            events.push(log(ts, LogAction::App { action: AppAction::Open }));
            ts += generator::short_pause(ctx.rng);
        }
        events.push(log(
            ts,
            LogAction::Identify {
                action: IdentifyAction::Login,
            },
        ));
        ts += seconds(ctx.rng.range_f64(2.0, 5.0));

        let (body_events, body_end) = body(ctx, ts, duration, online)?;
        let body_events = if mobile {
            self.insert_backgrounding(ctx, body_events, online)
        } else {
            body_events
        };
        events.extend(body_events);
        ts = ts.max(body_end);

        events.push(log(
            ts,
            LogAction::Identify {
                action: IdentifyAction::Logout,
            },
        ));
        ts += generator::short_pause(ctx.rng);

        if mobile {
            events.push(log(ts, LogAction::App { action: AppAction::Close }));
            ts += generator::short_pause(ctx.rng);
        }

        let app_id = ctx.global.app_id();
        let (rating, _) = generator::rate_event(ctx, ts, CatalogType::App, &app_id, online);
        events.extend(rating);
        Ok(events)
    }

    /// Ordinary browsing: event sequences of weighted types until the
    /// session duration is used up.
    pub fn session_body(
        &self,
        ctx: &mut PolicyContext<'_>,
        body_start: Timestamp,
        duration: Duration,
        online: bool,
    ) -> Result<(Vec<LogEvent>, Timestamp), PolicyError> {
        let body_end = body_start + duration;
        let mut ts = body_start + seconds(10.0 * (0.5 + ctx.rng.next_f64()));
        let mut events = Vec::new();

        while ts < body_end {
            let kind = generator::pick_event_type(ctx.rng, &self.profile.event_probabilities)?;
            let (sequence, sequence_end) = generator::event_sequence(ctx, kind, ts, online)?;
            events.extend(sequence);
            ts = sequence_end + Duration::seconds(ctx.rng.int_in_range(5, 30));
        }
        Ok((events, ts))
    }

    /// Mobile apps go to the background between events now and then.
    fn insert_backgrounding(
        &self,
        ctx: &mut PolicyContext<'_>,
        events: Vec<LogEvent>,
        online: bool,
    ) -> Vec<LogEvent> {
        let per_minute = self.profile.background_per_minute_probability;
        if per_minute <= 0.0 || events.len() < 2 {
            return events;
        }

        let mut result = Vec::with_capacity(events.len());
        let mut iter = events.into_iter().peekable();
        while let Some(event) = iter.next() {
            let ts = event.ts;
            let gap = iter.peek().map(|next| next.ts - ts);
            result.push(event);

            let Some(gap) = gap else { continue };
            let minutes = gap.num_milliseconds() as f64 / 60_000.0;
            if minutes <= 0.0 || !ctx.rng.chance(1.0 - (1.0 - per_minute).powf(minutes)) {
                continue;
            }
            for (ts, action) in [
                (ts + gap / 3, AppAction::Background),
                (ts + gap * 2 / 3, AppAction::Resume),
            ] {
                result.push(LogEvent::new(ts, ctx.actor_id, online, LogAction::App { action }));
            }
        }
        result
    }

    /// Nudge response plus its effect on engagement.
    pub fn nudge_response(
        &self,
        ctx: &mut PolicyContext<'_>,
        nudge: &Nudge,
        received_ts: Timestamp,
    ) -> Option<LogEvent> {
        let last = ctx.state.last_received_nudge_ts;
        ctx.state.last_received_nudge_ts =
            Some(last.map_or(nudge.queued_at, |last| last.max(nudge.queued_at)));

        let responses = &self.profile.nudges.response_probabilities;
        let actions: Vec<NudgeResponseAction> = responses.keys().copied().collect();
        let weights: Vec<f64> = responses.values().copied().collect();
        let action = actions.get(ctx.rng.weighted_index(&weights)?).copied()?;
        let online = ctx.rng.chance(self.profile.online_probability);

        if action == NudgeResponseAction::Open {
            let delta = generate_engagement_delta(&self.profile.nudges.engagement_effect, ctx.rng);
            self.engagement.adjust(&mut *ctx.state, delta);
        }

        Some(LogEvent::new(
            received_ts,
            ctx.actor_id,
            online,
            LogAction::NudgeResponse {
                nudge_id: nudge.nudge_id.clone(),
                action,
            },
        ))
    }
}

impl BehaviorPolicy for SessionPolicy {
    fn kind(&self) -> BehaviorKind {
        BehaviorKind::SessionEngagement
    }

    fn variables(&self) -> Vec<EngagementModel> {
        vec![self.engagement.clone()]
    }

    fn activity_variable(&self) -> Option<&EngagementModel> {
        Some(&self.engagement)
    }

    fn create_custom_events(
        &self,
        ctx: &mut PolicyContext<'_>,
        window_start: Timestamp,
        window_end: Timestamp,
    ) -> Result<Option<EventCollection>, PolicyError> {
        self.create_sessions(ctx, window_start, window_end, |ctx, start, duration, online| {
            self.session_body(ctx, start, duration, online)
        })
    }

    fn respond_to_nudge(
        &self,
        ctx: &mut PolicyContext<'_>,
        nudge: &Nudge,
        received_ts: Timestamp,
    ) -> Option<LogEvent> {
        self.nudge_response(ctx, nudge, received_ts)
    }
}
