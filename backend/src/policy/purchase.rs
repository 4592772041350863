//! Purchase engagement policy.
//!
//! Sessions as in [`SessionPolicy`], with a purchase funnel as their body:
//! the actor keeps a set of shop items it is interested in, views some of
//! them every session, and once an item has been viewed often enough puts
//! it in the cart and checks out. A successful checkout decides its whole
//! follow-up timeline (payment, delivery scheduling, delivery or
//! cancellation) up front; those events reach the output through the
//! detached-event relay.

use crate::config::{BehaviorKind, ProfileConfig, PurchaseConfig};
use crate::core::time::{seconds, Timestamp};
use crate::events::EventCollection;
use crate::managers::EngagementModel;
use crate::models::event::CatalogType;
use crate::models::log_event::{
    Checkout, CheckoutOutcome, CheckoutPlan, ItemAction, LogAction, LogEvent, ShopItem,
};
use crate::models::profile_state::{CheckoutProbabilities, ItemInterest};
use crate::nudge::Nudge;
use crate::policy::generator;
use crate::policy::session::SessionPolicy;
use crate::policy::{BehaviorPolicy, PolicyContext, PolicyError};
use crate::rng::RngManager;
use chrono::{Datelike, Duration, TimeZone, Timelike, Utc, Weekday};
use serde_json::Value;
use std::sync::Arc;

/// Variable holding the purchase engagement level.
pub const PURCHASE_ENGAGEMENT: &str = "purchase_engagement";

/// Orders placed at or after this hour ship a day later.
const LATE_ORDER_HOUR: u32 = 20;
const DELIVERY_WINDOW_START_HOUR: u32 = 8;
const DELIVERY_WINDOW_HOURS: f64 = 12.0;
/// Earliest delivery after checkout, in seconds
const MIN_DELIVERY_DELAY_SECONDS: i64 = 1000;

#[derive(Debug, Clone)]
pub struct PurchasePolicy {
    session: SessionPolicy,
    purchase_engagement: EngagementModel,
}

impl PurchasePolicy {
    pub fn new(profile: Arc<ProfileConfig>) -> Self {
        let purchase_engagement =
            EngagementModel::new(PURCHASE_ENGAGEMENT, profile.purchase_engagement.clone());
        Self {
            session: SessionPolicy::new(profile),
            purchase_engagement,
        }
    }

    fn config(&self) -> &PurchaseConfig {
        &self.session.profile().purchase
    }

    /// Funnel step run inside each session.
    fn purchase_session_body(
        &self,
        ctx: &mut PolicyContext<'_>,
        body_start: Timestamp,
        duration: Duration,
        online: bool,
    ) -> Result<(Vec<LogEvent>, Timestamp), PolicyError> {
        let mut events = Vec::new();
        let mut ts = body_start;

        if ctx.rng.chance(self.config().normal_event_probability) {
            let (browsing, browsing_end) = self.session.session_body(ctx, ts, duration, online)?;
            events.extend(browsing);
            ts = browsing_end;
        }

        let probabilities = self.checkout_probabilities(ctx);
        self.refresh_item_interests(ctx)?;

        for item in self.viewed_items(ctx) {
            events.push(self.item_event(ctx, ts + Duration::seconds(1), item, ItemAction::View, online));
            ts += Duration::seconds(ctx.rng.int_in_range(5, 30));
        }

        let mut cart = Vec::new();
        let mut total_price = 0.0;
        for item in self.items_to_buy(ctx) {
            let count = ctx.rng.int_in_range(
                self.config().purchase_count_per_item_min,
                self.config().purchase_count_per_item_max,
            );
            total_price += item.price * count as f64;
            events.push(self.item_event(ctx, ts, item.clone(), ItemAction::AddToCart, online));
            cart.push(item);
            ts += Duration::seconds(ctx.rng.int_in_range(5, 30));
        }

        if !cart.is_empty() {
            events.push(self.checkout(ctx, ts, cart, total_price, online, probabilities));
        }

        Ok((events, ts))
    }

    fn item_event(
        &self,
        ctx: &PolicyContext<'_>,
        ts: Timestamp,
        item: ShopItem,
        action: ItemAction,
        online: bool,
    ) -> LogEvent {
        LogEvent::new(ts, ctx.actor_id, online, LogAction::Item { item, action })
    }

    /// The actor's checkout tendencies, drawn on first use.
    fn checkout_probabilities(&self, ctx: &mut PolicyContext<'_>) -> CheckoutProbabilities {
        if let Some(probabilities) = ctx.state.purchase.checkout_probabilities {
            return probabilities;
        }
        let config = self.config();
        let probabilities = CheckoutProbabilities {
            failure: ctx.rng.range_f64(
                config.checkout_failure_probability_min,
                config.checkout_failure_probability_max,
            ),
            urgent: ctx.rng.range_f64(
                config.checkout_urgent_probability_min,
                config.checkout_urgent_probability_max,
            ),
            cancellation: ctx.rng.range_f64(
                config.checkout_cancellation_probability_min,
                config.checkout_cancellation_probability_max,
            ),
        };
        ctx.state.purchase.checkout_probabilities = Some(probabilities);
        probabilities
    }

    /// Pick the items of interest on first use and reset view counters of
    /// items that were just bought.
    fn refresh_item_interests(&self, ctx: &mut PolicyContext<'_>) -> Result<(), PolicyError> {
        let config = self.config();
        if ctx.state.purchase.item_interests.is_empty() {
            let types: Vec<(CatalogType, f64)> = config
                .catalog_type_probabilities
                .iter()
                .filter(|(catalog_type, p)| catalog_type.is_shop_item() && **p > 0.0)
                .map(|(catalog_type, p)| (*catalog_type, *p))
                .collect();
            let shop_count: usize = types
                .iter()
                .map(|(catalog_type, _)| ctx.catalog.record_count(*catalog_type))
                .sum();
            let share = ctx
                .rng
                .range_f64(config.interest_catalog_range_min, config.interest_catalog_range_max);
            let interest_count = (shop_count as f64 * share).round() as usize;
            let weights: Vec<f64> = types.iter().map(|(_, p)| *p).collect();

            for _ in 0..interest_count.max(1) {
                let Some(index) = ctx.rng.weighted_index(&weights) else {
                    break;
                };
                let catalog_type = types[index].0;
                let id = generator::random_record_id(ctx, catalog_type)?;
                if ctx.state.purchase.item_interests.contains_key(&id) {
                    continue;
                }
                let price = ctx
                    .catalog
                    .lookup(catalog_type, &id)
                    .and_then(|record| record.get("price").and_then(Value::as_f64))
                    .unwrap_or(0.0);
                let remaining_view_count = views_required(config, ctx.rng);
                ctx.state.purchase.item_interests.insert(
                    id,
                    ItemInterest {
                        catalog_type,
                        price,
                        remaining_view_count,
                    },
                );
            }
        }

        for interest in ctx.state.purchase.item_interests.values_mut() {
            if interest.remaining_view_count <= 0 {
                interest.remaining_view_count = views_required(config, ctx.rng);
            }
        }
        Ok(())
    }

    /// Items viewed this session, in viewing order. Each interest is
    /// relevant with the purchase engagement level as probability.
    fn viewed_items(&self, ctx: &mut PolicyContext<'_>) -> Vec<ShopItem> {
        let config = self.config();
        let level = self.purchase_engagement.level(&*ctx.state);
        let mut views = Vec::new();
        for (id, interest) in ctx.state.purchase.item_interests.iter_mut() {
            if !ctx.rng.chance(level) {
                continue;
            }
            let count = ctx
                .rng
                .int_in_range(config.views_per_session_min, config.views_per_session_max);
            interest.remaining_view_count -= count;
            for _ in 0..count {
                views.push(ShopItem {
                    id: id.clone(),
                    catalog_type: interest.catalog_type,
                    price: interest.price,
                });
            }
        }

        // Fisher-Yates
        for i in (1..views.len()).rev() {
            let j = ctx.rng.range(0, i as i64 + 1) as usize;
            views.swap(i, j);
        }
        views
    }

    /// Items viewed often enough to be bought.
    fn items_to_buy(&self, ctx: &PolicyContext<'_>) -> Vec<ShopItem> {
        ctx.state
            .purchase
            .item_interests
            .iter()
            .filter(|(_, interest)| interest.remaining_view_count <= 0)
            .map(|(id, interest)| ShopItem {
                id: id.clone(),
                catalog_type: interest.catalog_type,
                price: interest.price,
            })
            .collect()
    }

    fn checkout(
        &self,
        ctx: &mut PolicyContext<'_>,
        ts: Timestamp,
        items: Vec<ShopItem>,
        total_price: f64,
        online: bool,
        probabilities: CheckoutProbabilities,
    ) -> LogEvent {
        let order_id = ctx.rng.uuid().to_string();
        let is_successful = ctx.rng.next_f64() >= probabilities.failure;
        let is_urgent = ctx.rng.chance(probabilities.urgent);
        let will_cancel = ctx.rng.chance(probabilities.cancellation);

        let plan = is_successful.then(|| {
            plan_checkout(
                ctx,
                ts,
                is_urgent,
                will_cancel,
                self.session.profile().schedule.delivery_delay_max_days,
            )
        });

        LogEvent::new(
            ts,
            ctx.actor_id,
            online,
            LogAction::Checkout(Box::new(Checkout {
                order_id,
                items,
                total_price,
                is_successful,
                is_urgent,
                plan,
            })),
        )
    }
}

fn views_required(config: &PurchaseConfig, rng: &mut RngManager) -> i64 {
    rng.int_in_range(
        config.views_required_per_purchase_min,
        config.views_required_per_purchase_max,
    )
    .max(1)
}

/// Follow-up timeline of a successful checkout at `checkout_ts`.
fn plan_checkout(
    ctx: &mut PolicyContext<'_>,
    checkout_ts: Timestamp,
    is_urgent: bool,
    will_cancel: bool,
    max_delay_days: i64,
) -> CheckoutPlan {
    let delivery_ts = delivery_timestamp(ctx.rng, checkout_ts, max_delay_days, is_urgent);
    let payment_ts = checkout_ts + Duration::seconds(ctx.rng.int_in_range(5, 31));
    let schedule_ts = payment_ts + Duration::seconds(ctx.rng.int_in_range(5, 31));

    let outcome = if will_cancel {
        let wait = (delivery_ts - schedule_ts).num_seconds().max(0);
        let cancel_ts = schedule_ts + Duration::seconds((wait as f64 * ctx.rng.next_f64()).round() as i64);
        CheckoutOutcome::Cancelled {
            cancel_ts: cancel_ts.max(schedule_ts + Duration::seconds(1)),
            reason: "Unknown".to_string(),
        }
    } else {
        let delivery_id = ctx.rng.uuid().to_string();
        let delivery_ts = delivery_ts.max(schedule_ts + Duration::seconds(1));
        let probability = ctx.global.rating_probability;
        let rating = (probability > 0.0 && ctx.rng.chance(probability)).then(|| {
            let rate_ts = delivery_ts + Duration::seconds(ctx.rng.int_in_range(5, 31));
            (rate_ts, generator::random_rating(ctx.rng))
        });
        CheckoutOutcome::Delivered {
            delivery_id,
            delivery_ts,
            rating,
        }
    };

    CheckoutPlan {
        payment_ts,
        schedule_ts,
        outcome,
    }
}

/// When an order placed at `ts` arrives.
///
/// Regular orders take a day or more, land on a weekday between 08:00 and
/// 20:00, and slip a day when placed late in the evening. Urgent orders
/// arrive within one to five hours.
pub fn delivery_timestamp(rng: &mut RngManager, ts: Timestamp, max_delay_days: i64, is_urgent: bool) -> Timestamp {
    let day = Duration::days(1).num_seconds() as f64;
    let delivery = if is_urgent {
        ts + seconds(3600.0 * (1.0 + 4.0 * rng.next_f64()))
    } else {
        let delay = day + max_delay_days as f64 * day * rng.gaussian(0.0, 0.1).abs()
            - day * rng.gaussian(0.0, 0.2).abs();
        let mut delivery = ts + seconds(delay);
        if delivery.hour() >= LATE_ORDER_HOUR {
            delivery += Duration::days(1);
        }
        let mut delivery = delivery
            .date_naive()
            .and_hms_opt(DELIVERY_WINDOW_START_HOUR, 0, 0)
            .map_or(delivery, |naive| Utc.from_utc_datetime(&naive));
        while matches!(delivery.weekday(), Weekday::Sat | Weekday::Sun) {
            delivery += Duration::days(1);
        }
        delivery + seconds(rng.next_f64() * DELIVERY_WINDOW_HOURS * 3600.0)
    };
    delivery.max(ts + Duration::seconds(MIN_DELIVERY_DELAY_SECONDS))
}

impl BehaviorPolicy for PurchasePolicy {
    fn kind(&self) -> BehaviorKind {
        BehaviorKind::PurchaseEngagement
    }

    fn variables(&self) -> Vec<EngagementModel> {
        vec![
            self.session.engagement().clone(),
            self.purchase_engagement.clone(),
        ]
    }

    fn activity_variable(&self) -> Option<&EngagementModel> {
        Some(self.session.engagement())
    }

    fn create_custom_events(
        &self,
        ctx: &mut PolicyContext<'_>,
        window_start: Timestamp,
        window_end: Timestamp,
    ) -> Result<Option<EventCollection>, PolicyError> {
        self.session
            .create_sessions(ctx, window_start, window_end, |ctx, start, duration, online| {
                self.purchase_session_body(ctx, start, duration, online)
            })
    }

    fn respond_to_nudge(
        &self,
        ctx: &mut PolicyContext<'_>,
        nudge: &Nudge,
        received_ts: Timestamp,
    ) -> Option<LogEvent> {
        self.session.nudge_response(ctx, nudge, received_ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ReferenceCatalog;
    use crate::config::{EventTypeKind, GlobalConfig, SimulationConfig};
    use crate::managers::{EngagementConfig, VariableManager};
    use crate::models::profile_state::ProfileState;

    fn base() -> Timestamp {
        Utc.with_ymd_and_hms(2020, 1, 6, 0, 0, 0).unwrap()
    }

    fn profile() -> ProfileConfig {
        let mut profile = ProfileConfig {
            user_type: BehaviorKind::PurchaseEngagement,
            session_min_count: 3,
            session_max_count: 3,
            event_probabilities: [(EventTypeKind::Page, 1.0)].into_iter().collect(),
            session_engagement: EngagementConfig::constant(1.0),
            purchase_engagement: EngagementConfig::constant(1.0),
            ..ProfileConfig::default()
        };
        profile.purchase.views_required_per_purchase_min = 1;
        profile.purchase.views_required_per_purchase_max = 1;
        profile.purchase.checkout_failure_probability_max = 0.0;
        profile
    }

    struct Fixture {
        policy: PurchasePolicy,
        global: GlobalConfig,
        catalog: ReferenceCatalog,
        state: ProfileState,
        rng: RngManager,
    }

    impl Fixture {
        fn new() -> Self {
            let config = SimulationConfig::default();
            let policy = PurchasePolicy::new(Arc::new(profile()));
            let mut state = ProfileState::new("buyer", base() - Duration::days(1));
            let mut rng = RngManager::new(31);
            for model in policy.variables() {
                VariableManager::new(model).initialize(&mut state, base(), &mut rng);
            }
            Self {
                policy,
                catalog: ReferenceCatalog::from_config(&config),
                global: config.global,
                state,
                rng,
            }
        }

        fn create(&mut self, start: Timestamp) -> EventCollection {
            let mut ctx = PolicyContext {
                actor_id: "buyer",
                global: &self.global,
                catalog: &self.catalog,
                state: &mut self.state,
                rng: &mut self.rng,
            };
            self.policy
                .create_custom_events(&mut ctx, start, start + Duration::days(1))
                .unwrap()
                .unwrap_or_default()
        }
    }

    fn checkouts(events: &EventCollection) -> Vec<&Checkout> {
        events
            .log_events()
            .iter()
            .filter_map(|event| match &event.action {
                LogAction::Checkout(checkout) => Some(checkout.as_ref()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_engaged_buyer_checks_out() {
        let mut fixture = Fixture::new();
        let events = fixture.create(base());

        let found = checkouts(&events);
        assert!(!found.is_empty(), "fully engaged buyer should check out");
        for checkout in found {
            assert!(checkout.is_successful);
            assert!(!checkout.items.is_empty());
            assert!(checkout.plan.is_some());
        }
        assert!(fixture.state.purchase.checkout_probabilities.is_some());
        assert!(!fixture.state.purchase.item_interests.is_empty());
    }

    #[test]
    fn test_checkout_consequences_follow_checkout() {
        let mut fixture = Fixture::new();
        let events = fixture.create(base());

        for event in events.log_events() {
            let Some(consequences) = event.detached_consequences() else {
                continue;
            };
            assert!(consequences.log_events().len() >= 3);
            assert!(consequences.log_events().iter().all(|follow_up| follow_up.ts > event.ts));
        }
    }

    #[test]
    fn test_planned_timeline_is_ordered() {
        let mut fixture = Fixture::new();
        fixture.global.rating_probability = 1.0;
        let mut ctx = PolicyContext {
            actor_id: "buyer",
            global: &fixture.global,
            catalog: &fixture.catalog,
            state: &mut fixture.state,
            rng: &mut fixture.rng,
        };

        for is_urgent in [true, false] {
            for _ in 0..50 {
                let plan = plan_checkout(&mut ctx, base(), is_urgent, false, 0);
                assert!(plan.schedule_ts > plan.payment_ts);
                match plan.outcome {
                    CheckoutOutcome::Delivered {
                        delivery_ts,
                        rating: Some((rate_ts, _)),
                        ..
                    } => {
                        assert!(delivery_ts > plan.schedule_ts);
                        assert!(rate_ts > delivery_ts, "rated at {} before delivery at {}", rate_ts, delivery_ts);
                    }
                    other => panic!("expected a rated delivery, got {:?}", other),
                }
            }
        }
    }

    #[test]
    fn test_regular_delivery_lands_on_weekday_daytime() {
        let mut rng = RngManager::new(4);
        // Friday evening
        let ts = Utc.with_ymd_and_hms(2020, 1, 10, 21, 0, 0).unwrap();
        for _ in 0..200 {
            let delivery = delivery_timestamp(&mut rng, ts, 10, false);
            assert!(delivery >= ts + Duration::seconds(MIN_DELIVERY_DELAY_SECONDS));
            if delivery > ts + Duration::hours(12) {
                assert!(!matches!(delivery.weekday(), Weekday::Sat | Weekday::Sun));
                assert!((8..20).contains(&delivery.hour()), "delivered at {}", delivery);
            }
        }
    }

    #[test]
    fn test_urgent_delivery_within_five_hours() {
        let mut rng = RngManager::new(4);
        let ts = base() + Duration::hours(10);
        for _ in 0..100 {
            let delivery = delivery_timestamp(&mut rng, ts, 10, true);
            assert!(delivery >= ts + Duration::hours(1));
            assert!(delivery <= ts + Duration::hours(5));
        }
    }
}
