//! Integration tests for the Driver tick loop
//!
//! Drives whole simulations against in-memory collaborators and checks the
//! delivered streams.

use chrono::{Duration, TimeZone, Utc};
use serde_json::json;
use synthetic_events_core_rs::catalog::ReferenceCatalog;
use synthetic_events_core_rs::config::{BehaviorKind, EventTypeKind, ProfileConfig, ScheduleConfig};
use synthetic_events_core_rs::core::time::ClockMode;
use synthetic_events_core_rs::managers::PopulationConfig;
use synthetic_events_core_rs::models::event::CatalogType;
use synthetic_events_core_rs::models::log_event::{IdentifyAction, LogAction};
use synthetic_events_core_rs::nudge::NoNudges;
use synthetic_events_core_rs::persistence::MemoryStore;
use synthetic_events_core_rs::sink::{MemorySink, MemorySpool};
use synthetic_events_core_rs::{
    CatalogEvent, Collaborators, Driver, EventCollection, LogEvent, ManualClock, SimulationConfig, Timestamp,
};

fn base() -> Timestamp {
    Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
}

fn is_register(event: &LogEvent) -> bool {
    event.action
        == LogAction::Identify {
            action: IdentifyAction::Register,
        }
}

/// `actors` steady actors, one event every `seconds_per_event`, one-minute
/// ticks for `ticks` minutes.
fn steady_config(actors: i64, seconds_per_event: i64, ticks: i64) -> SimulationConfig {
    let mut config = SimulationConfig::default();
    config.global.seed = 1234;
    config.global.start_ts = base();
    config.global.end_ts = Some(base() + Duration::minutes(ticks));
    config.global.tick_increment_seconds = 60;
    config.global.randomise_registration_times = false;
    config.global.retry.max_attempts = 2;
    config.global.retry.initial_backoff_ms = 1;
    config.users.population = PopulationConfig::fixed(actors);
    config.users.profiles.insert(
        "steady".to_string(),
        ProfileConfig {
            user_type: BehaviorKind::EventPerPeriod,
            occurrence_probability: 1.0,
            event_probabilities: [(EventTypeKind::Page, 1.0)].into_iter().collect(),
            schedule: ScheduleConfig {
                seconds_per_event,
                ..ScheduleConfig::default()
            },
            ..ProfileConfig::default()
        },
    );
    config
}

struct Harness {
    store: MemoryStore,
    sink: MemorySink,
    spool: MemorySpool,
    clock: ManualClock,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: MemoryStore::new(),
            sink: MemorySink::default(),
            spool: MemorySpool::new(),
            clock: ManualClock::new(base() + Duration::days(3650)),
        }
    }

    fn driver(&self, config: SimulationConfig) -> Driver {
        let catalog = ReferenceCatalog::from_config(&config);
        match Driver::new(
            config,
            Collaborators {
                store: Box::new(self.store.clone()),
                sinks: vec![Box::new(self.sink.clone())],
                spool: Box::new(self.spool.clone()),
                catalog: Box::new(catalog),
                nudges: Box::new(NoNudges),
                clock: Box::new(self.clock.clone()),
            },
        ) {
            Ok(driver) => driver,
            Err(err) => panic!("driver failed to start: {}", err),
        }
    }
}

#[test]
fn test_one_event_per_second_for_one_tick() {
    let harness = Harness::new();
    let mut driver = harness.driver(steady_config(1, 1, 60));

    let result = driver.tick().unwrap();
    assert_eq!(result.start_ts, base());
    assert_eq!(result.end_ts, base() + Duration::seconds(60));

    let delivered = harness.sink.events();
    let behavior: Vec<Timestamp> = delivered
        .log_events()
        .iter()
        .filter(|e| !is_register(e))
        .map(|e| e.ts)
        .collect();
    assert_eq!(behavior.len(), 60, "one event per second over a one-minute tick");
    assert!(
        behavior.windows(2).all(|pair| pair[0] < pair[1]),
        "timestamps strictly increase"
    );
    assert_eq!(behavior.first(), Some(&base()));
    assert_eq!(behavior.last(), Some(&(base() + Duration::seconds(59))));

    let actor = driver.state().actors().next().expect("one actor");
    assert_eq!(actor.last_seen_ts(), result.end_ts, "actor clock at the boundary");
    assert_eq!(driver.current_ts(), result.end_ts);
}

#[test]
fn test_every_log_event_carries_its_catalog_event() {
    let harness = Harness::new();
    let mut driver = harness.driver(steady_config(2, 15, 5));
    driver.run().unwrap();

    let delivered = harness.sink.events();
    let pages = delivered
        .log_events()
        .iter()
        .filter(|e| matches!(e.action, LogAction::Page { .. }))
        .count();
    let page_records = delivered
        .catalog_events()
        .iter()
        .filter(|e| e.catalog_type == CatalogType::Page)
        .count();
    let users = delivered
        .catalog_events()
        .iter()
        .filter(|e| e.catalog_type == CatalogType::User)
        .count();
    assert_eq!(pages, 2 * 5 * 4);
    assert_eq!(page_records, pages);
    assert_eq!(users, 2, "one user record per registration");
}

#[test]
fn test_detached_events_released_day_by_day() {
    let harness = Harness::new();
    let mut config = steady_config(0, 60, 0);
    config.global.tick_increment_seconds = 86_400;
    config.global.end_ts = Some(base() + Duration::days(3));
    let mut driver = harness.driver(config);

    let day = |n: i64| base() + Duration::days(n);
    let mut detached = EventCollection::new();
    detached.insert(LogEvent::new(
        day(1) + Duration::hours(12),
        "someone",
        false,
        LogAction::Delivery {
            order_id: "order_1".to_string(),
            delivery_id: "delivery_1".to_string(),
            item_ids: vec![],
        },
    ));
    detached.insert(LogEvent::new(
        day(2),
        "someone",
        false,
        LogAction::Search {
            query: "at the boundary".to_string(),
            result_count: 0,
        },
    ));
    detached.insert(CatalogEvent::new(day(2), CatalogType::Drug, "drug_extra", json!({})));
    driver.schedule_detached(detached).unwrap();

    let first = driver.tick().unwrap();
    assert_eq!((first.log_events, first.catalog_events), (0, 0), "nothing due on day one");

    let second = driver.tick().unwrap();
    assert_eq!(second.end_ts, day(2));
    assert_eq!(second.log_events, 1, "log event at the boundary waits");
    assert_eq!(second.catalog_events, 2, "order record plus the boundary record");

    let third = driver.tick().unwrap();
    assert_eq!(third.log_events, 1);
    assert!(driver.relay().is_empty());
    assert!(driver.time().is_finished());

    let delivered = harness.sink.events();
    let orders: Vec<&CatalogEvent> = delivered
        .catalog_events()
        .iter()
        .filter(|e| e.catalog_type == CatalogType::Order)
        .collect();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].ts, day(1) + Duration::hours(12));
}

#[test]
fn test_detached_event_surfaces_in_first_tick_reaching_it() {
    let harness = Harness::new();
    let mut config = steady_config(0, 60, 0);
    config.global.tick_increment_seconds = 86_400;
    config.global.end_ts = Some(base() + Duration::days(8));
    let mut driver = harness.driver(config);

    let due = base() + Duration::days(5) + Duration::hours(3);
    let mut detached = EventCollection::new();
    detached.insert(LogEvent::new(
        due,
        "someone",
        false,
        LogAction::Search {
            query: "five days out".to_string(),
            result_count: 0,
        },
    ));
    driver.schedule_detached(detached).unwrap();

    let mut seen_in = Vec::new();
    while !driver.time().is_finished() {
        let result = driver.tick().unwrap();
        if result.log_events > 0 {
            seen_in.push(result.end_ts);
        }
    }
    assert_eq!(seen_in, vec![base() + Duration::days(6)], "released exactly once, in the sixth tick");
}

#[test]
fn test_scheduling_behind_released_boundary_fails() {
    let harness = Harness::new();
    let mut driver = harness.driver(steady_config(0, 60, 5));
    driver.tick().unwrap();

    let mut late = EventCollection::new();
    late.insert(CatalogEvent::new(base(), CatalogType::Drug, "drug_late", json!({})));
    assert!(driver.schedule_detached(late).is_err());
}

#[test]
fn test_restore_continues_identically() {
    let config = steady_config(3, 120, 30);

    let uninterrupted = Harness::new();
    uninterrupted.driver(config.clone()).run().unwrap();

    let split = Harness::new();
    {
        let mut first = split.driver(config.clone());
        for _ in 0..12 {
            first.tick().unwrap();
        }
    }
    let mut resumed = split.driver(config);
    assert_eq!(resumed.current_ts(), base() + Duration::minutes(12), "resumed at the checkpoint");
    assert_eq!(resumed.state().active_count(), 3);
    let summary = resumed.run().unwrap();
    assert_eq!(summary.ticks, 18);

    assert_eq!(
        uninterrupted.sink.events(),
        split.sink.events(),
        "a restore in between changes nothing"
    );
}

#[test]
fn test_same_seed_same_stream() {
    let first = Harness::new();
    let second = Harness::new();
    first.driver(steady_config(4, 120, 10)).run().unwrap();
    second.driver(steady_config(4, 120, 10)).run().unwrap();
    assert_eq!(first.sink.events(), second.sink.events());

    let mut reseeded = steady_config(4, 120, 10);
    reseeded.global.seed = 99;
    let third = Harness::new();
    third.driver(reseeded).run().unwrap();
    let actor_ids = |sink: &MemorySink| -> Vec<String> {
        sink.events()
            .log_events()
            .iter()
            .filter(|e| is_register(e))
            .map(|e| e.actor_id.clone())
            .collect()
    };
    assert_ne!(actor_ids(&first.sink), actor_ids(&third.sink), "ids come from the seed");
}

#[test]
fn test_online_mode_when_caught_up() {
    let harness = Harness::new();
    harness.clock.set(base() + Duration::seconds(30));
    let mut config = steady_config(1, 10, 5);
    config.global.end_ts = None;
    let mut driver = harness.driver(config);

    let result = driver.tick().unwrap();
    assert_eq!(result.mode, ClockMode::Online);
    assert!(
        result.end_ts <= base() + Duration::seconds(30),
        "never simulates past real time"
    );
}
