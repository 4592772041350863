//! Tests for checkpoint save/load
//!
//! Checkpoints written through JsonFileStore must restore the exact driver
//! state, and only under the configuration that wrote them.

use chrono::{Duration, TimeZone, Utc};
use synthetic_events_core_rs::catalog::ReferenceCatalog;
use synthetic_events_core_rs::config::{BehaviorKind, CatalogConfig, EventTypeKind, ProfileConfig, ScheduleConfig};
use synthetic_events_core_rs::managers::PopulationConfig;
use synthetic_events_core_rs::models::event::CatalogType;
use synthetic_events_core_rs::nudge::NoNudges;
use synthetic_events_core_rs::persistence::{CheckpointStore, JsonFileStore};
use synthetic_events_core_rs::sink::{FileSpool, MemorySink};
use synthetic_events_core_rs::{
    Collaborators, Driver, ErrorClass, ManualClock, SimulationConfig, SimulationError, Timestamp,
};
use std::path::Path;

fn base() -> Timestamp {
    Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
}

fn config() -> SimulationConfig {
    let mut config = SimulationConfig::default();
    config.global.seed = 42;
    config.global.start_ts = base();
    config.global.end_ts = Some(base() + Duration::hours(6));
    config.global.tick_increment_seconds = 1800;
    config.global.randomise_registration_times = false;
    config.global.retry.max_attempts = 2;
    config.global.retry.initial_backoff_ms = 1;
    config.users.population = PopulationConfig::fixed(2);
    config.users.profiles.insert(
        "steady".to_string(),
        ProfileConfig {
            user_type: BehaviorKind::EventPerPeriod,
            occurrence_probability: 1.0,
            event_probabilities: [(EventTypeKind::Search, 1.0)].into_iter().collect(),
            schedule: ScheduleConfig {
                seconds_per_event: 900,
                ..ScheduleConfig::default()
            },
            ..ProfileConfig::default()
        },
    );
    config
}

fn start(dir: &Path, config: SimulationConfig, sink: MemorySink) -> Result<Driver, SimulationError> {
    let catalog = ReferenceCatalog::from_config(&config);
    Driver::new(
        config,
        Collaborators {
            store: Box::new(JsonFileStore::new(dir.join("state"))),
            sinks: vec![Box::new(sink)],
            spool: Box::new(FileSpool::new(dir.join("spool"))),
            catalog: Box::new(catalog),
            nudges: Box::new(NoNudges),
            clock: Box::new(ManualClock::new(base() + Duration::days(365))),
        },
    )
}

#[test]
fn test_checkpoint_written_every_tick() {
    let dir = tempfile::tempdir().unwrap();
    let mut driver = start(dir.path(), config(), MemorySink::default()).unwrap();
    driver.tick().unwrap();
    driver.tick().unwrap();

    let store = JsonFileStore::new(dir.path().join("state"));
    let saved = store
        .load_checkpoint(&config().global.app_id())
        .unwrap()
        .expect("checkpoint on disk");
    assert_eq!(saved.clock, base() + Duration::hours(1));
    assert_eq!(saved.tick_count, 2);
    assert_eq!(saved, driver.snapshot(), "disk holds the committed state");
}

#[test]
fn test_resume_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let sink = MemorySink::default();
    {
        let mut driver = start(dir.path(), config(), sink.clone()).unwrap();
        for _ in 0..4 {
            driver.tick().unwrap();
        }
    }

    let mut resumed = start(dir.path(), config(), sink.clone()).unwrap();
    assert_eq!(resumed.current_ts(), base() + Duration::hours(2));
    assert_eq!(resumed.time().tick_count(), 4);
    assert_eq!(resumed.state().active_count(), 2);

    let summary = resumed.run().unwrap();
    assert_eq!(summary.ticks, 8);
    assert_eq!(summary.final_ts, Some(base() + Duration::hours(6)));

    let searches = sink.events().log_events().len() - 2;
    assert_eq!(searches, 2 * 6 * 4, "one search per quarter hour per actor, no gaps or repeats");
}

#[test]
fn test_config_mismatch_rejected() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut driver = start(dir.path(), config(), MemorySink::default()).unwrap();
        driver.tick().unwrap();
    }

    let mut changed = config();
    changed.global.seed = 43;
    let err = start(dir.path(), changed, MemorySink::default())
        .err()
        .expect("checkpoint from another config is refused");
    assert!(matches!(err, SimulationError::StateValidationError(_)), "got {}", err);
    assert_eq!(err.class(), ErrorClass::Configuration);
}

#[test]
fn test_corrupt_checkpoint_is_external_failure() {
    let dir = tempfile::tempdir().unwrap();
    let key_dir = dir.path().join("state").join(config().global.app_id());
    std::fs::create_dir_all(&key_dir).unwrap();
    std::fs::write(key_dir.join("checkpoint.json"), b"{ not json").unwrap();

    let err = start(dir.path(), config(), MemorySink::default())
        .err()
        .expect("unreadable checkpoint");
    assert_eq!(err.class(), ErrorClass::External);
}

#[test]
fn test_invalid_config_rejected_before_any_tick() {
    let dir = tempfile::tempdir().unwrap();
    let mut invalid = config();
    invalid.global.tick_increment_seconds = 0;

    let err = start(dir.path(), invalid, MemorySink::default())
        .err()
        .expect("invalid config");
    assert!(matches!(err, SimulationError::InvalidConfig(_)));
    assert_eq!(err.class(), ErrorClass::Configuration);
    assert!(!dir.path().join("state").exists(), "nothing written");
}

#[test]
fn test_empty_catalog_in_use_rejected_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    if let Some(profile) = config.users.profiles.get_mut("steady") {
        profile.event_probabilities = [(EventTypeKind::Page, 1.0)].into_iter().collect();
    }
    config.catalogs.insert(CatalogType::Page, CatalogConfig { target_count: 0 });

    let err = start(dir.path(), config, MemorySink::default())
        .err()
        .expect("page catalog is empty");
    assert!(matches!(err, SimulationError::InvalidConfig(_)));
    assert_eq!(err.class(), ErrorClass::Configuration);
}
