//! Simulation configuration.
//!
//! Loaded from YAML. Every field has a default, so a configuration file only
//! needs to state what differs. Profiles may share settings through a
//! `default` profile, which is merged underneath every other profile before
//! the profiles are deserialized.
//!
//! ```yaml
//! global:
//!   seed: 42
//!   start_ts: 2020-01-01T00:00:00Z
//!   end_ts: 2020-02-01T00:00:00Z
//! users:
//!   population: { initial_min: 100, initial_max: 100, target_min_count: 100, target_max_count: 300 }
//!   profiles:
//!     default: { event_probabilities: { page: 1.0 } }
//!     reader: { occurrence_probability: 1.0 }
//! ```

use crate::core::time::Timestamp;
use crate::managers::{EngagementConfig, PopulationConfig};
use crate::models::event::CatalogType;
use crate::models::log_event::NudgeResponseAction;
use chrono::{Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the profile merged under all others.
pub const DEFAULT_PROFILE: &str = "default";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Profile {0} not configured")]
    UnknownProfile(String),
}

// ============================================================================
// Global settings
// ============================================================================

/// Retry budget for external collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff_ms: 2000,
            multiplier: 2.0,
        }
    }
}

fn default_start_ts() -> Timestamp {
    Utc.timestamp_opt(1_577_836_800, 0).single().unwrap_or_default()
}

fn default_end_ts() -> Option<Timestamp> {
    Utc.timestamp_opt(1_580_515_200, 0).single()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub seed: u64,
    pub start_ts: Timestamp,
    /// Simulation stops once the clock reaches this instant
    pub end_ts: Option<Timestamp>,
    pub tick_increment_seconds: i64,
    /// Closer than this to wall-clock time the driver runs online
    pub online_threshold_seconds: i64,
    pub sleep_interval_seconds: i64,
    pub maintenance_interval_seconds: i64,
    pub randomise_registration_times: bool,
    pub manage_population_counts_per_profile: bool,
    pub rating_probability: f64,
    pub use_nudges: bool,
    pub organisation: String,
    pub project: String,
    pub retry: RetryConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            start_ts: default_start_ts(),
            end_ts: default_end_ts(),
            tick_increment_seconds: 3600,
            online_threshold_seconds: 3600,
            sleep_interval_seconds: 60,
            maintenance_interval_seconds: 600,
            randomise_registration_times: true,
            manage_population_counts_per_profile: false,
            rating_probability: 0.01,
            use_nudges: false,
            organisation: "demo".to_string(),
            project: "demo".to_string(),
            retry: RetryConfig::default(),
        }
    }
}

impl GlobalConfig {
    pub fn tick_increment(&self) -> Duration {
        Duration::seconds(self.tick_increment_seconds)
    }

    pub fn online_threshold(&self) -> Duration {
        Duration::seconds(self.online_threshold_seconds)
    }

    pub fn sleep_interval(&self) -> Duration {
        Duration::seconds(self.sleep_interval_seconds)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::seconds(self.maintenance_interval_seconds)
    }

    /// Subject id used for app ratings.
    pub fn app_id(&self) -> String {
        format!("{}_{}", self.organisation, self.project)
    }
}

// ============================================================================
// Profiles
// ============================================================================

/// Behavior policy an actor of a profile runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorKind {
    SessionEngagement,
    PurchaseEngagement,
    EventPerPeriod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductUserType {
    Web,
    Mobile,
}

/// Event families a session is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTypeKind {
    Page,
    Search,
    Video,
    Audio,
    Image,
}

impl EventTypeKind {
    /// Catalog the events of this kind draw their records from.
    pub fn catalog_type(&self) -> Option<CatalogType> {
        match self {
            EventTypeKind::Page => Some(CatalogType::Page),
            EventTypeKind::Video => Some(CatalogType::MediaVideo),
            EventTypeKind::Audio => Some(CatalogType::MediaAudio),
            EventTypeKind::Image => Some(CatalogType::MediaImage),
            EventTypeKind::Search => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NudgeConfig {
    pub checks_per_day_min: i64,
    pub checks_per_day_max: i64,
    pub bonus_session_count: i64,
    pub bonus_session_days: i64,
    pub response_probabilities: BTreeMap<NudgeResponseAction, f64>,
    /// Engagement change applied when a nudge is opened
    pub engagement_effect: EngagementConfig,
}

impl Default for NudgeConfig {
    fn default() -> Self {
        Self {
            checks_per_day_min: 1,
            checks_per_day_max: 1,
            bonus_session_count: 1,
            bonus_session_days: 1,
            response_probabilities: [
                (NudgeResponseAction::Open, 1.0),
                (NudgeResponseAction::Discard, 1.0),
                (NudgeResponseAction::Block, 1.0),
            ]
            .into_iter()
            .collect(),
            engagement_effect: EngagementConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub seconds_per_event: i64,
    pub delivery_delay_max_days: i64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            seconds_per_event: 60,
            delivery_delay_max_days: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PurchaseConfig {
    /// Chance a purchase session starts with ordinary browsing
    pub normal_event_probability: f64,
    pub checkout_failure_probability_min: f64,
    pub checkout_failure_probability_max: f64,
    pub checkout_urgent_probability_min: f64,
    pub checkout_urgent_probability_max: f64,
    pub checkout_cancellation_probability_min: f64,
    pub checkout_cancellation_probability_max: f64,
    /// Share of the shop catalog an actor is interested in
    pub interest_catalog_range_min: f64,
    pub interest_catalog_range_max: f64,
    pub views_required_per_purchase_min: i64,
    pub views_required_per_purchase_max: i64,
    pub views_per_session_min: i64,
    pub views_per_session_max: i64,
    pub purchase_count_per_item_min: i64,
    pub purchase_count_per_item_max: i64,
    pub catalog_type_probabilities: BTreeMap<CatalogType, f64>,
}

impl Default for PurchaseConfig {
    fn default() -> Self {
        Self {
            normal_event_probability: 0.0,
            checkout_failure_probability_min: 0.0,
            checkout_failure_probability_max: 0.2,
            checkout_urgent_probability_min: 0.0,
            checkout_urgent_probability_max: 0.5,
            checkout_cancellation_probability_min: 0.0,
            checkout_cancellation_probability_max: 0.2,
            interest_catalog_range_min: 0.1,
            interest_catalog_range_max: 0.2,
            views_required_per_purchase_min: 2,
            views_required_per_purchase_max: 5,
            views_per_session_min: 1,
            views_per_session_max: 5,
            purchase_count_per_item_min: 1,
            purchase_count_per_item_max: 5,
            catalog_type_probabilities: [
                CatalogType::Blood,
                CatalogType::Drug,
                CatalogType::Oxygen,
                CatalogType::MedicalEquipment,
            ]
            .into_iter()
            .map(|catalog_type| (catalog_type, 1.0))
            .collect(),
        }
    }
}

/// One "type" of actor the simulation populates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub user_type: BehaviorKind,
    pub product_user_type: ProductUserType,
    pub occurrence_probability: f64,
    pub online_probability: f64,
    pub session_min_count: i64,
    pub session_max_count: i64,
    pub session_length_min_seconds: i64,
    pub session_length_max_seconds: i64,
    pub session_hourly_start_probabilities: Vec<f64>,
    /// Monday first
    pub session_day_of_week_probabilities: Vec<f64>,
    pub background_per_minute_probability: f64,
    pub event_probabilities: BTreeMap<EventTypeKind, f64>,
    pub session_engagement: EngagementConfig,
    pub purchase_engagement: EngagementConfig,
    pub nudges: NudgeConfig,
    pub schedule: ScheduleConfig,
    pub purchase: PurchaseConfig,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            user_type: BehaviorKind::SessionEngagement,
            product_user_type: ProductUserType::Web,
            occurrence_probability: 0.0,
            online_probability: 0.2,
            session_min_count: 1,
            session_max_count: 1,
            session_length_min_seconds: 60,
            session_length_max_seconds: 3600,
            session_hourly_start_probabilities: vec![1.0 / 24.0; 24],
            session_day_of_week_probabilities: vec![1.0; 7],
            background_per_minute_probability: 0.0,
            event_probabilities: BTreeMap::new(),
            session_engagement: EngagementConfig::default(),
            purchase_engagement: EngagementConfig::default(),
            nudges: NudgeConfig::default(),
            schedule: ScheduleConfig::default(),
            purchase: PurchaseConfig::default(),
        }
    }
}

fn check_probability(label: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{} must lie within [0, 1], got {}", label, value)))
    }
}

fn check_range<T: PartialOrd + std::fmt::Display>(label: &str, min: T, max: T) -> Result<(), ConfigError> {
    if min <= max {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{}: min {} exceeds max {}", label, min, max)))
    }
}

impl ProfileConfig {
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let label = |field: &str| format!("profile {}: {}", name, field);

        check_probability(&label("occurrence_probability"), self.occurrence_probability)?;
        check_probability(&label("online_probability"), self.online_probability)?;
        check_probability(
            &label("background_per_minute_probability"),
            self.background_per_minute_probability,
        )?;

        if self.session_hourly_start_probabilities.len() != 24 {
            return Err(ConfigError::Invalid(label(
                "session_hourly_start_probabilities needs 24 entries",
            )));
        }
        if self.session_day_of_week_probabilities.len() != 7 {
            return Err(ConfigError::Invalid(label(
                "session_day_of_week_probabilities needs 7 entries",
            )));
        }

        check_range(&label("session count"), self.session_min_count, self.session_max_count)?;
        check_range(
            &label("session length"),
            self.session_length_min_seconds,
            self.session_length_max_seconds,
        )?;
        if self.session_min_count < 0 || self.session_length_min_seconds < 0 {
            return Err(ConfigError::Invalid(label("session ranges must not be negative")));
        }

        let total: f64 = self.event_probabilities.values().filter(|p| **p > 0.0).sum();
        if total <= 0.0 {
            return Err(ConfigError::Invalid(label("event_probabilities must not be empty")));
        }

        if self.schedule.seconds_per_event <= 0 {
            return Err(ConfigError::Invalid(label("schedule.seconds_per_event must be positive")));
        }

        for (field, config) in [
            ("session_engagement", &self.session_engagement),
            ("purchase_engagement", &self.purchase_engagement),
            ("nudges.engagement_effect", &self.nudges.engagement_effect),
        ] {
            config
                .validate()
                .map_err(|message| ConfigError::Invalid(format!("{}: {}", label(field), message)))?;
        }

        check_range(
            &label("nudges.checks_per_day"),
            self.nudges.checks_per_day_min,
            self.nudges.checks_per_day_max,
        )?;

        let purchase = &self.purchase;
        for (field, min, max) in [
            (
                "purchase.checkout_failure_probability",
                purchase.checkout_failure_probability_min,
                purchase.checkout_failure_probability_max,
            ),
            (
                "purchase.checkout_urgent_probability",
                purchase.checkout_urgent_probability_min,
                purchase.checkout_urgent_probability_max,
            ),
            (
                "purchase.checkout_cancellation_probability",
                purchase.checkout_cancellation_probability_min,
                purchase.checkout_cancellation_probability_max,
            ),
            (
                "purchase.interest_catalog_range",
                purchase.interest_catalog_range_min,
                purchase.interest_catalog_range_max,
            ),
        ] {
            check_probability(&label(field), min)?;
            check_probability(&label(field), max)?;
            check_range(&label(field), min, max)?;
        }
        for (field, min, max) in [
            (
                "purchase.views_required_per_purchase",
                purchase.views_required_per_purchase_min,
                purchase.views_required_per_purchase_max,
            ),
            (
                "purchase.views_per_session",
                purchase.views_per_session_min,
                purchase.views_per_session_max,
            ),
            (
                "purchase.purchase_count_per_item",
                purchase.purchase_count_per_item_min,
                purchase.purchase_count_per_item_max,
            ),
        ] {
            check_range(&label(field), min, max)?;
        }
        if self.user_type == BehaviorKind::PurchaseEngagement
            && !purchase
                .catalog_type_probabilities
                .iter()
                .any(|(catalog_type, p)| catalog_type.is_shop_item() && *p > 0.0)
        {
            return Err(ConfigError::Invalid(label(
                "purchase.catalog_type_probabilities needs a shop item type",
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Users and catalogs
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsersConfig {
    pub population: PopulationConfig,
    pub profiles: BTreeMap<String, ProfileConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub target_count: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self { target_count: 30 }
    }
}

// ============================================================================
// Root
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub global: GlobalConfig,
    pub users: UsersConfig,
    pub catalogs: BTreeMap<CatalogType, CatalogConfig>,
}

impl SimulationConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let mut value: Value = serde_yaml::from_str(yaml)?;
        if value.is_null() {
            value = Value::Mapping(Default::default());
        }
        apply_default_profile(&mut value);

        let config: SimulationConfig = serde_yaml::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let global = &self.global;
        if global.tick_increment_seconds <= 0 {
            return Err(ConfigError::Invalid("tick_increment_seconds must be positive".to_string()));
        }
        if global.maintenance_interval_seconds <= 0 {
            return Err(ConfigError::Invalid(
                "maintenance_interval_seconds must be positive".to_string(),
            ));
        }
        if global.online_threshold_seconds < 0 || global.sleep_interval_seconds < 0 {
            return Err(ConfigError::Invalid(
                "online_threshold_seconds and sleep_interval_seconds must not be negative".to_string(),
            ));
        }
        if let Some(end_ts) = global.end_ts {
            if end_ts < global.start_ts {
                return Err(ConfigError::Invalid("end_ts precedes start_ts".to_string()));
            }
        }
        check_probability("rating_probability", global.rating_probability)?;
        if global.retry.max_attempts == 0 || global.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "retry needs at least one attempt and a multiplier of at least 1".to_string(),
            ));
        }

        self.users
            .population
            .validate()
            .map_err(ConfigError::Invalid)?;

        for (name, profile) in &self.users.profiles {
            profile.validate(name)?;
            self.check_catalog_coverage(name, profile)?;
        }

        let needs_actors = self.users.population.initial_max > 0 || self.users.population.target_max_count > 0;
        let total_occurrence: f64 = self
            .users
            .profiles
            .values()
            .map(|profile| profile.occurrence_probability)
            .sum();
        if needs_actors && total_occurrence <= 0.0 {
            return Err(ConfigError::Invalid(
                "population needs at least one profile with a positive occurrence_probability".to_string(),
            ));
        }

        Ok(())
    }

    /// Every catalog a profile draws records from must have records.
    fn check_catalog_coverage(&self, name: &str, profile: &ProfileConfig) -> Result<(), ConfigError> {
        let mut needed: Vec<CatalogType> = profile
            .event_probabilities
            .iter()
            .filter(|(_, p)| **p > 0.0)
            .filter_map(|(kind, _)| kind.catalog_type())
            .collect();
        if profile.user_type == BehaviorKind::PurchaseEngagement {
            needed.extend(
                profile
                    .purchase
                    .catalog_type_probabilities
                    .iter()
                    .filter(|(catalog_type, p)| catalog_type.is_shop_item() && **p > 0.0)
                    .map(|(catalog_type, _)| *catalog_type),
            );
        }

        match needed
            .into_iter()
            .find(|catalog_type| self.catalog_config(*catalog_type).target_count == 0)
        {
            Some(empty) => Err(ConfigError::Invalid(format!(
                "profile {}: draws {} records but catalogs.{}.target_count is 0",
                name, empty, empty
            ))),
            None => Ok(()),
        }
    }

    pub fn profile(&self, name: &str) -> Result<&ProfileConfig, ConfigError> {
        self.users
            .profiles
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))
    }

    /// Settings for a catalog type, falling back to the defaults.
    pub fn catalog_config(&self, catalog_type: CatalogType) -> CatalogConfig {
        self.catalogs.get(&catalog_type).cloned().unwrap_or_default()
    }
}

/// Merge `overlay` into `base`: mappings merge key by key, anything else
/// replaces.
fn merge_yaml(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Expand the `default` profile into every other profile.
///
/// The default profile is dropped once merged; when it is the only profile
/// it stays as is.
fn apply_default_profile(root: &mut Value) {
    let Some(profiles) = root
        .get_mut("users")
        .and_then(|users| users.get_mut("profiles"))
        .and_then(Value::as_mapping_mut)
    else {
        return;
    };

    let Some(default_profile) = profiles.remove(DEFAULT_PROFILE) else {
        return;
    };

    if profiles.is_empty() {
        profiles.insert(Value::String(DEFAULT_PROFILE.to_string()), default_profile);
        return;
    }

    for (_, profile) in profiles.iter_mut() {
        let mut merged = default_profile.clone();
        let own = std::mem::replace(profile, Value::Null);
        if !own.is_null() {
            merge_yaml(&mut merged, own);
        }
        *profile = merged;
    }
}
