use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::models::ScoringWeights;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub invalidation: InvalidationSettings,
    #[serde(default)]
    pub matching: MatchingSettings,
    #[serde(default)]
    pub scoring: ScoringSettings,
    #[serde(default)]
    pub ml: MlSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub request_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub acquire_timeout_secs: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    pub l1_cache_size: Option<u64>,
    #[serde(default = "default_route_ttl_secs")]
    pub route_ttl_secs: u64,
    #[serde(default = "default_driver_stats_ttl_secs")]
    pub driver_stats_ttl_secs: u64,
    #[serde(default = "default_hub_ttl_secs")]
    pub hub_ttl_secs: u64,
    #[serde(default = "default_hub_grid_precision")]
    pub hub_grid_precision: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            l1_cache_size: None,
            route_ttl_secs: default_route_ttl_secs(),
            driver_stats_ttl_secs: default_driver_stats_ttl_secs(),
            hub_ttl_secs: default_hub_ttl_secs(),
            hub_grid_precision: default_hub_grid_precision(),
        }
    }
}

fn default_redis_url() -> String { "redis://127.0.0.1:6379".to_string() }
fn default_route_ttl_secs() -> u64 { 300 }
fn default_driver_stats_ttl_secs() -> u64 { 600 }
fn default_hub_ttl_secs() -> u64 { 3600 }
fn default_hub_grid_precision() -> u32 { 3 }

#[derive(Debug, Clone, Deserialize)]
pub struct InvalidationSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_topics")]
    pub topics: Vec<String>,
    #[serde(default = "default_resubscribe_delay_ms")]
    pub resubscribe_delay_ms: u64,
}

impl Default for InvalidationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            topics: default_topics(),
            resubscribe_delay_ms: default_resubscribe_delay_ms(),
        }
    }
}

fn default_true() -> bool { true }
fn default_resubscribe_delay_ms() -> u64 { 1000 }

fn default_topics() -> Vec<String> {
    vec![
        "route_updates".to_string(),
        "hub_updates".to_string(),
        "stop_updates".to_string(),
    ]
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchingSettings {
    #[serde(default = "default_max_candidate_routes")]
    pub max_candidate_routes: usize,
    #[serde(default = "default_time_window_minutes")]
    pub time_window_minutes: u32,
    #[serde(default = "default_performance_target_ms")]
    pub performance_target_ms: u64,
    #[serde(default = "default_enrichment_top_k")]
    pub enrichment_top_k: usize,
    #[serde(default = "default_stop_proximity_km")]
    pub stop_proximity_km: f64,
    #[serde(default = "default_recommend_threshold")]
    pub recommend_threshold: f64,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            max_candidate_routes: default_max_candidate_routes(),
            time_window_minutes: default_time_window_minutes(),
            performance_target_ms: default_performance_target_ms(),
            enrichment_top_k: default_enrichment_top_k(),
            stop_proximity_km: default_stop_proximity_km(),
            recommend_threshold: default_recommend_threshold(),
        }
    }
}

fn default_max_candidate_routes() -> usize { 50 }
fn default_time_window_minutes() -> u32 { 30 }
fn default_performance_target_ms() -> u64 { 100 }
fn default_enrichment_top_k() -> usize { 20 }
fn default_stop_proximity_km() -> f64 { 2.0 }
fn default_recommend_threshold() -> f64 { 0.7 }

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScoringSettings {
    #[serde(default)]
    pub weights: WeightsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeightsConfig {
    #[serde(default = "default_route_match_weight")]
    pub route_match: f64,
    #[serde(default = "default_time_match_weight")]
    pub time_match: f64,
    #[serde(default = "default_rating_weight")]
    pub rating: f64,
    #[serde(default = "default_price_weight")]
    pub price: f64,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            route_match: default_route_match_weight(),
            time_match: default_time_match_weight(),
            rating: default_rating_weight(),
            price: default_price_weight(),
        }
    }
}

fn default_route_match_weight() -> f64 { 0.40 }
fn default_time_match_weight() -> f64 { 0.30 }
fn default_rating_weight() -> f64 { 0.15 }
fn default_price_weight() -> f64 { 0.15 }

impl From<&WeightsConfig> for ScoringWeights {
    fn from(value: &WeightsConfig) -> Self {
        ScoringWeights {
            route_match: value.route_match,
            time_match: value.time_match,
            rating: value.rating,
            price: value.price,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MlSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
}

impl Default for MlSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            alpha: default_alpha(),
        }
    }
}

fn default_alpha() -> f64 { 0.6 }

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "compact".to_string() }

impl Settings {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values in the struct
    /// 2. Configuration file (config/default.toml)
    /// 3. Local overrides (config/local.toml)
    /// 4. Environment variables (prefixed with CARPOOL__)
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // e.g., CARPOOL__SERVER__PORT -> server.port
            .add_source(
                Environment::with_prefix("CARPOOL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings = apply_url_overrides(settings)?;

        Ok(settings.try_deserialize()?)
    }

    /// Load configuration from a custom path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("CARPOOL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

/// Conventional DATABASE_URL / REDIS_URL variables win over file values
fn apply_url_overrides(settings: Config) -> Result<Config, config::ConfigError> {
    let mut builder = Config::builder().add_source(settings);

    if let Ok(url) = std::env::var("DATABASE_URL") {
        builder = builder.set_override("database.url", url)?;
    }
    if let Ok(url) = std::env::var("REDIS_URL") {
        builder = builder.set_override("cache.redis_url", url)?;
    }

    builder.build()
}

/// TTLs for the three typed caches plus the hub grid resolution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheTtls {
    pub route: Duration,
    pub driver_stats: Duration,
    pub hub: Duration,
    /// Decimal places kept when snapping coordinates to the hub grid
    pub hub_grid_precision: u32,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            route: Duration::from_secs(default_route_ttl_secs()),
            driver_stats: Duration::from_secs(default_driver_stats_ttl_secs()),
            hub: Duration::from_secs(default_hub_ttl_secs()),
            hub_grid_precision: default_hub_grid_precision(),
        }
    }
}

/// Immutable matching configuration, validated once at start-up
#[derive(Debug, Clone, PartialEq)]
pub struct MatchingConfig {
    pub weights: ScoringWeights,
    pub max_candidate_routes: usize,
    pub time_window_minutes: u32,
    pub performance_target_ms: u64,
    pub enrichment_top_k: usize,
    pub stop_proximity_km: f64,
    pub recommend_threshold: f64,
    pub ml_enabled: bool,
    pub hybrid_alpha: f64,
    pub cache_ttls: CacheTtls,
}

const MAX_TTL_SECS: u64 = 86_400;

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            max_candidate_routes: default_max_candidate_routes(),
            time_window_minutes: default_time_window_minutes(),
            performance_target_ms: default_performance_target_ms(),
            enrichment_top_k: default_enrichment_top_k(),
            stop_proximity_km: default_stop_proximity_km(),
            recommend_threshold: default_recommend_threshold(),
            ml_enabled: true,
            hybrid_alpha: default_alpha(),
            cache_ttls: CacheTtls::default(),
        }
    }
}

impl MatchingConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let matching = &settings.matching;
        let cache = &settings.cache;

        let config = Self {
            weights: ScoringWeights::from(&settings.scoring.weights),
            max_candidate_routes: matching.max_candidate_routes,
            time_window_minutes: matching.time_window_minutes,
            performance_target_ms: matching.performance_target_ms,
            enrichment_top_k: matching.enrichment_top_k,
            stop_proximity_km: matching.stop_proximity_km,
            recommend_threshold: matching.recommend_threshold,
            ml_enabled: settings.ml.enabled,
            hybrid_alpha: settings.ml.alpha,
            cache_ttls: CacheTtls {
                route: Duration::from_secs(cache.route_ttl_secs),
                driver_stats: Duration::from_secs(cache.driver_stats_ttl_secs),
                hub: Duration::from_secs(cache.hub_ttl_secs),
                hub_grid_precision: cache.hub_grid_precision,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Check every bound; weights must sum to 1.0 within tolerance
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_weights(&self.weights)?;

        if !(1..=500).contains(&self.max_candidate_routes) {
            return Err(invalid("max_candidate_routes", "must be between 1 and 500"));
        }
        if !(1..=720).contains(&self.time_window_minutes) {
            return Err(invalid("time_window_minutes", "must be between 1 and 720"));
        }
        if self.performance_target_ms == 0 {
            return Err(invalid("performance_target_ms", "must be positive"));
        }
        if self.enrichment_top_k == 0 {
            return Err(invalid("enrichment_top_k", "must be at least 1"));
        }
        if !(self.stop_proximity_km > 0.0) {
            return Err(invalid("stop_proximity_km", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.recommend_threshold) {
            return Err(invalid("recommend_threshold", "must be within [0, 1]"));
        }

        let ttls = [
            ("cache.route_ttl_secs", self.cache_ttls.route),
            ("cache.driver_stats_ttl_secs", self.cache_ttls.driver_stats),
            ("cache.hub_ttl_secs", self.cache_ttls.hub),
        ];
        for (field, ttl) in ttls {
            let secs = ttl.as_secs();
            if secs == 0 || secs > MAX_TTL_SECS {
                return Err(invalid(field, "must be between 1 and 86400 seconds"));
            }
        }
        if !(1..=6).contains(&self.cache_ttls.hub_grid_precision) {
            return Err(invalid("cache.hub_grid_precision", "must be between 1 and 6"));
        }

        Ok(())
    }
}

/// Each weight in [0, 1], total 1.0 ± 0.01
pub fn validate_weights(weights: &ScoringWeights) -> Result<(), ConfigError> {
    let parts = [
        weights.route_match,
        weights.time_match,
        weights.rating,
        weights.price,
    ];
    if parts.iter().any(|w| !(0.0..=1.0).contains(w)) {
        return Err(invalid("scoring.weights", "each weight must be within [0, 1]"));
    }
    if !weights.is_normalized() {
        return Err(ConfigError::InvalidWeights { sum: weights.sum() });
    }
    Ok(())
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}
