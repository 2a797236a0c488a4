use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

use crate::entities::truck::DEFAULT_CYLINDER_WEIGHT_KG;
use crate::services::optimizer::OrderSequence;
use crate::services::transfer::CompensationPolicy;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_DATABASE_URL: &str = "sqlite://fleet.db?mode=rwc";
const CONFIG_DIR: &str = "config";
const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_UTILIZATION_WARNING_PERCENT: f64 = 90.0;
const DEFAULT_OPTIMISTIC_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_OPTIMISTIC_BACKOFF_MS: u64 = 100;
const DEFAULT_VERIFICATION_DELAY_MS: u64 = 500;

/// Tunables for capacity evaluation, allocation and inventory movement.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct FleetConfig {
    /// Assumed weight of one cylinder, used when a truck has no explicit `capacity_kg`
    #[serde(default = "default_cylinder_weight_kg")]
    #[validate(custom = "validate_cylinder_weight")]
    pub cylinder_weight_kg: f64,

    /// Post-load / post-allocation utilization above which a warning is raised
    #[serde(default = "default_utilization_warning_percent")]
    #[validate(custom = "validate_utilization_percent")]
    pub utilization_warning_percent: f64,

    /// Attempts made by the optimistic lock before giving up
    #[serde(default = "default_optimistic_max_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub optimistic_max_attempts: u32,

    /// Linear backoff step between optimistic attempts
    #[serde(default = "default_optimistic_backoff_ms")]
    pub optimistic_backoff_ms: u64,

    /// Delay before the advisory post-transfer verification pass
    #[serde(default = "default_verification_delay_ms")]
    pub verification_delay_ms: u64,

    /// What to do with already-moved items when a batch transfer fails
    #[serde(default)]
    pub transfer_compensation: CompensationPolicy,

    /// Processing order for the fleet optimizer
    #[serde(default)]
    pub order_sequence: OrderSequence,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            cylinder_weight_kg: default_cylinder_weight_kg(),
            utilization_warning_percent: default_utilization_warning_percent(),
            optimistic_max_attempts: default_optimistic_max_attempts(),
            optimistic_backoff_ms: default_optimistic_backoff_ms(),
            verification_delay_ms: default_verification_delay_ms(),
            transfer_compensation: CompensationPolicy::default(),
            order_sequence: OrderSequence::default(),
        }
    }
}

impl FleetConfig {
    pub fn optimistic_backoff(&self) -> Duration {
        Duration::from_millis(self.optimistic_backoff_ms)
    }

    pub fn verification_delay(&self) -> Duration {
        Duration::from_millis(self.verification_delay_ms)
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Upper bound for any single backing-store call (milliseconds)
    #[serde(default = "default_store_timeout_ms")]
    #[validate(range(min = 1))]
    pub store_timeout_ms: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,

    /// Fleet engine tunables
    #[serde(default)]
    #[validate]
    pub fleet: FleetConfig,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the database.
    pub fn new(database_url: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            environment: environment.into(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            store_timeout_ms: default_store_timeout_ms(),
            event_channel_capacity: default_event_channel_capacity(),
            fleet: FleetConfig::default(),
        }
    }

    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_store_timeout_ms() -> u64 {
    DEFAULT_STORE_TIMEOUT_MS
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_cylinder_weight_kg() -> f64 {
    DEFAULT_CYLINDER_WEIGHT_KG
}

fn default_utilization_warning_percent() -> f64 {
    DEFAULT_UTILIZATION_WARNING_PERCENT
}

fn default_optimistic_max_attempts() -> u32 {
    DEFAULT_OPTIMISTIC_MAX_ATTEMPTS
}

fn default_optimistic_backoff_ms() -> u64 {
    DEFAULT_OPTIMISTIC_BACKOFF_MS
}

fn default_verification_delay_ms() -> u64 {
    DEFAULT_VERIFICATION_DELAY_MS
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_cylinder_weight(weight: f64) -> Result<(), ValidationError> {
    if !weight.is_finite() || weight <= 0.0 {
        let mut err = ValidationError::new("cylinder_weight_kg");
        err.message = Some("cylinder_weight_kg must be a finite value greater than 0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_utilization_percent(percent: f64) -> Result<(), ValidationError> {
    if !percent.is_finite() || !(1.0..=100.0).contains(&percent) {
        let mut err = ValidationError::new("utilization_warning_percent");
        err.message = Some("utilization_warning_percent must be between 1 and 100".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("cylinder_fleet_api={},sea_orm=warn", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    load_config_from(Path::new(CONFIG_DIR))
}

/// Same as [`load_config`] but reads the TOML layers from `dir`.
pub fn load_config_from(dir: &Path) -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            dir.display()
        );
    }

    let config = Config::builder()
        .set_default("database_url", DEFAULT_DATABASE_URL)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::from(dir.join("default")).required(false))
        .add_source(File::from(dir.join(&run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_default(content: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("default.toml"), content).unwrap();
        dir
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AppConfig::new("sqlite::memory:", "test");
        assert_eq!(cfg.store_timeout_ms, 5_000);
        assert_eq!(cfg.fleet.cylinder_weight_kg, 27.0);
        assert_eq!(cfg.fleet.utilization_warning_percent, 90.0);
        assert_eq!(cfg.fleet.optimistic_max_attempts, 3);
        assert_eq!(cfg.fleet.optimistic_backoff(), Duration::from_millis(100));
        assert_eq!(cfg.fleet.transfer_compensation, CompensationPolicy::Manual);
        assert_eq!(cfg.fleet.order_sequence, OrderSequence::Arrival);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn file_layer_overrides_fleet_settings() {
        let dir = write_default(
            r#"
            database_url = "sqlite::memory:"
            store_timeout_ms = 250

            [fleet]
            cylinder_weight_kg = 30.0
            transfer_compensation = "reverse"
            order_sequence = "weight_desc"
            "#,
        );

        let cfg = load_config_from(dir.path()).unwrap();
        assert_eq!(cfg.database_url, "sqlite::memory:");
        assert_eq!(cfg.store_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.fleet.cylinder_weight_kg, 30.0);
        assert_eq!(cfg.fleet.transfer_compensation, CompensationPolicy::Reverse);
        assert_eq!(cfg.fleet.order_sequence, OrderSequence::WeightDesc);
        assert_eq!(cfg.fleet.optimistic_max_attempts, 3);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let dir = write_default(
            r#"
            [fleet]
            cylinder_weight_kg = 0.0
            optimistic_max_attempts = 20
            "#,
        );

        let result = load_config_from(dir.path());
        match result {
            Err(AppConfigError::Validation(_)) => {}
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn utilization_threshold_must_be_a_percentage() {
        let mut cfg = AppConfig::new("sqlite::memory:", "test");
        cfg.fleet.utilization_warning_percent = 120.0;
        assert!(cfg.validate().is_err());
    }
}
