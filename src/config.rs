use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_FORECAST_PERIODS: u32 = 30;
const DEFAULT_FORECAST_MAX_WORKERS: usize = 4;
const DEFAULT_FORECAST_FIT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_FORECAST_MIN_POINTS: usize = 5;
const DEFAULT_LEDGER_BASE_URL: &str = "https://api.businesscentral.dynamics.com";
const DEFAULT_LEDGER_SCOPE: &str = "https://api.businesscentral.dynamics.com/.default";

/// Connection settings for the external item ledger the sales history is
/// imported from. Absent when imports are disabled.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    /// API root, without the version segment
    #[serde(default = "default_ledger_base_url")]
    #[validate(length(min = 1))]
    pub base_url: String,

    /// OAuth2 token endpoint (client credentials grant)
    #[validate(length(min = 1))]
    pub token_url: String,

    /// Company identifier inside the ledger tenant
    #[validate(length(min = 1))]
    pub company_id: String,

    /// Ledger environment name, e.g. "production" or "sandbox"
    #[serde(default = "default_ledger_environment")]
    pub environment: String,

    #[validate(length(min = 1))]
    pub client_id: String,

    #[validate(length(min = 1))]
    pub client_secret: String,

    #[serde(default = "default_ledger_scope")]
    pub scope: String,

    #[serde(default = "default_ledger_request_timeout_secs")]
    #[validate(range(min = 1, max = 600))]
    pub request_timeout_secs: u64,

    /// Tokens are refreshed this many seconds before they expire
    #[serde(default = "default_token_refresh_margin_secs")]
    #[validate(range(max = 3600))]
    pub token_refresh_margin_secs: u64,
}

impl LedgerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn token_refresh_margin(&self) -> Duration {
        Duration::from_secs(self.token_refresh_margin_secs)
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1, message = "database_url must not be empty"))]
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    pub port: u16,

    /// Application environment
    #[validate(length(min = 1))]
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
    #[validate(range(min = 1))]
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

    /// Horizon used when a generation request does not name one
    #[serde(default = "default_forecast_periods")]
    #[validate(range(min = 1, max = 3650))]
    pub forecast_default_periods: u32,

    /// Upper bound on products fitted concurrently
    #[serde(default = "default_forecast_max_workers")]
    #[validate(range(min = 1, max = 64))]
    pub forecast_max_workers: usize,

    /// Per-product fit timeout
    #[serde(default = "default_forecast_fit_timeout_secs")]
    #[validate(range(min = 1, max = 3600))]
    pub forecast_fit_timeout_secs: u64,

    /// Minimum number of sales points required to fit a model
    #[serde(default = "default_forecast_min_points")]
    #[validate(range(min = 2, max = 10000))]
    pub forecast_min_points: usize,

    /// External item ledger used by sales imports
    #[serde(default)]
    pub ledger: Option<LedgerConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://stockcast.db?mode=rwc".to_string(),
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            environment: DEFAULT_ENV.to_string(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            forecast_default_periods: default_forecast_periods(),
            forecast_max_workers: default_forecast_max_workers(),
            forecast_fit_timeout_secs: default_forecast_fit_timeout_secs(),
            forecast_min_points: default_forecast_min_points(),
            ledger: None,
        }
    }
}

impl AppConfig {
    /// Returns true if running in production
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Returns true if running in development
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn forecast_fit_timeout(&self) -> Duration {
        Duration::from_secs(self.forecast_fit_timeout_secs)
    }

    /// Socket address string for the HTTP listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.db_min_connections > self.db_max_connections {
            let mut err = ValidationError::new("db_min_connections_exceeds_max");
            err.message = Some("db_min_connections must not exceed db_max_connections".into());
            errors.add("db_min_connections", err);
        }

        if let Some(ledger) = &self.ledger {
            if let Err(ledger_errors) = ledger.validate() {
                for (field, field_errors) in ledger_errors.field_errors() {
                    for err in field_errors {
                        errors.add(field, err.clone());
                    }
                }
            }
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
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

fn default_forecast_periods() -> u32 {
    DEFAULT_FORECAST_PERIODS
}
fn default_forecast_max_workers() -> usize {
    DEFAULT_FORECAST_MAX_WORKERS
}
fn default_forecast_fit_timeout_secs() -> u64 {
    DEFAULT_FORECAST_FIT_TIMEOUT_SECS
}
fn default_forecast_min_points() -> usize {
    DEFAULT_FORECAST_MIN_POINTS
}

fn default_ledger_base_url() -> String {
    DEFAULT_LEDGER_BASE_URL.to_string()
}
fn default_ledger_environment() -> String {
    "production".to_string()
}
fn default_ledger_scope() -> String {
    DEFAULT_LEDGER_SCOPE.to_string()
}
fn default_ledger_request_timeout_secs() -> u64 {
    30
}
fn default_token_refresh_margin_secs() -> u64 {
    60
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

/// Initializes tracing using the provided log level as the default filter.
/// `RUST_LOG` takes precedence when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("stockcast_api={},tower_http=info", level);
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

/// Built-in defaults every other source is layered on top of
fn default_builder() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("database_url", "sqlite://stockcast.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("auto_migrate", false)
}

/// Deserializes and validates a built configuration
fn finalize(config: Config) -> Result<AppConfig, AppConfigError> {
    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    Ok(app_config)
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = default_builder()?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config = finalize(config)?;
    info!("Configuration loaded successfully");
    Ok(app_config)
}
