use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
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
const DEFAULT_RATE_LIMIT_SUBMISSIONS: u32 = 5;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 300;
const DEFAULT_RATE_LIMIT_NAMESPACE: &str = "gift:rl";
const DEFAULT_VENDOR_BASE_URL: &str = "https://api.zinc.io";
const DEFAULT_VENDOR_RETAILER: &str = "amazon";
const DEV_DEFAULT_WEBHOOK_SECRET: &str = "development_webhook_signing_secret_change_me_in_production";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Redis connection URL (rate limiter backend)
    pub redis_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    pub port: u16,

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

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// DB pool tuning
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1))]
    pub db_max_connections: u32,
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Per-user fulfillment submissions allowed per window
    #[serde(default = "default_rate_limit_submissions")]
    #[validate(range(min = 1))]
    pub rate_limit_submissions_per_window: u32,
    /// Rate limiting window size (seconds)
    #[serde(default = "default_rate_limit_window_secs")]
    #[validate(range(min = 1))]
    pub rate_limit_window_seconds: u64,
    /// Enable Redis-backed rate limiter
    #[serde(default)]
    pub rate_limit_use_redis: bool,
    /// Namespace for rate limiter keys when Redis is enabled
    #[serde(default = "default_rate_limit_namespace")]
    pub rate_limit_namespace: String,

    /// Capacity of the in-process message queue per topic
    #[serde(default = "default_message_queue_capacity")]
    #[validate(range(min = 1))]
    pub message_queue_capacity: usize,
    /// Idle poll interval for queue consumers (milliseconds)
    #[serde(default = "default_message_queue_poll_interval_ms")]
    pub message_queue_poll_interval_ms: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,

    // ========== Fulfillment vendor ==========
    /// Base URL of the fulfillment vendor API
    #[serde(default = "default_vendor_base_url")]
    pub vendor_api_base_url: String,
    /// Vendor API key (sent as the basic-auth username)
    #[serde(default)]
    pub vendor_api_key: Option<String>,
    /// Upper bound for any single vendor round trip
    #[serde(default = "default_vendor_timeout_secs")]
    #[validate(range(min = 1, max = 300))]
    pub vendor_timeout_secs: u64,
    #[serde(default = "default_vendor_retailer")]
    pub vendor_retailer: String,

    /// Public base URL the vendor calls back on
    #[serde(default = "default_webhook_base_url")]
    pub webhook_base_url: String,
    /// Secret used to derive per-order webhook tokens
    #[serde(default = "default_webhook_signing_secret")]
    #[validate(length(min = 32))]
    pub webhook_signing_secret: String,

    /// Token required by the force-process and redrive endpoints
    #[serde(default)]
    pub admin_api_token: Option<String>,

    // ========== Funding gate ==========
    #[serde(default = "default_funding_pool_id")]
    pub funding_pool_id: String,
    /// Amount always kept back from the pool
    #[serde(default = "default_funding_safety_margin")]
    #[validate(custom = "validate_non_negative")]
    pub funding_safety_margin: Decimal,
    /// Multiplier applied to the order amount to cover vendor markup and tax
    #[serde(default = "default_funding_buffer_multiplier")]
    pub funding_buffer_multiplier: Decimal,
    /// Settlement window of the payment processor feeding the pool
    #[serde(default = "default_funding_settlement_delay_days")]
    #[validate(range(min = 0, max = 60))]
    pub funding_settlement_delay_days: i64,
    /// Days between expected funding and scheduled delivery
    #[serde(default = "default_funding_processing_offset_days")]
    #[validate(range(min = 0, max = 60))]
    pub funding_processing_offset_days: i64,
    /// Proceed when the pool balance cannot be determined
    #[serde(default = "default_true_bool")]
    pub funding_fail_open: bool,
    /// Approved holds older than this are treated as charged once a fresh
    /// vendor balance is read
    #[serde(default = "default_funding_in_flight_ttl_secs")]
    pub funding_in_flight_ttl_secs: u64,

    // ========== Submission ==========
    /// Fraction added to the product subtotal for the vendor max price
    #[serde(default = "default_max_price_buffer_pct")]
    #[validate(custom = "validate_non_negative")]
    pub max_price_buffer_pct: Decimal,
    /// Fixed allowance added on top for shipping and tax
    #[serde(default = "default_max_price_allowance")]
    #[validate(custom = "validate_non_negative")]
    pub max_price_allowance: Decimal,
    /// A processing claim older than this may be taken over by another trigger
    #[serde(default = "default_processing_claim_ttl_secs")]
    #[validate(range(min = 1))]
    pub processing_claim_ttl_secs: u64,
    /// Maximum orders handled by one redrive sweep
    #[serde(default = "default_redrive_batch_size")]
    #[validate(range(min = 1, max = 1000))]
    pub redrive_batch_size: u64,
    #[serde(default = "default_redrive_concurrency")]
    #[validate(range(min = 1, max = 64))]
    pub redrive_concurrency: usize,

    // ========== Circuit Breaker Configuration ==========
    /// Number of failures before circuit breaker opens
    #[serde(default = "default_circuit_breaker_failures")]
    pub circuit_breaker_failure_threshold: u32,
    /// Circuit breaker reset timeout in seconds
    #[serde(default = "default_circuit_breaker_timeout")]
    pub circuit_breaker_timeout_secs: u64,

    // ========== Auto-gifting ==========
    /// Totals above this always need manual approval
    #[serde(default = "default_auto_gift_approval_threshold")]
    #[validate(custom = "validate_non_negative")]
    pub auto_gift_approval_threshold: Decimal,

    /// Recipient for operator alerts about orders needing attention
    #[serde(default)]
    pub ops_notification_email: Option<String>,
}

impl AppConfig {
    /// Builds a configuration with every tunable at its default.
    pub fn new(database_url: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            redis_url: "redis://localhost:6379".to_string(),
            host: "0.0.0.0".to_string(),
            port: default_port(),
            environment: environment.into(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            rate_limit_submissions_per_window: default_rate_limit_submissions(),
            rate_limit_window_seconds: default_rate_limit_window_secs(),
            rate_limit_use_redis: false,
            rate_limit_namespace: default_rate_limit_namespace(),
            message_queue_capacity: default_message_queue_capacity(),
            message_queue_poll_interval_ms: default_message_queue_poll_interval_ms(),
            event_channel_capacity: default_event_channel_capacity(),
            vendor_api_base_url: default_vendor_base_url(),
            vendor_api_key: None,
            vendor_timeout_secs: default_vendor_timeout_secs(),
            vendor_retailer: default_vendor_retailer(),
            webhook_base_url: default_webhook_base_url(),
            webhook_signing_secret: default_webhook_signing_secret(),
            admin_api_token: None,
            funding_pool_id: default_funding_pool_id(),
            funding_safety_margin: default_funding_safety_margin(),
            funding_buffer_multiplier: default_funding_buffer_multiplier(),
            funding_settlement_delay_days: default_funding_settlement_delay_days(),
            funding_processing_offset_days: default_funding_processing_offset_days(),
            funding_fail_open: default_true_bool(),
            funding_in_flight_ttl_secs: default_funding_in_flight_ttl_secs(),
            max_price_buffer_pct: default_max_price_buffer_pct(),
            max_price_allowance: default_max_price_allowance(),
            processing_claim_ttl_secs: default_processing_claim_ttl_secs(),
            redrive_batch_size: default_redrive_batch_size(),
            redrive_concurrency: default_redrive_concurrency(),
            circuit_breaker_failure_threshold: default_circuit_breaker_failures(),
            circuit_breaker_timeout_secs: default_circuit_breaker_timeout(),
            auto_gift_approval_threshold: default_auto_gift_approval_threshold(),
            ops_notification_email: None,
        }
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
            || self.environment.eq_ignore_ascii_case("test")
    }

    /// Returns true if explicit CORS origins are configured
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    pub fn vendor_timeout(&self) -> Duration {
        Duration::from_secs(self.vendor_timeout_secs)
    }

    pub fn processing_claim_ttl(&self) -> Duration {
        Duration::from_secs(self.processing_claim_ttl_secs)
    }

    pub fn funding_in_flight_ttl(&self) -> Duration {
        Duration::from_secs(self.funding_in_flight_ttl_secs)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if !self.is_development() && self.webhook_signing_secret.trim() == DEV_DEFAULT_WEBHOOK_SECRET
        {
            let mut err = ValidationError::new("webhook_signing_secret_default_dev");
            err.message = Some(
                "The bundled development webhook secret must not be used outside development. Set APP__WEBHOOK_SIGNING_SECRET."
                    .into(),
            );
            errors.add("webhook_signing_secret", err);
        }

        if !self.is_development()
            && self
                .admin_api_token
                .as_deref()
                .map(|t| t.trim().len() < 16)
                .unwrap_or(true)
        {
            let mut err = ValidationError::new("admin_api_token_required");
            err.message = Some(
                "Set APP__ADMIN_API_TOKEN (at least 16 characters) outside development".into(),
            );
            errors.add("admin_api_token", err);
        }

        if self.funding_buffer_multiplier < Decimal::ONE {
            let mut err = ValidationError::new("funding_buffer_multiplier");
            err.message = Some("funding_buffer_multiplier must be at least 1.0".into());
            errors.add("funding_buffer_multiplier", err);
        }

        if self.db_min_connections > self.db_max_connections {
            let mut err = ValidationError::new("db_min_connections");
            err.message = Some("db_min_connections cannot exceed db_max_connections".into());
            errors.add("db_min_connections", err);
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

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
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
fn default_rate_limit_submissions() -> u32 {
    DEFAULT_RATE_LIMIT_SUBMISSIONS
}
fn default_rate_limit_window_secs() -> u64 {
    DEFAULT_RATE_LIMIT_WINDOW_SECS
}
fn default_rate_limit_namespace() -> String {
    DEFAULT_RATE_LIMIT_NAMESPACE.to_string()
}
fn default_message_queue_capacity() -> usize {
    1000
}
fn default_message_queue_poll_interval_ms() -> u64 {
    250
}
fn default_event_channel_capacity() -> usize {
    1024
}
fn default_vendor_base_url() -> String {
    DEFAULT_VENDOR_BASE_URL.to_string()
}
fn default_vendor_timeout_secs() -> u64 {
    30
}
fn default_vendor_retailer() -> String {
    DEFAULT_VENDOR_RETAILER.to_string()
}
fn default_webhook_base_url() -> String {
    format!("http://localhost:{}", DEFAULT_PORT)
}
fn default_webhook_signing_secret() -> String {
    DEV_DEFAULT_WEBHOOK_SECRET.to_string()
}
fn default_funding_pool_id() -> String {
    crate::entities::funding_pool::DEFAULT_POOL_ID.to_string()
}
fn default_funding_safety_margin() -> Decimal {
    dec!(50.00)
}
fn default_funding_buffer_multiplier() -> Decimal {
    dec!(1.10)
}
fn default_funding_settlement_delay_days() -> i64 {
    2
}
fn default_funding_processing_offset_days() -> i64 {
    1
}
fn default_funding_in_flight_ttl_secs() -> u64 {
    900
}
fn default_true_bool() -> bool {
    true
}
fn default_max_price_buffer_pct() -> Decimal {
    dec!(0.10)
}
fn default_max_price_allowance() -> Decimal {
    dec!(10.00)
}
fn default_processing_claim_ttl_secs() -> u64 {
    900
}
fn default_redrive_batch_size() -> u64 {
    50
}
fn default_redrive_concurrency() -> usize {
    4
}
fn default_circuit_breaker_failures() -> u32 {
    5
}
fn default_circuit_breaker_timeout() -> u64 {
    60
}
fn default_auto_gift_approval_threshold() -> Decimal {
    dec!(100.00)
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

fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() {
        let mut err = ValidationError::new("non_negative");
        err.message = Some("Value must not be negative".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("gift_fulfillment={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration from `./config`.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    load_config_from(Path::new(CONFIG_DIR))
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. `{dir}/default.toml`
/// 3. `{dir}/{RUN_ENV}.toml`
/// 4. Environment variables (`APP__*`)
pub fn load_config_from(dir: &Path) -> Result<AppConfig, AppConfigError> {
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
        .set_default("database_url", "sqlite://gift_fulfillment.db?mode=rwc")?
        .set_default("redis_url", "redis://localhost:6379")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env.clone())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .add_source(File::from(dir.join("default")).required(false))
        .add_source(File::from(dir.join(&run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn production_config() -> AppConfig {
        let mut cfg = AppConfig::new("sqlite::memory:", "production");
        cfg.cors_allowed_origins = Some("https://gifts.example.com".into());
        cfg.webhook_signing_secret = "a-very-long-production-signing-secret-value".into();
        cfg.admin_api_token = Some("admin-token-0123456789".into());
        cfg
    }

    #[test]
    fn defaults_validate_in_development() {
        let cfg = AppConfig::new("sqlite::memory:", "development");
        assert!(cfg.validate().is_ok());
        assert!(cfg.validate_additional_constraints().is_ok());
        assert_eq!(cfg.funding_buffer_multiplier, dec!(1.10));
        assert_eq!(cfg.funding_settlement_delay_days, 2);
        assert_eq!(cfg.funding_processing_offset_days, 1);
        assert!(cfg.funding_fail_open);
    }

    #[test]
    fn production_rejects_development_webhook_secret() {
        let mut cfg = production_config();
        cfg.webhook_signing_secret = DEV_DEFAULT_WEBHOOK_SECRET.into();
        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors.field_errors().contains_key("webhook_signing_secret"));
    }

    #[test]
    fn production_requires_admin_token() {
        let mut cfg = production_config();
        cfg.admin_api_token = None;
        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors.field_errors().contains_key("admin_api_token"));
    }

    #[test]
    fn production_with_secrets_passes() {
        assert!(production_config().validate_additional_constraints().is_ok());
    }

    #[test]
    fn buffer_multiplier_below_one_is_rejected() {
        let mut cfg = AppConfig::new("sqlite::memory:", "development");
        cfg.funding_buffer_multiplier = dec!(0.9);
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn negative_safety_margin_is_rejected() {
        let mut cfg = AppConfig::new("sqlite::memory:", "development");
        cfg.funding_safety_margin = dec!(-1);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn loads_file_layer_over_defaults() {
        let dir = TempDir::new().unwrap();
        let mut file = std::fs::File::create(dir.path().join("default.toml")).unwrap();
        writeln!(
            file,
            r#"
            database_url = "sqlite::memory:"
            vendor_api_base_url = "http://vendor.test"
            funding_safety_margin = "125.50"
            funding_fail_open = false
            "#
        )
        .unwrap();

        let cfg = load_config_from(dir.path()).unwrap();
        assert_eq!(cfg.vendor_api_base_url, "http://vendor.test");
        assert_eq!(cfg.funding_safety_margin, dec!(125.50));
        assert!(!cfg.funding_fail_open);
        assert_eq!(cfg.port, DEFAULT_PORT);
    }
}
