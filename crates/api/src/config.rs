use chrono::{Duration as ChronoDuration, FixedOffset};
use domain::services::{EngineSettings, PollPolicy};
use serde::Deserialize;
use shared::jwt::{JwtConfig, JwtError};
use std::net::{AddrParseError, SocketAddr};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    /// Identity provider token verification
    pub identity: IdentityConfig,
    pub payment: PaymentConfig,
    #[serde(default)]
    pub booking: BookingConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl From<&DatabaseConfig> for persistence::db::DatabaseConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            url: config.url.clone(),
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            connect_timeout_secs: config.connect_timeout_secs,
            idle_timeout_secs: config.idle_timeout_secs,
        }
    }
}

/// Where lessons and bookings are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    /// Process-local store; state is lost on restart.
    Memory,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// RSA public key (PEM) of the identity provider
    #[serde(default)]
    pub public_key: String,

    /// Shared HS256 secret, used when no public key is configured
    #[serde(default)]
    pub token_secret: String,

    /// Leeway in seconds for clock skew tolerance
    #[serde(default = "default_jwt_leeway")]
    pub leeway_secs: u64,
}

/// Which payment provider client to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProviderKind {
    Http,
    /// In-process fake; sessions stay open until marked otherwise.
    Mock,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    #[serde(default = "default_payment_provider")]
    pub provider: PaymentProviderKind,

    /// Provider API base URL (required for the http provider)
    #[serde(default)]
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    /// HMAC secret for provider notifications; webhooks are rejected when empty
    #[serde(default)]
    pub webhook_secret: String,

    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(default = "default_payment_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_poll_max_backoff_ms")]
    pub poll_max_backoff_ms: u64,

    /// Appended to the caller's origin for the provider's success redirect
    #[serde(default = "default_success_path")]
    pub success_path: String,

    #[serde(default = "default_cancel_path")]
    pub cancel_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookingConfig {
    #[serde(default = "default_max_occurrences")]
    pub max_occurrences_per_template: usize,

    #[serde(default = "default_commission_rate_bps")]
    pub commission_rate_bps: u32,

    /// Offset from UTC in which lesson dates and times are read
    #[serde(default)]
    pub schedule_utc_offset_minutes: i32,

    #[serde(default = "default_reminder_window_hours")]
    pub reminder_window_hours: i64,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            max_occurrences_per_template: default_max_occurrences(),
            commission_rate_bps: default_commission_rate_bps(),
            schedule_utc_offset_minutes: 0,
            reminder_window_hours: default_reminder_window_hours(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_jobs_enabled")]
    pub enabled: bool,

    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    #[serde(default = "default_batch_size")]
    pub reconcile_batch_size: i64,

    #[serde(default = "default_refund_retry_interval")]
    pub refund_retry_interval_secs: u64,

    #[serde(default = "default_batch_size")]
    pub refund_retry_batch_size: i64,

    #[serde(default = "default_refund_max_attempts")]
    pub refund_max_attempts: i32,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            enabled: default_jobs_enabled(),
            reconcile_interval_secs: default_reconcile_interval(),
            reconcile_batch_size: default_batch_size(),
            refund_retry_interval_secs: default_refund_retry_interval(),
            refund_retry_batch_size: default_batch_size(),
            refund_max_attempts: default_refund_max_attempts(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    5
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_jwt_leeway() -> u64 {
    30
}
fn default_payment_provider() -> PaymentProviderKind {
    PaymentProviderKind::Http
}
fn default_currency() -> String {
    "eur".to_string()
}
fn default_payment_timeout_ms() -> u64 {
    10_000
}
fn default_poll_max_attempts() -> u32 {
    5
}
fn default_poll_interval_ms() -> u64 {
    2_000
}
fn default_poll_max_backoff_ms() -> u64 {
    16_000
}
fn default_success_path() -> String {
    "/payment-success?session_id={CHECKOUT_SESSION_ID}".to_string()
}
fn default_cancel_path() -> String {
    "/booking-cancelled".to_string()
}
fn default_max_occurrences() -> usize {
    52
}
fn default_commission_rate_bps() -> u32 {
    1_000
}
fn default_reminder_window_hours() -> i64 {
    24
}
fn default_jobs_enabled() -> bool {
    true
}
fn default_reconcile_interval() -> u64 {
    60
}
fn default_refund_retry_interval() -> u64 {
    300
}
fn default_batch_size() -> i64 {
    50
}
fn default_refund_max_attempts() -> i32 {
    5
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with SKM__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("SKM")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("security.cors_origins")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Load configuration for testing with custom overrides.
    ///
    /// Builds the config from embedded defaults so tests do not depend on
    /// the config directory.
    #[cfg(test)]
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let defaults = r#"
            [server]
            host = "0.0.0.0"
            port = 8080
            request_timeout_secs = 30

            [database]
            url = ""
            max_connections = 20
            min_connections = 5
            connect_timeout_secs = 10
            idle_timeout_secs = 600

            [storage]
            backend = "postgres"

            [logging]
            level = "info"
            format = "json"

            [security]
            cors_origins = []

            [identity]
            token_secret = "test-identity-secret-0123456789"
            leeway_secs = 30

            [payment]
            provider = "mock"
            webhook_secret = "whsec_test"
            currency = "eur"
            request_timeout_ms = 10000
            poll_max_attempts = 5
            poll_interval_ms = 2000

            [booking]
            max_occurrences_per_template = 52
            commission_rate_bps = 1000
            schedule_utc_offset_minutes = 60

            [jobs]
            enabled = false
        "#;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        // Skip validation in tests to allow partial configs
        Ok(cfg)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.storage.backend == StorageBackend::Postgres && self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "SKM__DATABASE__URL must be set when storage.backend = \"postgres\"".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Server port cannot be 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigValidationError::InvalidValue(
                "min_connections cannot exceed max_connections".to_string(),
            ));
        }

        if self.booking.commission_rate_bps > 10_000 {
            return Err(ConfigValidationError::InvalidValue(format!(
                "commission_rate_bps must be within 0..=10000, got {}",
                self.booking.commission_rate_bps
            )));
        }

        if self.booking.max_occurrences_per_template == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "max_occurrences_per_template must be at least 1".to_string(),
            ));
        }

        if self.schedule_offset().is_none() {
            return Err(ConfigValidationError::InvalidValue(format!(
                "schedule_utc_offset_minutes out of range: {}",
                self.booking.schedule_utc_offset_minutes
            )));
        }

        if self.payment.poll_max_attempts == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "poll_max_attempts must be at least 1".to_string(),
            ));
        }

        if self.payment.provider == PaymentProviderKind::Http && self.payment.base_url.is_empty()
        {
            return Err(ConfigValidationError::MissingRequired(
                "SKM__PAYMENT__BASE_URL must be set for the http payment provider".to_string(),
            ));
        }

        if self.identity.public_key.is_empty() && self.identity.token_secret.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "identity.public_key or identity.token_secret must be set".to_string(),
            ));
        }

        if self.jobs.refund_max_attempts < 1 {
            return Err(ConfigValidationError::InvalidValue(
                "refund_max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }

    pub fn schedule_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.booking.schedule_utc_offset_minutes.checked_mul(60)?)
    }

    /// Polling bounds for background reconciliation.
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            max_attempts: self.payment.poll_max_attempts,
            interval: Duration::from_millis(self.payment.poll_interval_ms),
            max_backoff: Duration::from_millis(self.payment.poll_max_backoff_ms),
            request_timeout: Duration::from_millis(self.payment.request_timeout_ms),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        let defaults = EngineSettings::default();
        let webhook_secret =
            Some(self.payment.webhook_secret.clone()).filter(|secret| !secret.is_empty());

        EngineSettings {
            max_occurrences_per_template: self.booking.max_occurrences_per_template,
            commission_rate_bps: self.booking.commission_rate_bps,
            schedule_offset: self.schedule_offset().unwrap_or(defaults.schedule_offset),
            currency: self.payment.currency.clone(),
            poll_policy: self.poll_policy(),
            refund_max_attempts: self.jobs.refund_max_attempts,
            webhook_secret,
            success_path: self.payment.success_path.clone(),
            cancel_path: self.payment.cancel_path.clone(),
            reminder_window: ChronoDuration::hours(self.booking.reminder_window_hours),
        }
    }

    /// Token verifier for the identity provider.
    pub fn jwt_config(&self) -> Result<JwtConfig, JwtError> {
        if self.identity.public_key.is_empty() {
            JwtConfig::from_secret(&self.identity.token_secret, self.identity.leeway_secs)
        } else {
            JwtConfig::from_rsa_public_pem(&self.identity.public_key, self.identity.leeway_secs)
        }
    }
}
