use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use validator::Validate;

// Default constants
pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost:5432/analytics";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

pub const DEFAULT_MIN_CONNECTIONS: usize = 1;
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;

pub const DEFAULT_CACHE_HOST: &str = "localhost";
pub const DEFAULT_CACHE_PORT: u16 = 6379;
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 3600;
pub const DEFAULT_CACHE_CONNECT_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_CACHE_RESPONSE_TIMEOUT_MS: u64 = 500;

pub const DEFAULT_MAX_ROW_LIMIT: u64 = 10000;
pub const DEFAULT_CORRECTION_LIMIT: u64 = 100;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 30000;

pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Deserialize, Default, Clone, Validate)]
pub struct AppConfig {
    #[serde(default)]
    #[validate(nested)]
    pub database: DatabaseSettings,
    #[serde(default)]
    #[validate(nested)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    #[validate(nested)]
    pub validator: ValidatorSettings,
    #[serde(default)]
    #[validate(nested)]
    pub retry: RetrySettings,
    /// Named connection targets for multi-target execution (id -> connection url)
    #[serde(default)]
    pub targets: HashMap<String, String>,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct DatabaseSettings {
    #[serde(default = "default_database_url")]
    #[validate(custom(function = "validate_database_url"))]
    pub url: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl DatabaseSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Validate)]
#[validate(schema(function = "validate_pool_bounds"))]
pub struct PoolSettings {
    #[serde(default = "default_min_connections")]
    pub min_connections: usize,
    #[serde(default = "default_max_connections")]
    #[validate(range(min = 1))]
    pub max_connections: usize,
    /// Wait for a free connection when the pool is exhausted instead of failing.
    #[serde(default = "default_true")]
    pub block_when_exhausted: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            block_when_exhausted: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_host")]
    pub host: String,
    #[serde(default = "default_cache_port")]
    pub port: u16,
    /// Logical database index on the key-value store
    #[serde(default)]
    pub db: u32,
    #[serde(default = "default_cache_ttl_seconds")]
    pub default_ttl_seconds: u64,
    #[serde(default = "default_cache_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Upper bound on a single cache command; a slower reply counts as a failure
    #[serde(default = "default_cache_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_cache_host(),
            port: default_cache_port(),
            db: 0,
            default_ttl_seconds: default_cache_ttl_seconds(),
            connect_timeout_ms: default_cache_connect_timeout_ms(),
            response_timeout_ms: default_cache_response_timeout_ms(),
        }
    }
}

impl CacheSettings {
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Validate)]
pub struct ValidatorSettings {
    /// Largest LIMIT a query may carry
    #[serde(default = "default_max_row_limit")]
    #[validate(range(min = 1))]
    pub max_row_limit: u64,
    /// LIMIT appended when a query is missing one
    #[serde(default = "default_correction_limit")]
    #[validate(range(min = 1))]
    pub correction_limit: u64,
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            max_row_limit: default_max_row_limit(),
            correction_limit: default_correction_limit(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Validate)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1))]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit newline-delimited JSON instead of human-readable lines
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_database_url() -> String {
    DEFAULT_DATABASE_URL.to_string()
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_min_connections() -> usize {
    DEFAULT_MIN_CONNECTIONS
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

fn default_cache_host() -> String {
    DEFAULT_CACHE_HOST.to_string()
}

fn default_cache_port() -> u16 {
    DEFAULT_CACHE_PORT
}

fn default_cache_ttl_seconds() -> u64 {
    DEFAULT_CACHE_TTL_SECONDS
}

fn default_cache_connect_timeout_ms() -> u64 {
    DEFAULT_CACHE_CONNECT_TIMEOUT_MS
}

fn default_cache_response_timeout_ms() -> u64 {
    DEFAULT_CACHE_RESPONSE_TIMEOUT_MS
}

fn default_max_row_limit() -> u64 {
    DEFAULT_MAX_ROW_LIMIT
}

fn default_correction_limit() -> u64 {
    DEFAULT_CORRECTION_LIMIT
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn validate_database_url(url: &str) -> Result<(), validator::ValidationError> {
    match url::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "postgres" | "postgresql") => Ok(()),
        Ok(_) => Err(validator::ValidationError::new("unsupported_scheme")),
        Err(_) => Err(validator::ValidationError::new("invalid_url")),
    }
}

fn validate_pool_bounds(pool: &PoolSettings) -> Result<(), validator::ValidationError> {
    if pool.min_connections > pool.max_connections {
        return Err(validator::ValidationError::new("min_exceeds_max"));
    }
    Ok(())
}

impl AppConfig {
    /// Load configuration from an optional file plus `SLUICE_*` environment overrides.
    ///
    /// `SLUICE_POOL__MAX_CONNECTIONS=20` maps to `pool.max_connections`.
    pub fn from_file(path: &str) -> Result<Self> {
        let builder = config::Config::builder();

        let builder = if std::path::Path::new(path).exists() {
            builder.add_source(config::File::with_name(path))
        } else {
            builder
        };

        let builder = builder.add_source(
            config::Environment::with_prefix("SLUICE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().context("Failed to build configuration")?;

        let app_config: AppConfig = cfg
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config
            .validate()
            .map_err(|e| anyhow::anyhow!("Configuration validation failed: {:?}", e))?;

        Ok(app_config)
    }
}
