//! Configuration management

pub mod validation;

pub use validation::{Validate, ValidationError};

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::policy::{KeyStrategy, ScopePolicy};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Global request timeout in seconds applied at the HTTP layer.
    pub request_timeout_seconds: u64,
    /// Take the first hop of `X-Forwarded-For` as the client origin.
    /// Disable when the service is reachable without a proxy in front.
    pub trust_forwarded_headers: bool,
    /// Grace period for background tasks on shutdown
    pub shutdown_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            request_timeout_seconds: 30,
            trust_forwarded_headers: true,
            shutdown_timeout_seconds: 5,
        }
    }
}

/// Shared and local store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Use Dragonfly/Redis as the shared store. When disabled the service
    /// runs in local-only mode and rate limits are per process.
    pub dragonfly_enabled: bool,
    /// Dragonfly connection URL (e.g., "redis://127.0.0.1:6379")
    pub dragonfly_url: String,
    pub connect_timeout_ms: u64,
    /// Upper bound on every individual store call; must stay below the
    /// request timeout so a degraded store cannot stall admission
    pub operation_timeout_ms: u64,
    /// How often the shared store liveness check runs
    pub health_check_interval_seconds: u64,
    /// Sweep interval for expired entries in the in-memory store
    pub cleanup_interval_seconds: u64,
}

impl StorageConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dragonfly_enabled: true,
            dragonfly_url: "redis://127.0.0.1:6379".to_string(),
            connect_timeout_ms: 500,
            operation_timeout_ms: 100,
            health_check_interval_seconds: 5,
            cleanup_interval_seconds: 60,
        }
    }
}

/// Fixed-window rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled
    pub enabled: bool,
    /// Prefix of every counter key
    pub key_prefix: String,
    /// Scope applied to routes without a scope of their own
    pub default_scope: String,
    /// Per-scope policies
    pub scopes: HashMap<String, ScopePolicy>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mut scopes = HashMap::new();
        scopes.insert(
            "general-api".to_string(),
            ScopePolicy::new(300, 900, KeyStrategy::PerClient),
        );
        scopes.insert(
            "auth".to_string(),
            ScopePolicy::new(10, 900, KeyStrategy::PerIp),
        );
        scopes.insert(
            "post-create".to_string(),
            ScopePolicy::new(20, 3600, KeyStrategy::PerClient),
        );

        Self {
            enabled: true,
            key_prefix: "ratelimit".to_string(),
            default_scope: "general-api".to_string(),
            scopes,
        }
    }
}

/// Response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Prefix of every cache key
    pub key_prefix: String,
    /// TTL for resource classes without an entry in `resource_ttls`
    pub default_ttl_seconds: u64,
    /// Per-resource-class TTLs in seconds
    pub resource_ttls: HashMap<String, u64>,
    /// Request header that skips the cache for freshness-sensitive calls
    pub bypass_header: String,
    /// Enable compression for entries larger than threshold
    pub enable_compression: bool,
    /// Compression threshold in bytes
    pub compression_threshold_bytes: u64,
    /// Responses with larger bodies are served but never stored
    pub max_body_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let mut resource_ttls = HashMap::new();
        resource_ttls.insert("post-list".to_string(), 30);
        resource_ttls.insert("post-detail".to_string(), 120);

        Self {
            enabled: true,
            key_prefix: "cache".to_string(),
            default_ttl_seconds: 60,
            resource_ttls,
            bypass_header: "x-cache-bypass".to_string(),
            enable_compression: true,
            compression_threshold_bytes: 10240, // 10KB
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
    Compact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl Validate for Config {
    fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.storage.validate()?;
        self.rate_limit.validate()?;
        self.cache.validate()?;
        self.logging.validate()?;

        // Counters and cache entries may share the local store
        if self.rate_limit.key_prefix == self.cache.key_prefix {
            return Err(ValidationError::cache(format!(
                "key_prefix '{}' is already used by rate_limit",
                self.cache.key_prefix
            )));
        }

        // Store calls must give up before the caller does
        let request_timeout_ms = self.server.request_timeout_seconds.saturating_mul(1000);
        if self.storage.operation_timeout_ms >= request_timeout_ms {
            return Err(ValidationError::storage(format!(
                "operation_timeout_ms ({}) must be shorter than the request timeout ({}ms)",
                self.storage.operation_timeout_ms, request_timeout_ms
            )));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigLoadError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false));

        // Add environment-specific config if ENV is set
        if let Ok(env) = std::env::var("ENV") {
            builder = builder
                .add_source(config::File::with_name(&format!("config/{}", env)).required(false));
        }

        // Add local config and environment variables last (highest priority)
        builder = builder
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("AGORA").separator("__"));

        let config: Config = builder.build()?.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }
}

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Configuration file error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Validation(#[from] ValidationError),
}
