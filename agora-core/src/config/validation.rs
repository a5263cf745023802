//! Configuration validation module

use crate::config::{CacheConfig, LoggingConfig, RateLimitConfig, ServerConfig, StorageConfig};
use crate::domain::keys::ResourceClass;

/// Trait for validating configuration sections
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Server configuration error: {message}")]
    Server { message: String },

    #[error("Storage configuration error: {message}")]
    Storage { message: String },

    #[error("Rate limit configuration error: {message}")]
    RateLimit { message: String },

    #[error("Cache configuration error: {message}")]
    Cache { message: String },

    #[error("Logging configuration error: {message}")]
    Logging { message: String },
}

impl ValidationError {
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::RateLimit {
            message: message.into(),
        }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    pub fn logging(message: impl Into<String>) -> Self {
        Self::Logging {
            message: message.into(),
        }
    }
}

/// Key prefixes end up in glob patterns, so they must not carry metacharacters
fn is_plain_prefix(prefix: &str) -> bool {
    !prefix.is_empty()
        && !prefix
            .chars()
            .any(|c| matches!(c, '*' | '?' | '[' | ']' | '\\' | ':') || c.is_whitespace())
}

impl Validate for ServerConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::server("Port must be greater than 0"));
        }
        if self.host.trim().is_empty() {
            return Err(ValidationError::server("Host must not be empty"));
        }
        if self.request_timeout_seconds == 0 {
            return Err(ValidationError::server(
                "request_timeout_seconds must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Validate for StorageConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.dragonfly_enabled && self.dragonfly_url.trim().is_empty() {
            return Err(ValidationError::storage(
                "dragonfly_url must be set when dragonfly_enabled is true",
            ));
        }
        if self.connect_timeout_ms == 0 || self.operation_timeout_ms == 0 {
            return Err(ValidationError::storage(
                "connect_timeout_ms and operation_timeout_ms must be greater than 0",
            ));
        }
        if self.health_check_interval_seconds == 0 {
            return Err(ValidationError::storage(
                "health_check_interval_seconds must be greater than 0",
            ));
        }
        if self.cleanup_interval_seconds == 0 {
            return Err(ValidationError::storage(
                "cleanup_interval_seconds must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Validate for RateLimitConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if !is_plain_prefix(&self.key_prefix) {
            return Err(ValidationError::rate_limit(format!(
                "key_prefix '{}' must be non-empty and free of ':' and glob characters",
                self.key_prefix
            )));
        }
        if !self.scopes.contains_key(&self.default_scope) {
            return Err(ValidationError::rate_limit(format!(
                "default_scope '{}' has no policy in rate_limit.scopes",
                self.default_scope
            )));
        }
        for (scope, policy) in &self.scopes {
            if scope.is_empty() || scope.contains(':') {
                return Err(ValidationError::rate_limit(format!(
                    "scope name '{}' must be non-empty and must not contain ':'",
                    scope
                )));
            }
            if policy.limit == 0 {
                return Err(ValidationError::rate_limit(format!(
                    "scope '{}': limit must be greater than 0",
                    scope
                )));
            }
            if policy.window_seconds == 0 {
                return Err(ValidationError::rate_limit(format!(
                    "scope '{}': window_seconds must be greater than 0",
                    scope
                )));
            }
        }
        Ok(())
    }
}

impl Validate for CacheConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if !is_plain_prefix(&self.key_prefix) {
            return Err(ValidationError::cache(format!(
                "key_prefix '{}' must be non-empty and free of ':' and glob characters",
                self.key_prefix
            )));
        }
        if self.default_ttl_seconds == 0 {
            return Err(ValidationError::cache(
                "default_ttl_seconds must be greater than 0",
            ));
        }
        for (class, ttl) in &self.resource_ttls {
            ResourceClass::new(class.as_str())
                .map_err(|e| ValidationError::cache(e.to_string()))?;
            if *ttl == 0 {
                return Err(ValidationError::cache(format!(
                    "resource class '{}': TTL must be greater than 0",
                    class
                )));
            }
        }
        if is_invalid_header_name(&self.bypass_header) {
            return Err(ValidationError::cache(format!(
                "bypass_header '{}' is not a valid lowercase header name",
                self.bypass_header
            )));
        }
        if self.max_body_bytes == 0 {
            return Err(ValidationError::cache("max_body_bytes must be greater than 0"));
        }
        Ok(())
    }
}

/// Header names are matched case-insensitively and stored lowercase
fn is_invalid_header_name(name: &str) -> bool {
    name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

impl Validate for LoggingConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.level.trim().is_empty() {
            return Err(ValidationError::logging("level must not be empty"));
        }
        Ok(())
    }
}
