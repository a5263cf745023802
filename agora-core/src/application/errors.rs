//! Error types for the admission and cache layers
//!
//! Only [`ApplicationError::RateLimitExceeded`] is ever meant to reach an end
//! client. Store failures are absorbed where they happen and turned into a
//! degrade or bypass decision.

use std::time::Duration;
use thiserror::Error;

/// Failure of a single storage primitive
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("stored value is corrupt: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// True when the backend could not be reached at all
    pub fn is_connectivity(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
            StoreError::Unavailable(e.to_string())
        } else {
            StoreError::Backend(e.to_string())
        }
    }
}

/// A cache key could not be derived from the given class or selector.
///
/// Resource classes are validated when configuration is loaded, so this only
/// shows up at runtime if a handler builds a selector by hand incorrectly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("resource class name must not be empty")]
    EmptyResourceClass,

    #[error("resource class '{0}' may only contain lowercase ASCII letters, digits, '-' and '_'")]
    InvalidResourceClass(String),

    #[error("selector partition must not be empty")]
    EmptyPartition,

    #[error("selector parameter name must not be empty")]
    EmptyParameterName,
}

/// Errors surfaced by the admission and cache layers
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("rate limit exceeded for scope '{scope}', retry after {retry_after}s")]
    RateLimitExceeded {
        scope: String,
        limit: u32,
        retry_after: u64,
    },

    #[error("invalid cache selector: {0}")]
    InvalidSelector(#[from] SelectorError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApplicationError {
    /// Whether this error should be reported to the caller
    pub fn is_user_visible(&self) -> bool {
        matches!(self, ApplicationError::RateLimitExceeded { .. })
    }
}
