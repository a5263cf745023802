//! Key/value storage backends
//!
//! Both the admission controller and the cache layer talk to storage through
//! [`KeyValueStorage`]:
//! - [`DragonflyStorage`] for the shared, network-reachable store
//! - [`InMemoryStorage`] for the per-process fallback used while the shared
//!   store is down (or when none is configured)
//!
//! Every primitive is a single atomic operation on the backend; callers never
//! compose a read-modify-write out of several of them.

pub mod dragonfly;
pub mod memory;

pub use dragonfly::DragonflyStorage;
pub use memory::InMemoryStorage;

use async_trait::async_trait;

use crate::application::errors::StoreError;
use crate::domain::keys::KeyPattern;

/// Counter value and remaining TTL right after an increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub count: u64,
    /// Seconds until the counter expires, if the backend reported it
    pub ttl_secs: Option<u64>,
}

/// Trait for key/value storage backends
#[async_trait]
pub trait KeyValueStorage: Send + Sync {
    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;

    /// Whether the backend is currently believed reachable
    fn is_live(&self) -> bool;

    /// Atomically increment `key`, setting a TTL of `ttl_secs` if the key has none
    async fn increment(&self, key: &str, ttl_secs: u64) -> Result<CounterSnapshot, StoreError>;

    /// Get a value
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Set a value with TTL
    async fn set(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<(), StoreError>;

    /// Delete a key, returning how many keys were removed
    async fn delete(&self, key: &str) -> Result<u64, StoreError>;

    /// Delete every key matching `pattern`, returning how many were removed
    async fn delete_matching(&self, pattern: &KeyPattern) -> Result<u64, StoreError>;

    /// Cleanup expired entries (for in-memory storage)
    async fn cleanup(&self);
}
