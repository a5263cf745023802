//! In-memory key/value store
//!
//! Per-process stand-in for the shared store. Counters live next to cached
//! payloads in a single map and are kept as decimal strings, the same way the
//! shared store represents them. Expiry is lazy: a read past `expires_at`
//! treats the entry as absent, and [`KeyValueStorage::cleanup`] reclaims the
//! memory periodically.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use super::{CounterSnapshot, KeyValueStorage};
use crate::application::errors::StoreError;
use crate::domain::keys::KeyPattern;

/// In-memory storage entry with expiration
#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }

    fn remaining_secs(&self, now: Instant) -> Option<u64> {
        self.expires_at.map(|at| ceil_secs(at.saturating_duration_since(now)))
    }
}

/// Whole seconds, rounded up so a live entry never reports zero
fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 { secs + 1 } else { secs }
}

/// In-memory storage backend for local-only mode and shared store outages
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    entries: Arc<RwLock<HashMap<String, MemoryEntry>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held, including expired ones not yet swept
    pub async fn entry_count(&self) -> usize {
        self.entries.read().await.len()
    }
}

fn require_ttl(ttl_secs: u64) -> Result<Duration, StoreError> {
    if ttl_secs == 0 {
        return Err(StoreError::Backend("TTL must be at least one second".into()));
    }
    Ok(Duration::from_secs(ttl_secs))
}

#[async_trait]
impl KeyValueStorage for InMemoryStorage {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn is_live(&self) -> bool {
        true
    }

    async fn increment(&self, key: &str, ttl_secs: u64) -> Result<CounterSnapshot, StoreError> {
        let ttl = require_ttl(ttl_secs)?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        let entry = entries
            .entry(key.to_string())
            .and_modify(|e| {
                if !e.is_live(now) {
                    e.value.clear();
                    e.expires_at = None;
                }
            })
            .or_insert_with(|| MemoryEntry {
                value: Vec::new(),
                expires_at: None,
            });

        let current = if entry.value.is_empty() {
            0
        } else {
            std::str::from_utf8(&entry.value)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| {
                    StoreError::Corrupt(format!("value at '{}' is not an integer", key))
                })?
        };

        let count = current + 1;
        entry.value = count.to_string().into_bytes();
        if entry.expires_at.is_none() {
            entry.expires_at = Some(now + ttl);
        }

        Ok(CounterSnapshot {
            count,
            ttl_secs: entry.remaining_secs(now),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = self.entries.read().await;
        if let Some(entry) = entries.get(key)
            && entry.is_live(Instant::now())
        {
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<(), StoreError> {
        let ttl = require_ttl(ttl_secs)?;
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_vec(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        Ok(match entries.remove(key) {
            Some(entry) if entry.is_live(now) => 1,
            _ => 0,
        })
    }

    async fn delete_matching(&self, pattern: &KeyPattern) -> Result<u64, StoreError> {
        let matcher = pattern
            .to_regex()
            .map_err(|e| StoreError::Backend(format!("invalid key pattern '{}': {}", pattern, e)))?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        let mut removed = 0;
        entries.retain(|key, entry| {
            if !matcher.is_match(key) {
                return true;
            }
            if entry.is_live(now) {
                removed += 1;
            }
            false
        });
        Ok(removed)
    }

    async fn cleanup(&self) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        debug!(
            removed = before - entries.len(),
            remaining = entries.len(),
            "Completed in-memory storage cleanup"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_increment_anchors_window_at_first_call() {
        let storage = InMemoryStorage::new();

        let first = storage.increment("rl:a", 60).await.unwrap();
        assert_eq!(first, CounterSnapshot { count: 1, ttl_secs: Some(60) });

        tokio::time::advance(Duration::from_secs(20)).await;
        let second = storage.increment("rl:a", 60).await.unwrap();
        assert_eq!(second.count, 2);
        assert_eq!(second.ttl_secs, Some(40));

        tokio::time::advance(Duration::from_secs(41)).await;
        let fresh = storage.increment("rl:a", 60).await.unwrap();
        assert_eq!(fresh, CounterSnapshot { count: 1, ttl_secs: Some(60) });
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_seconds_round_up() {
        let storage = InMemoryStorage::new();
        storage.increment("rl:b", 10).await.unwrap();

        tokio::time::advance(Duration::from_millis(9_500)).await;
        let snapshot = storage.increment("rl:b", 10).await.unwrap();
        assert_eq!(snapshot.ttl_secs, Some(1));
    }

    #[tokio::test]
    async fn test_increment_on_non_integer_is_corrupt() {
        let storage = InMemoryStorage::new();
        storage.set("rl:c", b"payload", 60).await.unwrap();

        let err = storage.increment("rl:c", 60).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[tokio::test]
    async fn test_zero_ttl_rejected() {
        let storage = InMemoryStorage::new();
        assert!(storage.set("k", b"v", 0).await.is_err());
        assert!(storage.increment("k", 0).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_honours_expiry() {
        let storage = InMemoryStorage::new();
        storage.set("cache:x::", b"body", 5).await.unwrap();
        assert_eq!(storage.get("cache:x::").await.unwrap(), Some(b"body".to_vec()));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(storage.get("cache:x::").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_counts_live_keys_only() {
        let storage = InMemoryStorage::new();
        storage.set("k", b"v", 60).await.unwrap();

        assert_eq!(storage.delete("k").await.unwrap(), 1);
        assert_eq!(storage.delete("k").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_matching() {
        let storage = InMemoryStorage::new();
        storage.set("cache:post-list:c1:page=1", b"a", 60).await.unwrap();
        storage.set("cache:post-list:c1:page=2", b"b", 60).await.unwrap();
        storage.set("cache:post-list:c2:page=1", b"c", 60).await.unwrap();
        storage.set("cache:post-detail:c1:id=9", b"d", 60).await.unwrap();

        let removed = storage
            .delete_matching(&KeyPattern::raw("cache:post-list:c1:*"))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert!(storage.get("cache:post-list:c2:page=1").await.unwrap().is_some());
        assert!(storage.get("cache:post-detail:c1:id=9").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_drops_expired_entries() {
        let storage = InMemoryStorage::new();
        storage.set("short", b"v", 1).await.unwrap();
        storage.set("long", b"v", 120).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        storage.cleanup().await;

        assert_eq!(storage.entry_count().await, 1);
        assert!(storage.get("long").await.unwrap().is_some());
    }
}
