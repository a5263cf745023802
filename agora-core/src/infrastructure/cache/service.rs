//! Response cache layer
//!
//! Stores opaque payloads under keys derived from a resource class and a
//! selector. Nothing in here ever fails a request: store errors on reads are
//! misses, store errors on writes and invalidations are logged and dropped,
//! and a shared store that is not live turns every call into a bypass.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, warn};

use super::envelope::{CacheEnvelope, CompressionPolicy};
use crate::application::errors::SelectorError;
use crate::config::CacheConfig;
use crate::domain::keys::{CacheKey, KeyPattern, PatternSelector, ResourceClass, Selector};
use crate::domain::policy::TtlPolicy;
use crate::infrastructure::storage::KeyValueStorage;

/// Point-in-time cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    pub bypasses: u64,
    pub store_errors: u64,
    pub invalidations: u64,
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    bypasses: AtomicU64,
    store_errors: AtomicU64,
    invalidations: AtomicU64,
}

impl CacheCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStatistics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStatistics {
            hits,
            misses,
            bypasses: self.bypasses.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}

/// The entries a successful write makes stale
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationPlan {
    entries: Vec<(ResourceClass, Selector)>,
    patterns: Vec<(ResourceClass, PatternSelector)>,
}

impl InvalidationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop one exact entry
    pub fn entry(mut self, class: ResourceClass, selector: Selector) -> Self {
        self.entries.push((class, selector));
        self
    }

    /// Drop every entry of `class` covered by `selector`
    pub fn pattern(mut self, class: ResourceClass, selector: PatternSelector) -> Self {
        self.patterns.push((class, selector));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.patterns.is_empty()
    }
}

/// Response cache in front of read handlers
pub struct CacheLayer {
    /// Backing store; `None` disables caching entirely
    storage: Option<Arc<dyn KeyValueStorage>>,
    ttl_policy: TtlPolicy,
    key_prefix: String,
    compression: CompressionPolicy,
    enabled: bool,
    stats: CacheCounters,
}

impl CacheLayer {
    pub fn new(
        config: &CacheConfig,
        storage: Option<Arc<dyn KeyValueStorage>>,
    ) -> Result<Self, SelectorError> {
        Ok(Self {
            storage,
            ttl_policy: TtlPolicy::from_config(config)?,
            key_prefix: config.key_prefix.clone(),
            compression: CompressionPolicy::from_config(config),
            enabled: config.enabled,
            stats: CacheCounters::default(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && self.storage.is_some()
    }

    pub fn ttl_for(&self, class: &ResourceClass) -> Duration {
        self.ttl_policy.ttl_for(class)
    }

    pub fn key_for(
        &self,
        class: &ResourceClass,
        selector: &Selector,
    ) -> Result<CacheKey, SelectorError> {
        CacheKey::derive(&self.key_prefix, class, selector)
    }

    pub fn statistics(&self) -> CacheStatistics {
        self.stats.snapshot()
    }

    /// Count a bypass decided outside the layer, e.g. by an opt-out header
    pub fn record_bypass(&self) {
        CacheCounters::bump(&self.stats.bypasses);
    }

    /// The store to use for this call, if caching can happen at all
    fn usable_store(&self) -> Option<&dyn KeyValueStorage> {
        if !self.enabled {
            return None;
        }
        let store = self.storage.as_deref()?;
        if !store.is_live() {
            debug!(backend = store.backend_name(), "Cache store not live, bypassing");
            CacheCounters::bump(&self.stats.bypasses);
            return None;
        }
        Some(store)
    }

    fn derive_or_bypass(&self, class: &ResourceClass, selector: &Selector) -> Option<CacheKey> {
        let derived = self.key_for(class, selector);
        debug_assert!(derived.is_ok(), "invalid cache selector for {}: {:?}", class, derived);
        match derived {
            Ok(key) => Some(key),
            Err(e) => {
                error!(class = %class, error = %e, "Invalid cache selector, bypassing cache");
                CacheCounters::bump(&self.stats.bypasses);
                None
            }
        }
    }

    /// Look up a fresh entry
    pub async fn get(&self, class: &ResourceClass, selector: &Selector) -> Option<Vec<u8>> {
        let store = self.usable_store()?;
        let key = self.derive_or_bypass(class, selector)?;

        let raw = match store.get(key.as_str()).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key = %key, "Cache miss");
                CacheCounters::bump(&self.stats.misses);
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                CacheCounters::bump(&self.stats.store_errors);
                CacheCounters::bump(&self.stats.misses);
                return None;
            }
        };

        // Stale or unreadable entries are left for the store TTL to expire;
        // deleting here could race a concurrent fresh put
        let envelope = match CacheEnvelope::decode(&raw) {
            Ok(envelope) if envelope.is_fresh_at(Utc::now()) => envelope,
            Ok(_) => {
                debug!(key = %key, "Cache entry past its TTL");
                CacheCounters::bump(&self.stats.misses);
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Unreadable cache entry, treating as miss");
                CacheCounters::bump(&self.stats.misses);
                return None;
            }
        };

        debug!(key = %key, "Cache hit");
        CacheCounters::bump(&self.stats.hits);
        Some(envelope.payload)
    }

    /// Store `payload` for `ttl`, overwriting any previous entry
    pub async fn put(
        &self,
        class: &ResourceClass,
        selector: &Selector,
        payload: &[u8],
        ttl: Duration,
    ) {
        let Some(store) = self.usable_store() else {
            return;
        };
        let Some(key) = self.derive_or_bypass(class, selector) else {
            return;
        };

        let ttl_seconds = ttl.as_secs();
        if ttl_seconds == 0 {
            debug!(key = %key, "TTL under one second, not caching");
            return;
        }

        let encoded = match CacheEnvelope::new(payload.to_vec(), ttl_seconds).encode(self.compression)
        {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to encode cache entry");
                return;
            }
        };

        match store.set(key.as_str(), &encoded, ttl_seconds).await {
            Ok(()) => debug!(
                key = %key,
                ttl_seconds,
                bytes = encoded.len(),
                "Cached entry"
            ),
            Err(e) => {
                warn!(key = %key, error = %e, "Cache write failed");
                CacheCounters::bump(&self.stats.store_errors);
            }
        }
    }

    /// [`put`](Self::put) with the resource class's configured TTL
    pub async fn put_with_policy(&self, class: &ResourceClass, selector: &Selector, payload: &[u8]) {
        self.put(class, selector, payload, self.ttl_for(class)).await
    }

    /// Drop one exact entry; a missing entry is not an error
    pub async fn invalidate(&self, class: &ResourceClass, selector: &Selector) {
        let Some(store) = self.usable_store() else {
            return;
        };
        let Some(key) = self.derive_or_bypass(class, selector) else {
            return;
        };

        match store.delete(key.as_str()).await {
            Ok(removed) => {
                CacheCounters::bump(&self.stats.invalidations);
                debug!(key = %key, removed, "Invalidated cache entry");
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache invalidation failed");
                CacheCounters::bump(&self.stats.store_errors);
            }
        }
    }

    /// Drop every entry of `class` covered by `selector`
    pub async fn invalidate_pattern(&self, class: &ResourceClass, selector: &PatternSelector) {
        let Some(store) = self.usable_store() else {
            return;
        };
        let derived = KeyPattern::for_selector(&self.key_prefix, class, selector);
        debug_assert!(derived.is_ok(), "invalid invalidation pattern for {}: {:?}", class, derived);
        let pattern = match derived {
            Ok(pattern) => pattern,
            Err(e) => {
                error!(class = %class, error = %e, "Invalid invalidation pattern");
                return;
            }
        };

        match store.delete_matching(&pattern).await {
            Ok(removed) => {
                CacheCounters::bump(&self.stats.invalidations);
                debug!(pattern = %pattern, removed, "Invalidated cache pattern");
            }
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "Cache pattern invalidation failed");
                CacheCounters::bump(&self.stats.store_errors);
            }
        }
    }

    /// Serve from cache, or run `loader` once and cache what it returns
    pub async fn get_or_load<F, Fut, E>(
        &self,
        class: &ResourceClass,
        selector: &Selector,
        loader: F,
    ) -> Result<Vec<u8>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, E>>,
    {
        if let Some(payload) = self.get(class, selector).await {
            return Ok(payload);
        }
        let payload = loader().await?;
        self.put_with_policy(class, selector, &payload).await;
        Ok(payload)
    }

    /// Run every invalidation in `plan`.
    ///
    /// Write handlers await this before responding, so a read that starts
    /// after the write completes cannot be served an entry the write covers.
    pub async fn apply(&self, plan: &InvalidationPlan) {
        for (class, selector) in &plan.entries {
            self.invalidate(class, selector).await;
        }
        for (class, selector) in &plan.patterns {
            self.invalidate_pattern(class, selector).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::InMemoryStorage;

    fn layer() -> CacheLayer {
        let storage: Arc<dyn KeyValueStorage> = Arc::new(InMemoryStorage::new());
        CacheLayer::new(&CacheConfig::default(), Some(storage)).unwrap()
    }

    fn list() -> ResourceClass {
        ResourceClass::new("post-list").unwrap()
    }

    #[tokio::test]
    async fn test_round_trip() {
        let cache = layer();
        let selector = Selector::partitioned("c1").with_param("page", 1);

        cache.put(&list(), &selector, b"[1,2,3]", Duration::from_secs(30)).await;
        assert_eq!(cache.get(&list(), &selector).await, Some(b"[1,2,3]".to_vec()));
        assert_eq!(cache.statistics().hits, 1);
    }

    #[tokio::test]
    async fn test_disabled_layer_never_stores() {
        let storage: Arc<dyn KeyValueStorage> = Arc::new(InMemoryStorage::new());
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        let cache = CacheLayer::new(&config, Some(storage)).unwrap();
        let selector = Selector::partitioned("c1");

        cache.put(&list(), &selector, b"x", Duration::from_secs(30)).await;
        assert_eq!(cache.get(&list(), &selector).await, None);
        assert!(!cache.is_enabled());
    }

    #[tokio::test]
    async fn test_sub_second_ttl_is_not_cached() {
        let cache = layer();
        let selector = Selector::new();

        cache.put(&list(), &selector, b"x", Duration::from_millis(500)).await;
        assert_eq!(cache.get(&list(), &selector).await, None);
    }

    #[tokio::test]
    async fn test_stale_or_unreadable_entry_is_a_miss_left_in_place() {
        let storage = Arc::new(InMemoryStorage::new());
        let shared: Arc<dyn KeyValueStorage> = storage.clone();
        let cache = CacheLayer::new(&CacheConfig::default(), Some(shared)).unwrap();
        let stale_selector = Selector::partitioned("c1").with_param("page", 1);
        let corrupt_selector = Selector::partitioned("c1").with_param("page", 2);

        let stale = CacheEnvelope {
            stored_at: Utc::now() - chrono::Duration::seconds(120),
            ttl_seconds: 60,
            payload: b"old".to_vec(),
        };
        let stale_key = cache.key_for(&list(), &stale_selector).unwrap();
        let encoded = stale.encode(CompressionPolicy::disabled()).unwrap();
        storage.set(stale_key.as_str(), &encoded, 600).await.unwrap();

        let corrupt_key = cache.key_for(&list(), &corrupt_selector).unwrap();
        storage.set(corrupt_key.as_str(), b"garbage", 600).await.unwrap();

        assert_eq!(cache.get(&list(), &stale_selector).await, None);
        assert_eq!(cache.get(&list(), &corrupt_selector).await, None);
        assert_eq!(cache.statistics().misses, 2);

        // Reads never delete; the store TTL owns removal
        assert!(storage.get(stale_key.as_str()).await.unwrap().is_some());
        assert!(storage.get(corrupt_key.as_str()).await.unwrap().is_some());

        cache.put(&list(), &stale_selector, b"new", Duration::from_secs(30)).await;
        assert_eq!(cache.get(&list(), &stale_selector).await, Some(b"new".to_vec()));
    }

    #[tokio::test]
    async fn test_plan_applies_entries_and_patterns() {
        let cache = layer();
        let detail = ResourceClass::new("post-detail").unwrap();
        let post = Selector::partitioned("c1").with_param("post_id", 7);
        let page = Selector::partitioned("c1").with_param("page", 2);
        let other = Selector::partitioned("c2").with_param("page", 2);

        for (class, selector) in [(&detail, &post), (&list(), &page), (&list(), &other)] {
            cache.put(class, selector, b"x", Duration::from_secs(60)).await;
        }

        let plan = InvalidationPlan::new()
            .entry(detail.clone(), post.clone())
            .pattern(list(), PatternSelector::Partition("c1".into()));
        cache.apply(&plan).await;

        assert_eq!(cache.get(&detail, &post).await, None);
        assert_eq!(cache.get(&list(), &page).await, None);
        assert!(cache.get(&list(), &other).await.is_some());
        assert_eq!(cache.statistics().invalidations, 2);
    }
}
