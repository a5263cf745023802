//! Storage doubles for exercising fallback and degrade paths

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use agora_core::application::StoreError;
use agora_core::domain::KeyPattern;
use agora_core::infrastructure::storage::{CounterSnapshot, InMemoryStorage, KeyValueStorage};

/// Stand-in for the shared store whose liveness and failures tests control.
///
/// Backed by an [`InMemoryStorage`] so it behaves like a real store while
/// healthy. A failing store keeps reporting live, which models the window
/// between an outage and the next health check.
#[derive(Default)]
pub struct ControllableStorage {
    inner: InMemoryStorage,
    down: AtomicBool,
    failing: AtomicBool,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl ControllableStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Report `is_live() == false`
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Make every operation return a backend error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of store operations attempted
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStorage for ControllableStorage {
    fn backend_name(&self) -> &'static str {
        "controllable"
    }

    fn is_live(&self) -> bool {
        !self.down.load(Ordering::SeqCst)
    }

    async fn increment(&self, key: &str, ttl_secs: u64) -> Result<CounterSnapshot, StoreError> {
        self.enter()?;
        self.inner.increment(key, ttl_secs).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.enter()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<(), StoreError> {
        self.enter()?;
        self.inner.set(key, value, ttl_secs).await
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        self.enter()?;
        self.inner.delete(key).await
    }

    async fn delete_matching(&self, pattern: &KeyPattern) -> Result<u64, StoreError> {
        self.enter()?;
        self.inner.delete_matching(pattern).await
    }

    async fn cleanup(&self) {
        self.inner.cleanup().await
    }
}
