//! Admission controller
//!
//! Fixed-window counting on top of [`KeyValueStorage::increment`]. The window
//! is anchored at the first request a client makes in a scope and lasts for
//! the scope's `window_seconds`; the counter key simply expires when it ends.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::types::{AdmissionDecision, ClientIdentity, DecisionSource};
use crate::application::errors::StoreError;
use crate::config::RateLimitConfig;
use crate::domain::policy::{ScopeTable, rate_limit_key};
use crate::infrastructure::storage::{CounterSnapshot, InMemoryStorage, KeyValueStorage};

/// Counter store chosen for one admission check
enum CounterBackend<'a> {
    Shared(&'a dyn KeyValueStorage),
    Local(&'a InMemoryStorage),
}

impl CounterBackend<'_> {
    fn source(&self) -> DecisionSource {
        match self {
            CounterBackend::Shared(_) => DecisionSource::Shared,
            CounterBackend::Local(_) => DecisionSource::Local,
        }
    }

    async fn increment(&self, key: &str, window_seconds: u64) -> Result<CounterSnapshot, StoreError> {
        match self {
            CounterBackend::Shared(store) => store.increment(key, window_seconds).await,
            CounterBackend::Local(store) => store.increment(key, window_seconds).await,
        }
    }
}

/// Main admission service
pub struct AdmissionController {
    /// Shared store, absent in local-only mode
    shared: Option<Arc<dyn KeyValueStorage>>,
    /// Per-process fallback
    local: Arc<InMemoryStorage>,
    scopes: ScopeTable,
    key_prefix: String,
    enabled: bool,
}

impl AdmissionController {
    pub fn new(
        config: &RateLimitConfig,
        shared: Option<Arc<dyn KeyValueStorage>>,
        local: Arc<InMemoryStorage>,
    ) -> Self {
        Self {
            shared,
            local,
            scopes: ScopeTable::from_config(config),
            key_prefix: config.key_prefix.clone(),
            enabled: config.enabled,
        }
    }

    /// Check if rate limiting is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn scopes(&self) -> &ScopeTable {
        &self.scopes
    }

    /// Re-evaluated on every call so a recovered shared store is picked up
    /// without any mode switch
    fn select_backend(&self) -> CounterBackend<'_> {
        match &self.shared {
            Some(store) if store.is_live() => CounterBackend::Shared(store.as_ref()),
            _ => CounterBackend::Local(self.local.as_ref()),
        }
    }

    /// Name of the backend the next check would use
    pub fn active_backend(&self) -> &'static str {
        match self.select_backend() {
            CounterBackend::Shared(store) => store.backend_name(),
            CounterBackend::Local(store) => store.backend_name(),
        }
    }

    /// Count one request for `client_key` in `scope` and decide on it.
    ///
    /// A store failure admits the request uncounted.
    pub async fn admit(
        &self,
        scope: &str,
        client_key: &str,
        limit: u32,
        window_seconds: u64,
    ) -> AdmissionDecision {
        if !self.enabled {
            return AdmissionDecision::disabled();
        }

        let key = rate_limit_key(&self.key_prefix, scope, client_key);
        let backend = self.select_backend();

        let snapshot = match backend.increment(&key, window_seconds).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    scope,
                    client = client_key,
                    source = backend.source().as_str(),
                    error = %e,
                    "Counter store failed, admitting request uncounted"
                );
                return AdmissionDecision::degraded(limit, window_seconds);
            }
        };

        let limit_u64 = u64::from(limit);
        let allowed = snapshot.count <= limit_u64;
        let remaining = u32::try_from(limit_u64.saturating_sub(snapshot.count)).unwrap_or(0);
        let reset_seconds = snapshot.ttl_secs.unwrap_or(window_seconds);

        if allowed {
            debug!(
                scope,
                client = client_key,
                count = snapshot.count,
                remaining,
                source = backend.source().as_str(),
                "Request admitted"
            );
        } else {
            warn!(
                scope,
                client = client_key,
                count = snapshot.count,
                limit,
                reset_seconds,
                source = backend.source().as_str(),
                "Rate limit exceeded"
            );
        }

        AdmissionDecision {
            allowed,
            limit,
            remaining,
            reset_seconds,
            source: backend.source(),
        }
    }

    /// Resolve the scope policy and caller key, then [`admit`](Self::admit)
    pub async fn admit_request(&self, scope: &str, identity: &ClientIdentity) -> AdmissionDecision {
        let (scope, policy) = self.scopes.resolve(scope);
        let client_key = identity.client_key(policy.key_strategy);
        self.admit(scope, &client_key, policy.limit, policy.window_seconds)
            .await
    }

    /// Periodically sweep expired counters from the local store
    pub fn start_cleanup_task(
        self: Arc<Self>,
        period: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.local.cleanup().await;
                        debug!("Rate limiter cleanup completed");
                    }
                    _ = shutdown.cancelled() => {
                        debug!("Rate limiter cleanup task stopped");
                        break;
                    }
                }
            }
        })
    }
}
