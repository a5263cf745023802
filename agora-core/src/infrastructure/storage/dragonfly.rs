//! Dragonfly (Redis protocol) shared store
//!
//! The shared store is allowed to be down. Construction never fails because
//! the server is unreachable; the store starts out not live and the health
//! health check flips it once a `PING` succeeds. Every operation is bounded by the
//! configured operation timeout, and any connectivity failure marks the
//! store not live until the next successful health check.
// cspell:ignore Dragonfly

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisResult, Script};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{CounterSnapshot, KeyValueStorage};
use crate::application::errors::StoreError;
use crate::config::StorageConfig;
use crate::domain::keys::KeyPattern;

/// Keys requested per `SCAN` round trip during pattern deletion
const SCAN_BATCH: usize = 500;

/// INCR plus EXPIRE-if-no-TTL, executed atomically on the server
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
local ttl = redis.call('TTL', KEYS[1])
if ttl < 0 then
  redis.call('EXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

/// Dragonfly/Redis storage backend
pub struct DragonflyStorage {
    client: Client,
    connection: RwLock<Option<ConnectionManager>>,
    live: AtomicBool,
    connect_timeout: Duration,
    operation_timeout: Duration,
    increment_script: Script,
}

impl DragonflyStorage {
    /// Create the backend and attempt a first connection.
    ///
    /// # Errors
    /// Only a malformed URL is an error. An unreachable server yields a store
    /// that reports `is_live() == false` until the health check reaches it.
    pub async fn connect(config: &StorageConfig) -> Result<Self, StoreError> {
        let client = Client::open(config.dragonfly_url.as_str()).map_err(|e| {
            error!("Invalid Dragonfly URL {}: {}", config.dragonfly_url, e);
            StoreError::Backend(format!("invalid Dragonfly URL: {}", e))
        })?;

        let storage = Self {
            client,
            connection: RwLock::new(None),
            live: AtomicBool::new(false),
            connect_timeout: config.connect_timeout(),
            operation_timeout: config.operation_timeout(),
            increment_script: Script::new(INCREMENT_SCRIPT),
        };

        if storage.check_health().await {
            info!("Connected to Dragonfly at {}", config.dragonfly_url);
        } else {
            warn!(
                "Dragonfly at {} is unreachable, starting with the local store",
                config.dragonfly_url
            );
        }

        Ok(storage)
    }

    async fn establish(&self) -> Result<ConnectionManager, StoreError> {
        let manager = timeout(self.connect_timeout, ConnectionManager::new(self.client.clone()))
            .await
            .map_err(|_| StoreError::Timeout(self.connect_timeout))??;
        *self.connection.write().await = Some(manager.clone());
        Ok(manager)
    }

    async fn current_connection(&self) -> Result<ConnectionManager, StoreError> {
        let existing = self.connection.read().await.clone();
        existing.ok_or_else(|| StoreError::Unavailable("no connection to Dragonfly".into()))
    }

    fn set_live(&self, live: bool) {
        let was_live = self.live.swap(live, Ordering::SeqCst);
        match (was_live, live) {
            (false, true) => info!("Dragonfly is reachable, using the shared store"),
            (true, false) => warn!("Dragonfly marked unavailable, falling back to the local store"),
            _ => {}
        }
    }

    /// Ping the server, connecting first if there is no connection yet.
    ///
    /// Updates and returns liveness.
    pub async fn check_health(&self) -> bool {
        let result: Result<(), StoreError> = async {
            let existing = self.connection.read().await.clone();
            let mut conn = match existing {
                Some(conn) => conn,
                None => self.establish().await?,
            };
            let _pong: String = timeout(self.operation_timeout, redis::cmd("PING").query_async(&mut conn))
                .await
                .map_err(|_| StoreError::Timeout(self.operation_timeout))??;
            Ok(())
        }
        .await;

        if let Err(e) = &result {
            debug!("Dragonfly health check failed: {}", e);
        }
        self.set_live(result.is_ok());
        result.is_ok()
    }

    /// Periodically ping the server until `shutdown` fires
    pub fn spawn_health_check(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately and connect() already checked
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.check_health().await;
                    }
                    _ = shutdown.cancelled() => {
                        debug!("Dragonfly health check stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Run one operation under the operation timeout, tracking liveness
    async fn run<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let result = match self.current_connection().await {
            Ok(conn) => match timeout(self.operation_timeout, f(conn)).await {
                Ok(inner) => inner.map_err(StoreError::from),
                Err(_) => Err(StoreError::Timeout(self.operation_timeout)),
            },
            Err(e) => Err(e),
        };

        if let Err(e) = &result
            && e.is_connectivity()
        {
            warn!(operation = op, "Dragonfly operation failed: {}", e);
            self.set_live(false);
        }
        result
    }
}

#[async_trait]
impl KeyValueStorage for DragonflyStorage {
    fn backend_name(&self) -> &'static str {
        "dragonfly"
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    async fn increment(&self, key: &str, ttl_secs: u64) -> Result<CounterSnapshot, StoreError> {
        let script = &self.increment_script;
        let (count, ttl): (i64, i64) = self
            .run("INCREMENT", |mut conn| async move {
                let reply: (i64, i64) = script.key(key).arg(ttl_secs).invoke_async(&mut conn).await?;
                Ok(reply)
            })
            .await?;

        let count = u64::try_from(count)
            .map_err(|_| StoreError::Corrupt(format!("negative counter at '{}'", key)))?;
        Ok(CounterSnapshot {
            count,
            ttl_secs: u64::try_from(ttl).ok().filter(|t| *t > 0),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.run("GET", |mut conn| async move {
            let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
            Ok(value)
        })
        .await
    }

    async fn set(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<(), StoreError> {
        self.run("SET", |mut conn| async move {
            let _: () = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(ttl_secs)
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        self.run("DEL", |mut conn| async move {
            let removed: u64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
            Ok(removed)
        })
        .await
    }

    async fn delete_matching(&self, pattern: &KeyPattern) -> Result<u64, StoreError> {
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = self
                .run("SCAN", |mut conn| async move {
                    let page: (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern.as_str())
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn)
                        .await?;
                    Ok(page)
                })
                .await?;

            if !keys.is_empty() {
                removed += self
                    .run("DEL", |mut conn| async move {
                        let n: u64 = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
                        Ok(n)
                    })
                    .await?;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(pattern = %pattern, removed, "Deleted keys matching pattern");
        Ok(removed)
    }

    async fn cleanup(&self) {
        // Dragonfly handles TTL-based cleanup automatically
    }
}
