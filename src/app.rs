//! Application setup and wiring

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio_util::sync::CancellationToken;

use agora_core::Config;
use agora_core::application::ApplicationError;
use agora_core::infrastructure::{
    AdmissionController, CacheLayer, DragonflyStorage, InMemoryStorage, KeyValueStorage,
};

use crate::domain::PostRepository;
use crate::presentation::controllers::{AppState, PostClasses};
use crate::presentation::create_router;

/// Handle returned from create_app for graceful shutdown coordination
pub struct AppHandle {
    pub router: Router,
    pub shutdown_token: CancellationToken,
}

/// Connect the shared store if configured and start its liveness check
async fn connect_shared_store(
    config: &Config,
    shutdown_token: &CancellationToken,
) -> Result<Option<Arc<dyn KeyValueStorage>>, ApplicationError> {
    if !config.storage.dragonfly_enabled {
        tracing::warn!(
            "Shared store disabled: running in local-only mode, rate limits apply per process"
        );
        return Ok(None);
    }

    let store = Arc::new(DragonflyStorage::connect(&config.storage).await?);
    Arc::clone(&store).spawn_health_check(
        Duration::from_secs(config.storage.health_check_interval_seconds),
        shutdown_token.clone(),
    );
    let store: Arc<dyn KeyValueStorage> = store;
    Ok(Some(store))
}

/// Build the router and start background tasks.
///
/// An unreachable shared store does not fail startup; requests are admitted
/// on local counters until the health check sees it come back.
pub async fn create_app(config: Config) -> Result<AppHandle, ApplicationError> {
    let shutdown_token = CancellationToken::new();

    let local_store = Arc::new(InMemoryStorage::new());
    let shared_store = connect_shared_store(&config, &shutdown_token).await?;

    let admission = Arc::new(AdmissionController::new(
        &config.rate_limit,
        shared_store.clone(),
        Arc::clone(&local_store),
    ));
    // Also sweeps cache entries when the local store backs the cache
    Arc::clone(&admission).start_cleanup_task(
        Duration::from_secs(config.storage.cleanup_interval_seconds),
        shutdown_token.clone(),
    );

    let cache_store: Arc<dyn KeyValueStorage> = match &shared_store {
        Some(shared) => Arc::clone(shared),
        None => local_store as Arc<dyn KeyValueStorage>,
    };
    let cache = Arc::new(CacheLayer::new(&config.cache, Some(cache_store))?);

    tracing::info!(
        rate_limiting = admission.is_enabled(),
        caching = cache.is_enabled(),
        backend = admission.active_backend(),
        "Admission and cache layers initialized"
    );

    let state = AppState {
        posts: Arc::new(PostRepository::new()),
        cache,
        admission,
        shared_store,
        classes: PostClasses::new()?,
    };

    Ok(AppHandle {
        router: create_router(state, &config),
        shutdown_token,
    })
}
