//! Health check endpoint

use axum::{Json, extract::State};
use chrono::Utc;

use crate::presentation::controllers::AppState;
use crate::presentation::models::{HealthResponse, SharedStoreStatus};

/// Liveness plus a snapshot of the shared store and cache counters.
///
/// A down shared store reports `degraded`, never an error: the service keeps
/// serving on local counters.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let shared_store = match &state.shared_store {
        None => SharedStoreStatus::Disabled,
        Some(store) if store.is_live() => SharedStoreStatus::Live,
        Some(_) => SharedStoreStatus::Down,
    };
    let status = if shared_store == SharedStoreStatus::Down {
        "degraded"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        shared_store,
        admission_backend: state.admission.active_backend().to_string(),
        cache: state.cache.statistics(),
        timestamp: Utc::now(),
    })
}
