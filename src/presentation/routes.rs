//! Route definitions and server setup

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    http::StatusCode,
    middleware,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use agora_core::Config;
use agora_core::domain::ResourceClass;

use crate::presentation::{
    controllers::{
        AppState,
        health::health_check,
        posts::{
            PARTITION_PARAM, create_post, delete_post, get_post, list_cache_params, list_posts,
            update_post,
        },
    },
    middleware::{
        AdmissionState, QueryParams, ResponseCacheState, admission_middleware, identity_middleware,
        response_cache_middleware,
    },
};

/// Scope applied to post creation on top of the general API scope
pub const POST_CREATE_SCOPE: &str = "post-create";

fn cache_state(
    state: &AppState,
    config: &Config,
    class: &ResourceClass,
    query_params: Option<QueryParams>,
) -> Arc<ResponseCacheState> {
    Arc::new(ResponseCacheState {
        cache: state.cache.clone(),
        class: class.clone(),
        partition_param: Some(PARTITION_PARAM),
        query_params,
        bypass_header: config.cache.bypass_header.clone(),
        max_body_bytes: config.cache.max_body_bytes,
    })
}

fn admission_state(state: &AppState, config: &Config, scope: &str) -> Arc<AdmissionState> {
    Arc::new(AdmissionState {
        controller: state.admission.clone(),
        scope: scope.to_string(),
        trust_forwarded_headers: config.server.trust_forwarded_headers,
    })
}

pub fn create_router(state: AppState, config: &Config) -> Router {
    let list_cache = cache_state(
        &state,
        config,
        &state.classes.list,
        Some(list_cache_params as QueryParams),
    );
    let detail_cache = cache_state(&state, config, &state.classes.detail, None);
    let create_admission = admission_state(&state, config, POST_CREATE_SCOPE);
    let general_admission = admission_state(
        &state,
        config,
        state.admission.scopes().default_scope(),
    );

    // Cache layers only see GET; writes fall through untouched
    let post_routes = Router::new()
        .route(
            "/colleges/{college_id}/posts",
            get(list_posts)
                .route_layer(middleware::from_fn_with_state(
                    list_cache,
                    response_cache_middleware,
                ))
                .merge(post(create_post).route_layer(middleware::from_fn_with_state(
                    create_admission,
                    admission_middleware,
                ))),
        )
        .route(
            "/colleges/{college_id}/posts/{post_id}",
            get(get_post)
                .route_layer(middleware::from_fn_with_state(
                    detail_cache,
                    response_cache_middleware,
                ))
                .put(update_post)
                .delete(delete_post),
        )
        .layer(middleware::from_fn_with_state(
            general_admission,
            admission_middleware,
        ));

    let service_builder = ServiceBuilder::new()
        // HTTP tracing
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.server.request_timeout_seconds),
        ))
        // Caller identity must be known before any admission check
        .layer(middleware::from_fn(identity_middleware));

    Router::new()
        .route("/health", get(health_check))
        .merge(post_routes)
        .layer(service_builder)
        .with_state(state)
}
