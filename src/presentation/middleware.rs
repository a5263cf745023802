//! HTTP middleware: caller identity, admission control and response caching

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::{Body, HttpBody},
    extract::{ConnectInfo, RawPathParams, Request, State, rejection::RawPathParamsRejection},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header, response::Parts},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use agora_core::application::ApplicationError;
use agora_core::domain::{ResourceClass, Selector};
use agora_core::infrastructure::{AdmissionController, AdmissionDecision, CacheLayer, ClientIdentity};
use agora_core::infrastructure::rate_limiter::DecisionSource;

use crate::presentation::models::ErrorResponse;

/// Header set by the upstream auth proxy once it has resolved the caller
pub const USER_HEADER: &str = "x-authenticated-user";
/// Diagnostics header on cached routes
pub const CACHE_STATUS_HEADER: &str = "x-cache";

const CACHE_HIT: &str = "HIT";
const CACHE_MISS: &str = "MISS";
const CACHE_BYPASS: &str = "BYPASS";

/// Response headers replayed from a cached entry
const REPLAYED_HEADERS: [HeaderName; 4] = [
    header::CONTENT_TYPE,
    header::CONTENT_LANGUAGE,
    header::ETAG,
    header::LAST_MODIFIED,
];

/// Convert ApplicationError to HTTP response
pub fn application_error_to_response(error: ApplicationError) -> Response {
    match &error {
        ApplicationError::RateLimitExceeded {
            scope,
            limit,
            retry_after,
        } => {
            let body = ErrorResponse::new(
                "RATE_LIMIT_EXCEEDED",
                format!(
                    "Rate limit exceeded. Please retry after {} seconds.",
                    retry_after
                ),
            )
            .with_details(serde_json::json!({
                "scope": scope,
                "limit": limit,
                "remaining": 0,
                "retry_after": retry_after,
            }));
            (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
        }
        _ => {
            // Nothing else in this layer should ever reach a client
            tracing::error!(error = %error, "Internal error mapped to HTTP response");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("INTERNAL_ERROR", "Internal server error")),
            )
                .into_response()
        }
    }
}

/// Caller id resolved upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

/// Lift the upstream-resolved user id into a request extension
pub async fn identity_middleware(mut request: Request, next: Next) -> Response {
    let user = request
        .headers()
        .get(USER_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(|u| AuthenticatedUser(u.to_string()));

    if let Some(user) = user {
        request.extensions_mut().insert(user);
    }
    next.run(request).await
}

fn client_identity(request: &Request, trust_forwarded_headers: bool) -> ClientIdentity {
    let mut identity = ClientIdentity::new();

    if let Some(AuthenticatedUser(user)) = request.extensions().get::<AuthenticatedUser>() {
        identity = identity.with_user(user.clone());
    }
    if trust_forwarded_headers
        && let Some(chain) = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
    {
        identity = identity.with_forwarded_for(chain);
    }
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        identity = identity.with_peer(addr.ip());
    }
    identity
}

/// Admission state for one protected scope
#[derive(Clone)]
pub struct AdmissionState {
    pub controller: Arc<AdmissionController>,
    pub scope: String,
    pub trust_forwarded_headers: bool,
}

fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &AdmissionDecision) {
    // Narrower scopes run inside broader ones and report first
    if decision.source == DecisionSource::Disabled || headers.contains_key("x-ratelimit-limit") {
        return;
    }
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset_seconds));
}

/// Rate limiting middleware
pub async fn admission_middleware(
    State(state): State<Arc<AdmissionState>>,
    request: Request,
    next: Next,
) -> Response {
    let identity = client_identity(&request, state.trust_forwarded_headers);
    let decision = state
        .controller
        .admit_request(&state.scope, &identity)
        .await;

    match decision.clone().into_result(&state.scope) {
        Ok(_) => {
            let mut response = next.run(request).await;
            apply_rate_limit_headers(response.headers_mut(), &decision);
            response
        }
        Err(error) => {
            let mut response = application_error_to_response(error);
            let headers = response.headers_mut();
            apply_rate_limit_headers(headers, &decision);
            headers.insert(header::RETRY_AFTER, HeaderValue::from(decision.reset_seconds));
            response
        }
    }
}

/// Extracts the query parameters that select a response, with the
/// handler's defaults applied; `None` when the query cannot be parsed
pub type QueryParams = fn(&Uri) -> Option<Vec<(&'static str, String)>>;

/// Cache configuration of one read route
#[derive(Clone)]
pub struct ResponseCacheState {
    pub cache: Arc<CacheLayer>,
    pub class: ResourceClass,
    /// Path parameter that names the partition
    pub partition_param: Option<&'static str>,
    /// Query parameters that select distinct entries; others are ignored
    pub query_params: Option<QueryParams>,
    pub bypass_header: String,
    pub max_body_bytes: usize,
}

/// What gets stored for a cached response
#[derive(Debug, Serialize, Deserialize)]
struct CachedResponse {
    status: u16,
    headers: Vec<(String, String)>,
    /// Base64 body
    body: String,
}

impl CachedResponse {
    fn capture(parts: &Parts, body: &[u8]) -> Self {
        let headers = REPLAYED_HEADERS
            .iter()
            .filter_map(|name| {
                let value = parts.headers.get(name)?.to_str().ok()?;
                Some((name.as_str().to_string(), value.to_string()))
            })
            .collect();
        Self {
            status: parts.status.as_u16(),
            headers,
            body: BASE64.encode(body),
        }
    }

    fn into_response(self) -> Option<Response> {
        let status = StatusCode::from_u16(self.status).ok()?;
        let body = BASE64.decode(self.body.as_bytes()).ok()?;

        let mut builder = Response::builder().status(status);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder.body(Body::from(body)).ok()
    }
}

/// Build the selector of a request, or `None` if it cannot be keyed
fn request_selector(
    state: &ResponseCacheState,
    path: &RawPathParams,
    uri: &Uri,
) -> Option<Selector> {
    let mut partition = None;
    let mut params = Vec::new();
    for (name, value) in path {
        if Some(name) == state.partition_param {
            partition = Some(value);
        } else {
            params.push((name.to_string(), value.to_string()));
        }
    }

    let mut selector = match partition {
        Some("") => return None,
        Some(p) => Selector::partitioned(p),
        None => Selector::new(),
    };
    for (name, value) in params {
        selector.insert(name, value);
    }

    if let Some(query_params) = state.query_params {
        for (name, value) in query_params(uri)? {
            selector.insert(name, value);
        }
    }
    Some(selector)
}

fn mark(response: &mut Response, status: &'static str) {
    response
        .headers_mut()
        .insert(CACHE_STATUS_HEADER, HeaderValue::from_static(status));
}

/// Store a successful response and hand back an equivalent one
async fn store_response(
    state: &ResponseCacheState,
    selector: &Selector,
    response: Response,
) -> Response {
    if !response.status().is_success() {
        return response;
    }
    let fits = response
        .body()
        .size_hint()
        .upper()
        .is_some_and(|len| len <= state.max_body_bytes as u64);
    if !fits {
        debug!(class = %state.class, "Response body too large or unsized, not caching");
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(class = %state.class, error = %e, "Failed to read response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match serde_json::to_vec(&CachedResponse::capture(&parts, &bytes)) {
        Ok(payload) => {
            state
                .cache
                .put_with_policy(&state.class, selector, &payload)
                .await
        }
        Err(e) => warn!(class = %state.class, error = %e, "Failed to serialize response"),
    }

    Response::from_parts(parts, Body::from(bytes))
}

/// Response cache middleware for GET routes; apply with `route_layer`
pub async fn response_cache_middleware(
    State(state): State<Arc<ResponseCacheState>>,
    path: Result<RawPathParams, RawPathParamsRejection>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::GET || !state.cache.is_enabled() {
        return next.run(request).await;
    }

    let selector = if request.headers().contains_key(state.bypass_header.as_str()) {
        None
    } else {
        path.ok()
            .and_then(|path| request_selector(&state, &path, request.uri()))
    };
    let Some(selector) = selector else {
        state.cache.record_bypass();
        let mut response = next.run(request).await;
        mark(&mut response, CACHE_BYPASS);
        return response;
    };

    if let Some(payload) = state.cache.get(&state.class, &selector).await {
        let replayed = serde_json::from_slice::<CachedResponse>(&payload)
            .ok()
            .and_then(CachedResponse::into_response);
        match replayed {
            Some(mut response) => {
                mark(&mut response, CACHE_HIT);
                return response;
            }
            None => warn!(class = %state.class, "Cached response unreadable, serving fresh"),
        }
    }

    let response = next.run(request).await;
    let mut response = store_response(&state, &selector, response).await;
    mark(&mut response, CACHE_MISS);
    response
}
