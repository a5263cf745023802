use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode},
};
use serde_json::{Value, json};
use tower::ServiceExt;

use agora_core::Config;
use agora_core::domain::{KeyStrategy, ScopePolicy};

use crate::create_app;

fn local_config() -> Config {
    let mut config = Config::default();
    config.storage.dragonfly_enabled = false;
    config
}

fn config_with_general_limit(limit: u32) -> Config {
    let mut config = local_config();
    config.rate_limit.scopes.insert(
        "general-api".to_string(),
        ScopePolicy::new(limit, 60, KeyStrategy::PerClient),
    );
    config
}

async fn router(config: Config) -> Router {
    create_app(config).await.unwrap().router
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn get_as(uri: &str, user: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-authenticated-user", user)
        .body(Body::empty())
        .unwrap()
}

fn write_as(method: &str, uri: &str, user: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-authenticated-user", user)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn cache_status(response: &Response<Body>) -> &str {
    response.headers()["x-cache"].to_str().unwrap()
}

#[tokio::test]
async fn test_health_reports_local_only_mode() {
    let app = router(local_config()).await;

    let response = send(&app, get("/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-ratelimit-limit").is_none());

    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["shared_store"], "disabled");
    assert_eq!(body["admission_backend"], "memory");
}

#[tokio::test]
async fn test_second_identical_read_is_a_cache_hit() {
    let app = router(local_config()).await;

    let first = send(&app, get_as("/colleges/c1/posts", "u1")).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(cache_status(&first), "MISS");
    assert_eq!(first.headers()["x-ratelimit-limit"], "300");
    assert_eq!(first.headers()["x-ratelimit-remaining"], "299");

    let second = send(&app, get_as("/colleges/c1/posts", "u1")).await;
    assert_eq!(cache_status(&second), "HIT");
    assert_eq!(second.headers()["x-ratelimit-remaining"], "298");
    assert_eq!(second.headers()["content-type"], "application/json");
    assert_eq!(json_body(second).await["total"], 0);
}

#[tokio::test]
async fn test_query_parameter_order_does_not_split_entries() {
    let app = router(local_config()).await;

    let first = send(&app, get("/colleges/c1/posts?tag=rust&page=1")).await;
    assert_eq!(cache_status(&first), "MISS");

    let reordered = send(&app, get("/colleges/c1/posts?page=1&tag=rust")).await;
    assert_eq!(cache_status(&reordered), "HIT");

    let other_filter = send(&app, get("/colleges/c1/posts?page=1&tag=go")).await;
    assert_eq!(cache_status(&other_filter), "MISS");
}

#[tokio::test]
async fn test_defaults_and_unread_parameters_share_an_entry() {
    let app = router(local_config()).await;

    let first = send(&app, get("/colleges/c1/posts")).await;
    assert_eq!(cache_status(&first), "MISS");

    for uri in [
        "/colleges/c1/posts?page=1",
        "/colleges/c1/posts?utm=x",
        "/colleges/c1/posts?per_page=20&utm=y",
        "/colleges/c1/posts?page=0",
    ] {
        let response = send(&app, get(uri)).await;
        assert_eq!(cache_status(&response), "HIT", "{}", uri);
    }

    let second_page = send(&app, get("/colleges/c1/posts?page=2")).await;
    assert_eq!(cache_status(&second_page), "MISS");
}

#[tokio::test]
async fn test_unparsable_listing_query_is_not_cached() {
    let app = router(local_config()).await;

    let response = send(&app, get("/colleges/c1/posts?page=abc")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(cache_status(&response), "BYPASS");
}

#[tokio::test]
async fn test_bypass_header_skips_the_cache() {
    let app = router(local_config()).await;
    send(&app, get("/colleges/c1/posts")).await;

    let request = Request::builder()
        .uri("/colleges/c1/posts")
        .header("x-cache-bypass", "1")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(cache_status(&response), "BYPASS");
}

#[tokio::test]
async fn test_create_invalidates_the_college_listing() {
    let app = router(local_config()).await;

    send(&app, get("/colleges/c1/posts")).await;
    send(&app, get("/colleges/c2/posts")).await;
    let cached = send(&app, get("/colleges/c1/posts")).await;
    assert_eq!(cache_status(&cached), "HIT");

    let created = send(
        &app,
        write_as("POST", "/colleges/c1/posts", "u1", json!({"title": "Hello", "body": "first"})),
    )
    .await;
    assert_eq!(created.status(), StatusCode::CREATED);

    // No delay: the write has already invalidated the listing
    let listing = send(&app, get("/colleges/c1/posts")).await;
    assert_eq!(cache_status(&listing), "MISS");
    assert_eq!(json_body(listing).await["items"][0]["title"], "Hello");

    // Refilled with the post included
    let listing = send(&app, get("/colleges/c1/posts")).await;
    assert_eq!(cache_status(&listing), "HIT");
    assert_eq!(json_body(listing).await["total"], 1);

    // Another college's listing is untouched
    let other = send(&app, get("/colleges/c2/posts")).await;
    assert_eq!(cache_status(&other), "HIT");
}

#[tokio::test]
async fn test_update_invalidates_the_post_detail() {
    let app = router(local_config()).await;

    let created = send(
        &app,
        write_as("POST", "/colleges/c1/posts", "u1", json!({"title": "Draft", "body": "..."})),
    )
    .await;
    let id = json_body(created).await["id"].as_str().unwrap().to_string();
    let detail = format!("/colleges/c1/posts/{}", id);

    assert_eq!(cache_status(&send(&app, get(&detail)).await), "MISS");
    assert_eq!(cache_status(&send(&app, get(&detail)).await), "HIT");

    let updated = send(&app, write_as("PUT", &detail, "u1", json!({"title": "Final"}))).await;
    assert_eq!(updated.status(), StatusCode::OK);

    let fresh = send(&app, get(&detail)).await;
    assert_eq!(cache_status(&fresh), "MISS");
    assert_eq!(json_body(fresh).await["title"], "Final");
}

#[tokio::test]
async fn test_delete_invalidates_the_post_detail() {
    let app = router(local_config()).await;

    let created = send(
        &app,
        write_as("POST", "/colleges/c1/posts", "u1", json!({"title": "Gone soon", "body": ""})),
    )
    .await;
    let id = json_body(created).await["id"].as_str().unwrap().to_string();
    let detail = format!("/colleges/c1/posts/{}", id);
    send(&app, get(&detail)).await;

    let deleted = send(&app, write_as("DELETE", &detail, "u1", json!({}))).await;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    assert_eq!(send(&app, get(&detail)).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_error_responses_are_not_cached() {
    let app = router(local_config()).await;
    let uri = "/colleges/c1/posts/6f1c2a3e-0000-4000-8000-000000000000";

    let first = send(&app, get(uri)).await;
    assert_eq!(first.status(), StatusCode::NOT_FOUND);
    assert_eq!(cache_status(&first), "MISS");

    let second = send(&app, get(uri)).await;
    assert_eq!(cache_status(&second), "MISS");
    assert_eq!(json_body(second).await["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_writes_require_an_authenticated_user() {
    let app = router(local_config()).await;

    let request = Request::builder()
        .method("POST")
        .uri("/colleges/c1/posts")
        .header("content-type", "application/json")
        .body(Body::from(json!({"title": "anon", "body": ""}).to_string()))
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_exceeding_the_limit_returns_429() {
    let app = router(config_with_general_limit(2)).await;

    for remaining in ["1", "0"] {
        let response = send(&app, get_as("/colleges/c1/posts", "u1")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-remaining"], remaining);
    }

    let rejected = send(&app, get_as("/colleges/c1/posts", "u1")).await;
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(rejected.headers().get("x-cache").is_none());

    let retry_after: u64 = rejected.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 60);

    let body = json_body(rejected).await;
    assert_eq!(body["code"], "RATE_LIMIT_EXCEEDED");
    assert_eq!(body["details"]["scope"], "general-api");
    assert_eq!(body["details"]["limit"], 2);
    assert_eq!(body["details"]["remaining"], 0);
}

#[tokio::test]
async fn test_clients_are_limited_independently() {
    let app = router(config_with_general_limit(1)).await;

    assert_eq!(
        send(&app, get_as("/colleges/c1/posts", "alice")).await.status(),
        StatusCode::OK
    );
    assert_eq!(
        send(&app, get_as("/colleges/c1/posts", "alice")).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(
        send(&app, get_as("/colleges/c1/posts", "bob")).await.status(),
        StatusCode::OK
    );
}

#[tokio::test]
async fn test_post_creation_has_its_own_scope() {
    let mut config = local_config();
    config.rate_limit.scopes.insert(
        "post-create".to_string(),
        ScopePolicy::new(1, 3600, KeyStrategy::PerClient),
    );
    let app = router(config).await;

    let new_post = || json!({"title": "t", "body": "b"});
    let first = send(&app, write_as("POST", "/colleges/c1/posts", "u1", new_post())).await;
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = send(&app, write_as("POST", "/colleges/c1/posts", "u1", new_post())).await;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json_body(second).await["details"]["scope"], "post-create");

    // Reads only count against the general scope
    let read = send(&app, get_as("/colleges/c1/posts", "u1")).await;
    assert_eq!(read.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_disabled_rate_limiting_sets_no_headers() {
    let mut config = local_config();
    config.rate_limit.enabled = false;
    let app = router(config).await;

    let response = send(&app, get("/colleges/c1/posts")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-ratelimit-limit").is_none());
}
