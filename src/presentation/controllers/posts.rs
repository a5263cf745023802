//! Post endpoints
//!
//! Reads are served through the response cache; every successful write
//! issues the invalidations that keep those reads consistent before it
//! responds.

use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::ExtensionRejection},
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use agora_core::domain::{PatternSelector, Selector};
use agora_core::infrastructure::InvalidationPlan;

use crate::domain::posts::{NewPost, Post, PostError, PostPage, PostQuery, PostUpdate};
use crate::presentation::controllers::AppState;
use crate::presentation::middleware::AuthenticatedUser;
use crate::presentation::models::ErrorResponse;

/// Path parameter the post routes are partitioned by
pub const PARTITION_PARAM: &str = "college_id";

impl IntoResponse for PostError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            PostError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            PostError::Invalid(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            PostError::Unauthenticated => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
        };
        (status, Json(ErrorResponse::new(code, self.to_string()))).into_response()
    }
}

fn require_user(
    user: Result<Extension<AuthenticatedUser>, ExtensionRejection>,
) -> Result<String, PostError> {
    user.map(|Extension(AuthenticatedUser(id))| id)
        .map_err(|_| PostError::Unauthenticated)
}

fn parse_post_id(raw: &str) -> Result<Uuid, PostError> {
    Uuid::parse_str(raw).map_err(|_| PostError::NotFound)
}

/// Detail entries to drop for a post, under every spelling of its id seen
fn detail_invalidation(
    state: &AppState,
    college_id: &str,
    raw_id: &str,
    id: Uuid,
    plan: InvalidationPlan,
) -> InvalidationPlan {
    let canonical = id.to_string();
    let mut plan = plan.entry(
        state.classes.detail.clone(),
        Selector::partitioned(college_id).with_param("post_id", &canonical),
    );
    if raw_id != canonical {
        plan = plan.entry(
            state.classes.detail.clone(),
            Selector::partitioned(college_id).with_param("post_id", raw_id),
        );
    }
    plan
}

fn list_invalidation(state: &AppState, college_id: &str) -> InvalidationPlan {
    InvalidationPlan::new().pattern(
        state.classes.list.clone(),
        PatternSelector::Partition(college_id.to_string()),
    )
}

/// Listing parameters that select a cache entry, after defaults are
/// applied. Parameters the listing does not read are left out.
pub fn list_cache_params(uri: &Uri) -> Option<Vec<(&'static str, String)>> {
    let Query(query) = Query::<PostQuery>::try_from_uri(uri).ok()?;
    let (page, per_page, tag) = query.normalized();

    let mut params = vec![("page", page.to_string()), ("per_page", per_page.to_string())];
    if let Some(tag) = tag {
        params.push(("tag", tag.to_string()));
    }
    Some(params)
}

/// List the posts of a college, newest first
pub async fn list_posts(
    State(state): State<AppState>,
    Path(college_id): Path<String>,
    Query(query): Query<PostQuery>,
) -> Json<PostPage> {
    Json(state.posts.list(&college_id, &query).await)
}

pub async fn get_post(
    State(state): State<AppState>,
    Path((college_id, post_id)): Path<(String, String)>,
) -> Result<Json<Post>, PostError> {
    let id = parse_post_id(&post_id)?;
    Ok(Json(state.posts.get(&college_id, id).await?))
}

pub async fn create_post(
    State(state): State<AppState>,
    Path(college_id): Path<String>,
    user: Result<Extension<AuthenticatedUser>, ExtensionRejection>,
    Json(new_post): Json<NewPost>,
) -> Result<(StatusCode, Json<Post>), PostError> {
    let author = require_user(user)?;
    let post = state.posts.create(&college_id, &author, new_post).await?;

    tracing::info!(college_id = %college_id, post_id = %post.id, "Post created");
    state.cache.apply(&list_invalidation(&state, &college_id)).await;

    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn update_post(
    State(state): State<AppState>,
    Path((college_id, post_id)): Path<(String, String)>,
    user: Result<Extension<AuthenticatedUser>, ExtensionRejection>,
    Json(update): Json<PostUpdate>,
) -> Result<Json<Post>, PostError> {
    require_user(user)?;
    let id = parse_post_id(&post_id)?;
    let post = state.posts.update(&college_id, id, update).await?;

    let plan = list_invalidation(&state, &college_id);
    let plan = detail_invalidation(&state, &college_id, &post_id, id, plan);
    state.cache.apply(&plan).await;

    Ok(Json(post))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Path((college_id, post_id)): Path<(String, String)>,
    user: Result<Extension<AuthenticatedUser>, ExtensionRejection>,
) -> Result<StatusCode, PostError> {
    require_user(user)?;
    let id = parse_post_id(&post_id)?;
    state.posts.delete(&college_id, id).await?;

    tracing::info!(college_id = %college_id, post_id = %id, "Post deleted");
    let plan = list_invalidation(&state, &college_id);
    let plan = detail_invalidation(&state, &college_id, &post_id, id, plan);
    state.cache.apply(&plan).await;

    Ok(StatusCode::NO_CONTENT)
}
