//! Posts scoped to a college
//!
//! A small in-memory store standing in for the persistent record store.
//! Handlers built on it are what the admission and cache layers wrap.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Resource class of paginated post listings
pub const POST_LIST: &str = "post-list";
/// Resource class of single posts
pub const POST_DETAIL: &str = "post-detail";

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;
const MAX_TITLE_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub college_id: String,
    pub author_id: String,
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPost {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostUpdate {
    pub title: Option<String>,
    pub body: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// Listing filters and pagination
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub tag: Option<String>,
}

impl PostQuery {
    /// Page, page size and tag as the listing applies them
    pub fn normalized(&self) -> (u32, u32, Option<&str>) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self
            .per_page
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        (page, per_page, self.tag.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostPage {
    pub items: Vec<Post>,
    pub page: u32,
    pub per_page: u32,
    pub total: usize,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PostError {
    #[error("post not found")]
    NotFound,

    #[error("invalid post: {0}")]
    Invalid(String),

    #[error("authentication required")]
    Unauthenticated,
}

fn validate_title(title: &str) -> Result<(), PostError> {
    if title.trim().is_empty() {
        return Err(PostError::Invalid("title must not be empty".into()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(PostError::Invalid(format!(
            "title must be at most {} characters",
            MAX_TITLE_LEN
        )));
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct PostRepository {
    posts: RwLock<HashMap<Uuid, Post>>,
}

impl PostRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Newest first
    pub async fn list(&self, college_id: &str, query: &PostQuery) -> PostPage {
        let (page, per_page, tag) = query.normalized();

        let posts = self.posts.read().await;
        let mut matching: Vec<&Post> = posts
            .values()
            .filter(|p| p.college_id == college_id)
            .filter(|p| tag.is_none_or(|tag| p.tags.iter().any(|t| t == tag)))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        let total = matching.len();
        let items = matching
            .into_iter()
            .skip((page - 1).saturating_mul(per_page) as usize)
            .take(per_page as usize)
            .cloned()
            .collect();

        PostPage {
            items,
            page,
            per_page,
            total,
        }
    }

    pub async fn get(&self, college_id: &str, id: Uuid) -> Result<Post, PostError> {
        self.posts
            .read()
            .await
            .get(&id)
            .filter(|p| p.college_id == college_id)
            .cloned()
            .ok_or(PostError::NotFound)
    }

    pub async fn create(
        &self,
        college_id: &str,
        author_id: &str,
        new: NewPost,
    ) -> Result<Post, PostError> {
        validate_title(&new.title)?;
        let now = Utc::now();
        let post = Post {
            id: Uuid::new_v4(),
            college_id: college_id.to_string(),
            author_id: author_id.to_string(),
            title: new.title,
            body: new.body,
            tags: new.tags,
            created_at: now,
            updated_at: now,
        };
        self.posts.write().await.insert(post.id, post.clone());
        Ok(post)
    }

    pub async fn update(
        &self,
        college_id: &str,
        id: Uuid,
        update: PostUpdate,
    ) -> Result<Post, PostError> {
        if let Some(title) = &update.title {
            validate_title(title)?;
        }

        let mut posts = self.posts.write().await;
        let post = posts
            .get_mut(&id)
            .filter(|p| p.college_id == college_id)
            .ok_or(PostError::NotFound)?;

        if let Some(title) = update.title {
            post.title = title;
        }
        if let Some(body) = update.body {
            post.body = body;
        }
        if let Some(tags) = update.tags {
            post.tags = tags;
        }
        post.updated_at = Utc::now();
        Ok(post.clone())
    }

    pub async fn delete(&self, college_id: &str, id: Uuid) -> Result<(), PostError> {
        let mut posts = self.posts.write().await;
        match posts.get(&id) {
            Some(post) if post.college_id == college_id => {
                posts.remove(&id);
                Ok(())
            }
            _ => Err(PostError::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_post(title: &str, tags: &[&str]) -> NewPost {
        NewPost {
            title: title.to_string(),
            body: "body".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_posts_are_scoped_to_college() {
        let repo = PostRepository::new();
        let post = repo.create("c1", "u1", new_post("hi", &[])).await.unwrap();

        assert!(repo.get("c1", post.id).await.is_ok());
        assert_eq!(repo.get("c2", post.id).await, Err(PostError::NotFound));
        assert_eq!(repo.delete("c2", post.id).await, Err(PostError::NotFound));
        assert_eq!(repo.list("c2", &PostQuery::default()).await.total, 0);
    }

    #[tokio::test]
    async fn test_tag_filter_and_pagination() {
        let repo = PostRepository::new();
        for i in 0..5 {
            let tags: &[&str] = if i % 2 == 0 { &["rust"] } else { &["go"] };
            repo.create("c1", "u1", new_post(&format!("post {}", i), tags))
                .await
                .unwrap();
        }

        let rust = repo
            .list(
                "c1",
                &PostQuery {
                    tag: Some("rust".into()),
                    ..PostQuery::default()
                },
            )
            .await;
        assert_eq!(rust.total, 3);

        let second_page = repo
            .list(
                "c1",
                &PostQuery {
                    page: Some(2),
                    per_page: Some(2),
                    tag: None,
                },
            )
            .await;
        assert_eq!(second_page.items.len(), 2);
        assert_eq!(second_page.total, 5);
    }

    #[test]
    fn test_query_defaults_and_bounds() {
        assert_eq!(PostQuery::default().normalized(), (1, DEFAULT_PAGE_SIZE, None));

        let out_of_range = PostQuery {
            page: Some(0),
            per_page: Some(10_000),
            tag: Some("rust".into()),
        };
        assert_eq!(out_of_range.normalized(), (1, MAX_PAGE_SIZE, Some("rust")));
    }

    #[tokio::test]
    async fn test_empty_title_rejected() {
        let repo = PostRepository::new();
        assert!(matches!(
            repo.create("c1", "u1", new_post("  ", &[])).await,
            Err(PostError::Invalid(_))
        ));
    }
}
