//! Domain Layer - the business data the admission and cache layers front

pub mod posts;

pub use posts::{NewPost, Post, PostError, PostPage, PostQuery, PostRepository, PostUpdate};
