//! HTTP controllers

pub mod health;
pub mod posts;

use std::sync::Arc;

use agora_core::application::SelectorError;
use agora_core::domain::ResourceClass;
use agora_core::infrastructure::{AdmissionController, CacheLayer, KeyValueStorage};

use crate::domain::posts::{POST_DETAIL, POST_LIST, PostRepository};

/// Resource classes of the post routes
#[derive(Debug, Clone)]
pub struct PostClasses {
    pub list: ResourceClass,
    pub detail: ResourceClass,
}

impl PostClasses {
    pub fn new() -> Result<Self, SelectorError> {
        Ok(Self {
            list: ResourceClass::new(POST_LIST)?,
            detail: ResourceClass::new(POST_DETAIL)?,
        })
    }
}

/// Application state shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub posts: Arc<PostRepository>,
    pub cache: Arc<CacheLayer>,
    pub admission: Arc<AdmissionController>,
    /// `None` in local-only mode
    pub shared_store: Option<Arc<dyn KeyValueStorage>>,
    pub classes: PostClasses,
}
