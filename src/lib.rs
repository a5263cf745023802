//! Agora - the HTTP service that puts admission control and response caching
//! in front of the college posting endpoints

mod app;
pub mod domain;
pub mod presentation;

pub use agora_core::{Config, init_tracing};
pub use app::{AppHandle, create_app};

// Re-export for convenience
pub use agora_core;
