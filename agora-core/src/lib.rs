//! Agora Core - admission control and response caching for the Agora API
//!
//! This crate owns everything that sits between an inbound request and the
//! business handler that serves it:
//!
//! # Modules
//!
//! - [`config`]: Strongly-typed configuration with TOML and environment variable support
//! - [`domain`]: Cache key derivation, TTL table and per-scope rate limit policy
//! - [`application`]: Shared error types
//! - [`infrastructure`]: Storage backends, the admission controller and the cache layer
//! - [`logging`]: Structured logging with tracing
//!
//! # Architecture
//!
//! ```text
//! agora-core/
//! ├── domain/            # Keys, selectors, TTL and scope policy
//! ├── application/       # Error taxonomy
//! ├── infrastructure/
//! │   ├── storage/       # Dragonfly (shared) and in-memory (local) key/value stores
//! │   ├── rate_limiter/  # Fixed-window admission controller
//! │   └── cache/         # Response cache with targeted and pattern invalidation
//! └── config/            # Configuration management
//! ```
//!
//! # Configuration
//!
//! ```rust,ignore
//! use agora_core::Config;
//!
//! let config = Config::load()?;
//! ```
//!
//! Environment variables use the `AGORA__` prefix with double underscore separators:
//!
//! ```bash
//! AGORA__STORAGE__DRAGONFLY_URL=redis://cache:6379
//! AGORA__RATE_LIMIT__ENABLED=false
//! ```

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod logging;

pub use config::Config;
pub use logging::init_tracing;
