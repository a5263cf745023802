//! Response cache
//!
//! [`CacheLayer`] sits in front of read handlers and is invalidated by write
//! handlers through an [`InvalidationPlan`].

pub mod envelope;
pub mod service;

pub use envelope::{CacheEnvelope, CompressionPolicy};
pub use service::{CacheLayer, CacheStatistics, InvalidationPlan};
