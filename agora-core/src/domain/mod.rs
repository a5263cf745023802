//! Domain rules shared by the admission controller and the cache layer

pub mod keys;
pub mod policy;

pub use keys::{CacheKey, KeyPattern, PatternSelector, ResourceClass, Selector};
pub use policy::{KeyStrategy, ScopePolicy, ScopeTable, TtlPolicy, rate_limit_key};
