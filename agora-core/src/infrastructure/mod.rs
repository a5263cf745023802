//! Infrastructure: storage backends, admission control and response caching

pub mod cache;
pub mod rate_limiter;
pub mod storage;

pub use cache::{CacheLayer, CacheStatistics, InvalidationPlan};
pub use rate_limiter::{AdmissionController, AdmissionDecision, ClientIdentity};
pub use storage::{DragonflyStorage, InMemoryStorage, KeyValueStorage};
