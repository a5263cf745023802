//! Application-level types shared across the admission and cache layers

pub mod errors;

pub use errors::{ApplicationError, SelectorError, StoreError};
