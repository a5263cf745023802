//! Common test utilities for agora-core

pub mod mocks;

pub use mocks::*;
