//! Rate Limiting Infrastructure
//!
//! Fixed-window admission control keyed by scope and caller:
//! - The shared store is used whenever it reports live
//! - The in-memory store takes over while it is not, enforcing limits per process
//! - A store error admits the request uncounted rather than rejecting it

pub mod service;
pub mod types;

pub use service::AdmissionController;
pub use types::{AdmissionDecision, ClientIdentity, DecisionSource};
