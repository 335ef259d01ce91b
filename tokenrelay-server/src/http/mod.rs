//! HTTP error plumbing.

/// Error type returned by handlers.
pub mod error;
/// Problem-details response bodies.
pub mod problem;
