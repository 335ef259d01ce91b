//! Request handlers for the thread endpoints.

/// Starting demo producers.
pub mod demo;
/// Probing, reading and cancelling streams.
pub mod streaming;
