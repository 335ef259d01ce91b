//! Route tables.

/// Liveness, readiness and metrics.
pub mod health;
/// Thread stream and demo routes.
pub mod threads;
