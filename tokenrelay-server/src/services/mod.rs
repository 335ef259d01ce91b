//! Background work feeding the stream layer.

/// Producers that feed stream sessions
pub mod producer;

pub use producer::{StreamStopReason, demo_fragments, drive};
