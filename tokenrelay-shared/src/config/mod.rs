//! # Configuration
//!
//! Server configuration model and loader.

/// Server settings and their loader.
pub mod server;
