//! Request middleware.

/// Per-request correlation id.
pub mod request_context;
