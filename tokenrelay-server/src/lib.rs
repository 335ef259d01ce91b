#![cfg_attr(not(test), forbid(unsafe_code))]

//! Resumable text-stream relay: producers append fragments to named sessions
//! and any number of readers replay and follow them over HTTP.

/// State shared by every handler.
pub mod app_state;
pub mod handlers;
pub mod http;
pub mod middleware;
pub mod routes;
/// Router assembly, logging setup and the serve loop.
pub mod server;
pub mod services;
pub mod stream;
/// HTTP request tracing.
pub mod tracer;
