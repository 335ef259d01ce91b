#![cfg_attr(not(test), forbid(unsafe_code))]

//! Client for tokenrelay streams.
//!
//! [`consumer::ResumableConsumer`] follows a session across disconnects and
//! process restarts, [`cursor`] persists its progress, and [`transport`] is the
//! seam to the server.

/// Resumable consumer state machine.
pub mod consumer;
/// Cursor persistence.
pub mod cursor;
/// Server access.
pub mod transport;

pub use consumer::{
    Canceller, ConsumerError, ConsumerState, ConsumerUpdate, ReconnectPolicy, ResumableConsumer,
    ResumeOutcome,
};
pub use cursor::{Cursor, CursorStore, FileCursorStore, MemoryCursorStore};
pub use transport::{HttpTransport, Probe, StreamTransport, TransportError};
