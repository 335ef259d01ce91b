//! In-memory stream sessions: frame log, broadcast fan-out, and producer
//! cancellation.

/// Producer cancellation handles.
pub mod cancel;
/// Append-only frame storage.
pub mod log;
/// Session lookup by id.
pub mod registry;
/// One live or completed stream.
pub mod session;
/// A reader's view of a session.
pub mod subscription;

pub use cancel::{CancelHandle, CancelOutcome};
pub use log::FrameLog;
pub use registry::SessionRegistry;
pub use session::{CompletionHook, Session};
pub use subscription::{Delivery, Subscription};

/// Registry handle held by the HTTP layer.
pub type SharedSessionRegistry = std::sync::Arc<SessionRegistry>;
