use std::fmt;

use tokio_util::sync::CancellationToken;

/// The producer's stop callback. Invoked at most once.
pub struct CancelHandle(Box<dyn FnOnce() + Send + 'static>);

impl CancelHandle {
    /// Wraps an arbitrary stop callback.
    pub fn new(callback: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(callback))
    }

    /// A handle that cancels `token`; the usual way a tokio producer listens.
    #[must_use]
    pub fn from_token(token: CancellationToken) -> Self {
        Self::new(move || token.cancel())
    }

    pub(crate) fn invoke(self) {
        (self.0)();
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CancelHandle(..)")
    }
}

/// Result of asking a session's producer to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The producer's callback was invoked by this request.
    Invoked,
    /// No callback yet; it will be invoked as soon as one is registered.
    Pending,
    /// An earlier request already delivered (or queued) the cancel.
    AlreadyRequested,
    /// The session has completed; there is nothing left to stop.
    Completed,
    /// No such session.
    NotFound,
}

impl CancelOutcome {
    /// Name used in responses and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invoked => "invoked",
            Self::Pending => "pending",
            Self::AlreadyRequested => "already_requested",
            Self::Completed => "completed",
            Self::NotFound => "not_found",
        }
    }
}

/// What the caller must do after a slot transition. Handles are returned
/// rather than called so they run after the session lock is released.
#[derive(Debug)]
pub(crate) enum CancelAction {
    Invoke(CancelHandle),
    Nothing(CancelOutcome),
}

/// Per-session cancel state: at most one stored handle, at most one invocation.
#[derive(Debug, Default)]
pub(crate) struct CancelSlot {
    handle: Option<CancelHandle>,
    requested: bool,
    fired: bool,
    retired: bool,
}

impl CancelSlot {
    /// Stores `handle`, replacing one that has not fired. When a cancel was
    /// requested before any handle existed, the new handle fires immediately.
    pub(crate) fn install(&mut self, handle: CancelHandle) -> Option<CancelHandle> {
        if self.fired || self.retired {
            return None;
        }
        if self.requested {
            self.fired = true;
            return Some(handle);
        }
        self.handle = Some(handle);
        None
    }

    pub(crate) fn request(&mut self) -> CancelAction {
        if self.retired {
            return CancelAction::Nothing(CancelOutcome::Completed);
        }
        if self.requested {
            return CancelAction::Nothing(CancelOutcome::AlreadyRequested);
        }

        self.requested = true;
        match self.handle.take() {
            Some(handle) => {
                self.fired = true;
                CancelAction::Invoke(handle)
            }
            None => CancelAction::Nothing(CancelOutcome::Pending),
        }
    }

    /// Takes any stored handle out for disposal; later requests and installs
    /// are ignored.
    pub(crate) fn retire(&mut self) -> Option<CancelHandle> {
        self.retired = true;
        self.handle.take()
    }
}
