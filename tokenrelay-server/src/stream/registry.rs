use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use metrics::gauge;
use tracing::{debug, info};

use super::{
    cancel::{CancelHandle, CancelOutcome},
    session::Session,
    subscription::Subscription,
};

/// Process-wide map from session id to live session.
///
/// Sessions come into being only through [`SessionRegistry::get_or_create`]
/// or [`SessionRegistry::try_create`]. Writes addressed to an unknown id are
/// ignored, so a late producer cannot revive a closed session. Fan-out and
/// completion hooks never run while a map shard is locked; the `Arc` is
/// cloned out first.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session for `id`, creating it if needed. Racing callers all
    /// get the same instance.
    pub fn get_or_create(&self, id: &str) -> Arc<Session> {
        if let Some(session) = self.get(id) {
            return session;
        }

        let session = match self.sessions.entry(id.to_string()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let session = Session::new(id);
                entry.insert(Arc::clone(&session));
                debug!(session_id = id, "stream session created");
                session
            }
        };
        self.record_size();
        session
    }

    /// Claims `id` for a new producer run.
    ///
    /// A completed session still lingering under `id` is replaced. A live
    /// session without a producer (one a reader attached to first) is adopted,
    /// along with its readers and any pending cancel. Returns `None` when
    /// another producer already owns the id.
    pub fn try_create(&self, id: &str) -> Option<Arc<Session>> {
        let created = match self.sessions.entry(id.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_completed() {
                    let session = Session::new(id);
                    session.claim_producer();
                    entry.insert(Arc::clone(&session));
                    Some(session)
                } else if entry.get().claim_producer() {
                    debug!(session_id = id, "producer adopted waiting session");
                    Some(Arc::clone(entry.get()))
                } else {
                    None
                }
            }
            Entry::Vacant(entry) => {
                let session = Session::new(id);
                session.claim_producer();
                entry.insert(Arc::clone(&session));
                Some(session)
            }
        };
        self.record_size();
        created
    }

    /// The session registered under `id`, if any.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether a session is registered under `id`.
    #[must_use]
    pub fn exists(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Appends to `id`. Returns `false` when the session is unknown or has
    /// already completed; the text is dropped.
    pub fn append(&self, id: &str, text: impl Into<String>) -> bool {
        let Some(session) = self.get(id) else {
            debug!(session_id = id, "append to unknown session ignored");
            return false;
        };
        let accepted = session.append(text);
        if !accepted {
            debug!(session_id = id, "append after completion ignored");
        }
        accepted
    }

    /// Completes `id`. Returns `false` if it is unknown or already completed.
    pub fn complete(&self, id: &str) -> bool {
        match self.get(id) {
            Some(session) => session.complete(),
            None => {
                debug!(session_id = id, "complete for unknown session ignored");
                false
            }
        }
    }

    /// Registers the producer's cancel callback on `id`. Returns `false` and
    /// drops the handle uncalled when the session is unknown.
    pub fn set_cancel_handle(&self, id: &str, handle: CancelHandle) -> bool {
        match self.get(id) {
            Some(session) => {
                session.set_cancel_handle(handle);
                true
            }
            None => {
                debug!(session_id = id, "cancel handle for unknown session dropped");
                false
            }
        }
    }

    /// Forwards a cancel to the producer of `id`. Unknown ids are a no-op.
    pub fn request_cancel(&self, id: &str) -> CancelOutcome {
        match self.get(id) {
            Some(session) => session.request_cancel(),
            None => {
                debug!(session_id = id, "cancel for unknown session");
                CancelOutcome::NotFound
            }
        }
    }

    /// Attaches a reader to an existing session. `None` if `id` is unknown.
    #[must_use]
    pub fn subscribe(&self, id: &str, from: usize) -> Option<Subscription> {
        self.get(id).map(|session| session.subscribe(from))
    }

    /// Registers a completion hook on `id`. Returns `false` when the session
    /// is unknown; the hook is dropped.
    pub fn on_complete(&self, id: &str, hook: impl FnOnce(&str, String) + Send + 'static) -> bool {
        match self.get(id) {
            Some(session) => {
                session.on_complete(hook);
                true
            }
            None => {
                debug!(session_id = id, "completion hook for unknown session dropped");
                false
            }
        }
    }

    /// Text produced so far for `id`.
    #[must_use]
    pub fn content(&self, id: &str) -> Option<String> {
        self.get(id).map(|session| session.content())
    }

    /// Forgets `id`. Subscribers already attached keep their queued deliveries.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            debug!(session_id = id, "stream session removed");
            self.record_size();
        }
        removed
    }

    /// Removes `session` only if it is still the one registered under its id.
    pub fn remove_session(&self, session: &Arc<Session>) -> bool {
        let removed = self
            .sessions
            .remove_if(session.id(), |_, current| Arc::ptr_eq(current, session))
            .is_some();
        if removed {
            debug!(session_id = session.id(), "stream session removed");
            self.record_size();
        }
        removed
    }

    /// Completes and then forgets `id`.
    pub fn close(&self, id: &str) -> bool {
        let Some(session) = self.get(id) else {
            return false;
        };
        session.complete();
        let removed = self.remove_session(&session);
        if removed {
            info!(session_id = id, "stream session closed");
        }
        removed
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn record_size(&self) {
        #[allow(clippy::cast_precision_loss)]
        gauge!("tokenrelay_sessions_live").set(self.sessions.len() as f64);
    }
}
