use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use super::{
    cancel::{CancelAction, CancelHandle, CancelOutcome, CancelSlot},
    log::FrameLog,
    subscription::{Delivery, Subscription},
};

/// Called once with the session id and its final content after completion.
pub type CompletionHook = Box<dyn FnOnce(&str, String) + Send + 'static>;

struct Subscriber {
    from: usize,
    sender: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct SessionInner {
    log: FrameLog,
    completed: bool,
    subscribers: HashMap<u64, Subscriber>,
    cancel: CancelSlot,
    producer: bool,
    hooks: Vec<CompletionHook>,
}

/// One logical stream: its frame log, live subscribers, and producer cancel handle.
///
/// A single mutex guards the log and the subscriber set together, which is
/// what makes backlog replay plus live attachment atomic with respect to
/// `append`. Deliveries go through unbounded per-subscriber queues, so the
/// producer never waits on a reader.
pub struct Session {
    id: String,
    inner: Mutex<SessionInner>,
    next_subscriber: AtomicU64,
    created_at: Instant,
}

impl Session {
    pub(crate) fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            inner: Mutex::new(SessionInner::default()),
            next_subscriber: AtomicU64::new(0),
            created_at: Instant::now(),
        })
    }

    /// Registry key of this session.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether termination has been delivered.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.inner.lock().completed
    }

    /// Characters produced so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().log.len()
    }

    /// Whether nothing has been produced yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().log.is_empty()
    }

    /// Number of recorded frames.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.inner.lock().log.frame_count()
    }

    /// Readers currently attached and waiting for live frames.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Everything produced so far, concatenated.
    #[must_use]
    pub fn content(&self) -> String {
        self.inner.lock().log.content()
    }

    /// Whether a producer owns this session, either claimed through the
    /// registry or by registering a cancel handle.
    #[must_use]
    pub fn has_producer(&self) -> bool {
        self.inner.lock().producer
    }

    /// Marks the session as fed by a producer. `false` if another producer
    /// already owns it or it has completed.
    pub(crate) fn claim_producer(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.completed || inner.producer {
            return false;
        }
        inner.producer = true;
        true
    }

    /// Appends a fragment and pushes it to every live subscriber.
    ///
    /// Returns `false` when the session has already completed; the fragment is
    /// dropped. Empty fragments are accepted but not recorded.
    pub fn append(&self, text: impl Into<String>) -> bool {
        let text = text.into();
        let mut inner = self.inner.lock();
        if inner.completed {
            trace!(session_id = %self.id, "dropping append to completed session");
            return false;
        }

        let Some(frame) = inner.log.push(text).cloned() else {
            return true;
        };

        inner.subscribers.retain(|subscriber_id, subscriber| {
            let Some(part) = frame.slice_from(subscriber.from) else {
                return true;
            };
            let delivered = subscriber.sender.send(Delivery::Frame(part)).is_ok();
            if !delivered {
                trace!(session_id = %self.id, subscriber = subscriber_id, "subscriber gone");
            }
            delivered
        });
        drop(inner);

        counter!("tokenrelay_frames_appended_total").increment(1);
        true
    }

    /// Marks the session completed, delivers the termination notice to every
    /// subscriber, then runs completion hooks. Only the first call has any
    /// effect; it returns `true`.
    pub fn complete(&self) -> bool {
        let (hooks, content, retired, offset, notified) = {
            let mut inner = self.inner.lock();
            if inner.completed {
                return false;
            }
            inner.completed = true;

            let offset = inner.log.len();
            let notified = inner.subscribers.len();
            for (_, subscriber) in inner.subscribers.drain() {
                let _ = subscriber.sender.send(Delivery::Terminated { offset });
            }

            let retired = inner.cancel.retire();
            let hooks = std::mem::take(&mut inner.hooks);
            let content = if hooks.is_empty() {
                String::new()
            } else {
                inner.log.content()
            };
            (hooks, content, retired, offset, notified)
        };
        drop(retired);

        info!(
            session_id = %self.id,
            length = offset,
            subscribers = notified,
            age_ms = u64::try_from(self.created_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            "stream session completed"
        );
        counter!("tokenrelay_sessions_completed_total").increment(1);

        for hook in hooks {
            hook(&self.id, content.clone());
        }
        true
    }

    /// Attaches a reader from `from`.
    ///
    /// The backlog is queued and the live listener registered under the same
    /// lock `append` takes, so no frame can fall between the two. On a
    /// completed session the backlog is followed directly by termination.
    pub fn subscribe(self: &Arc<Self>, from: usize) -> Subscription {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();

        let backlog = {
            let mut inner = self.inner.lock();
            let backlog = inner.log.backlog_from(from);
            let replayed = backlog.len();
            for frame in backlog {
                let _ = sender.send(Delivery::Frame(frame));
            }

            if inner.completed {
                let _ = sender.send(Delivery::Terminated {
                    offset: inner.log.len(),
                });
            } else {
                inner.subscribers.insert(id, Subscriber { from, sender });
            }
            replayed
        };

        debug!(session_id = %self.id, subscriber = id, from, backlog, "subscriber attached");
        counter!("tokenrelay_subscriptions_total").increment(1);
        Subscription::new(id, receiver, Arc::downgrade(self))
    }

    /// Removes a subscriber. Unknown ids are ignored.
    pub(crate) fn detach(&self, subscriber_id: u64) -> bool {
        let removed = self.inner.lock().subscribers.remove(&subscriber_id).is_some();
        if removed {
            debug!(session_id = %self.id, subscriber = subscriber_id, "subscriber detached");
        }
        removed
    }

    /// Stores the producer's cancel callback and marks the session as owned by
    /// a producer. If a cancel was requested before any callback existed, the
    /// new one is invoked right away.
    pub fn set_cancel_handle(&self, handle: CancelHandle) {
        let late = {
            let mut inner = self.inner.lock();
            inner.producer = true;
            inner.cancel.install(handle)
        };
        if let Some(handle) = late {
            info!(session_id = %self.id, "cancel was requested before the producer registered; cancelling now");
            counter!("tokenrelay_stream_cancels_total").increment(1);
            handle.invoke();
        }
    }

    /// Asks the producer to stop. The callback runs at most once per session no
    /// matter how many requests arrive or from where.
    pub fn request_cancel(&self) -> CancelOutcome {
        let action = self.inner.lock().cancel.request();
        match action {
            CancelAction::Invoke(handle) => {
                info!(session_id = %self.id, "cancelling producer");
                counter!("tokenrelay_stream_cancels_total").increment(1);
                handle.invoke();
                CancelOutcome::Invoked
            }
            CancelAction::Nothing(outcome) => {
                debug!(session_id = %self.id, outcome = outcome.as_str(), "cancel request had no new effect");
                outcome
            }
        }
    }

    /// Registers a hook to run after completion. Runs immediately when the
    /// session has already completed.
    pub fn on_complete(&self, hook: impl FnOnce(&str, String) + Send + 'static) {
        let mut inner = self.inner.lock();
        if inner.completed {
            let content = inner.log.content();
            drop(inner);
            hook(&self.id, content);
        } else {
            inner.hooks.push(Box::new(hook));
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("len", &inner.log.len())
            .field("frames", &inner.log.frame_count())
            .field("completed", &inner.completed)
            .field("subscribers", &inner.subscribers.len())
            .finish_non_exhaustive()
    }
}
