//! Client side of a resumable stream.
//!
//! A [`ResumableConsumer`] follows one session: it restores whatever text a
//! previous run persisted, checks the session still exists, streams from the
//! end of that text, and saves progress after every frame so a later run can
//! pick up where this one stopped.
//!
//! ```text
//! Idle -> Probing -> Streaming -> Completed
//!           |  ^          |
//!           v  +----------+   (connection dropped)
//!          Idle               (session not found)
//! ```

use std::{fmt, future::Future, sync::Arc, time::Duration};

use futures_util::StreamExt;
use shared::{models::char_len, wire::WireEvent};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    cursor::{Cursor, CursorError, CursorStore},
    transport::{Probe, StreamTransport, TransportError},
};

/// Where a [`ResumableConsumer`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Not following anything. Initial state, and the state after cancel or not-found.
    Idle,
    /// Checking that the session exists before (re)opening it.
    Probing,
    /// Receiving frames.
    Streaming,
    /// Termination received. Further `resume` calls return the final text.
    Completed,
}

/// How a call to [`ResumableConsumer::resume`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// Termination received; carries the final text.
    Completed(String),
    /// The server has no such session. The cursor was discarded.
    NotFound,
    /// Stopped locally through a [`Canceller`]. Text and cursor are kept.
    Cancelled,
}

/// Reconnect pacing after a dropped connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Pause before re-probing after a dropped connection.
    pub delay: Duration,
    /// Consecutive failed reconnects tolerated before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

/// Why a consumer gave up.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The first existence check could not reach the server.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The cursor store failed.
    #[error(transparent)]
    Cursor(#[from] CursorError),
    /// Too many consecutive reconnects failed.
    #[error("stream interrupted; gave up after {attempts} reconnect attempts")]
    ReconnectLimit {
        /// Configured attempt limit.
        attempts: u32,
    },
    /// The server terminated the stream at a length shorter than the text
    /// already held locally.
    #[error("server ended the stream at {announced} characters but {received} were already received")]
    Diverged {
        /// Characters held locally.
        received: usize,
        /// Length carried by the termination frame.
        announced: usize,
    },
}

/// Progress handed to the caller after each applied frame.
#[derive(Debug, Clone, Copy)]
pub struct ConsumerUpdate<'a> {
    /// Text added by this frame.
    pub delta: &'a str,
    /// Everything received so far.
    pub text: &'a str,
    /// Length of `text` in characters.
    pub offset: usize,
}

type CompletionCallback = Box<dyn FnMut(&str) + Send>;

/// Stops a consumer from another task.
#[derive(Clone)]
pub struct Canceller<T> {
    transport: Arc<T>,
    session_key: String,
    stop: CancellationToken,
}

impl<T> fmt::Debug for Canceller<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Canceller")
            .field("session_key", &self.session_key)
            .field("stopped", &self.stop.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<T: StreamTransport + 'static> Canceller<T> {
    /// Closes the local connection at once and sends the cancel request in the
    /// background. Await the handle only if the server's answer matters.
    #[must_use = "dropping the handle detaches the cancel request"]
    pub fn cancel(&self) -> JoinHandle<Result<(), TransportError>> {
        self.stop.cancel();
        let transport = Arc::clone(&self.transport);
        let session_key = self.session_key.clone();
        tokio::spawn(async move {
            let result = transport.cancel(&session_key).await;
            if let Err(err) = &result {
                warn!(session_key, error = %err, "cancel request failed");
            }
            result
        })
    }
}

enum Applied {
    Appended,
    Duplicate,
    Gap,
}

/// Follows one session, persisting progress through a [`CursorStore`] and
/// reconnecting from the last received character when the connection drops.
pub struct ResumableConsumer<T, S> {
    transport: Arc<T>,
    store: S,
    session_key: String,
    state: ConsumerState,
    text: String,
    offset: usize,
    policy: ReconnectPolicy,
    on_complete: Option<CompletionCallback>,
    stop: CancellationToken,
}

impl<T, S> fmt::Debug for ResumableConsumer<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumableConsumer")
            .field("session_key", &self.session_key)
            .field("state", &self.state)
            .field("offset", &self.offset)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Runs `future` unless `stop` fires first.
async fn or_stopped<F: Future>(stop: &CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        () = stop.cancelled() => None,
        output = future => Some(output),
    }
}

impl<T, S> ResumableConsumer<T, S>
where
    T: StreamTransport + 'static,
    S: CursorStore,
{
    /// Creates an idle consumer, restoring any persisted text for `session_key`.
    ///
    /// # Errors
    /// Fails when the cursor store cannot be read.
    pub fn new(
        transport: Arc<T>,
        store: S,
        session_key: impl Into<String>,
    ) -> Result<Self, ConsumerError> {
        let mut consumer = Self {
            transport,
            store,
            session_key: session_key.into(),
            state: ConsumerState::Idle,
            text: String::new(),
            offset: 0,
            policy: ReconnectPolicy::default(),
            on_complete: None,
            stop: CancellationToken::new(),
        };
        consumer.restore()?;
        Ok(consumer)
    }

    /// Replaces the default reconnect pacing.
    #[must_use]
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Called with the final text each time a stream completes.
    #[must_use]
    pub fn on_complete(mut self, callback: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// Session this consumer follows.
    #[must_use]
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    /// Text received so far, never including the end-of-text marker.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Characters received so far.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// A handle that stops the running (or next) `resume` call. Each handle
    /// fires once; take a new one after a cancellation.
    #[must_use]
    pub fn canceller(&self) -> Canceller<T> {
        Canceller {
            transport: Arc::clone(&self.transport),
            session_key: self.session_key.clone(),
            stop: self.stop.clone(),
        }
    }

    /// Switches to another session and starts over from its persisted cursor.
    /// Cancellers handed out earlier stop working.
    ///
    /// # Errors
    /// Fails when the cursor store cannot be read.
    pub fn reset(&mut self, session_key: impl Into<String>) -> Result<(), ConsumerError> {
        self.stop.cancel();
        self.stop = CancellationToken::new();
        self.session_key = session_key.into();
        self.state = ConsumerState::Idle;
        self.restore()
    }

    fn restore(&mut self) -> Result<(), ConsumerError> {
        let cursor = self.store.load(&self.session_key)?;
        self.text = cursor.map(|cursor| cursor.text).unwrap_or_default();
        self.offset = char_len(&self.text);
        if self.offset > 0 {
            debug!(session_key = %self.session_key, offset = self.offset, "restored cursor");
        }
        Ok(())
    }

    /// Follows the session until it terminates, is not found, or is cancelled.
    ///
    /// A dropped connection goes back through the existence probe before the
    /// stream is reopened from the current offset.
    ///
    /// # Errors
    /// Returns an error when the first probe fails at the transport level, when
    /// the reconnect limit is reached, or when the cursor cannot be discarded
    /// after the session turned out not to exist. The cursor is kept in the
    /// first two cases. A termination announcing less text than was already
    /// received discards the cursor and fails with [`ConsumerError::Diverged`].
    pub async fn resume<F>(&mut self, mut on_update: F) -> Result<ResumeOutcome, ConsumerError>
    where
        F: FnMut(ConsumerUpdate<'_>),
    {
        if self.state == ConsumerState::Completed {
            return Ok(ResumeOutcome::Completed(self.text.clone()));
        }

        let mut failures: u32 = 0;
        loop {
            self.state = ConsumerState::Probing;
            let probe = match or_stopped(&self.stop, self.transport.probe(&self.session_key)).await {
                None => return Ok(self.cancelled()),
                Some(Ok(probe)) => probe,
                Some(Err(err)) if failures == 0 => {
                    self.state = ConsumerState::Idle;
                    return Err(err.into());
                }
                Some(Err(err)) => {
                    warn!(session_key = %self.session_key, error = %err, "probe failed");
                    failures = self.record_failure(failures)?;
                    if !self.backoff().await {
                        return Ok(self.cancelled());
                    }
                    continue;
                }
            };
            if probe == Probe::NotFound {
                return self.not_found();
            }

            self.state = ConsumerState::Streaming;
            let opened =
                or_stopped(&self.stop, self.transport.open(&self.session_key, self.offset)).await;
            let mut events = match opened {
                None => return Ok(self.cancelled()),
                Some(Ok(Some(events))) => events,
                Some(Ok(None)) => return self.not_found(),
                Some(Err(err)) => {
                    warn!(session_key = %self.session_key, error = %err, "failed to open stream");
                    failures = self.record_failure(failures)?;
                    if !self.backoff().await {
                        return Ok(self.cancelled());
                    }
                    continue;
                }
            };
            debug!(session_key = %self.session_key, from = self.offset, "streaming");

            loop {
                let Some(next) = or_stopped(&self.stop, events.next()).await else {
                    return Ok(self.cancelled());
                };
                match next {
                    Some(Ok(event)) if event.is_termination() => match event.offset() {
                        Some(total) if total == self.offset => return Ok(self.finish()),
                        Some(total) if total < self.offset => return self.diverged(total),
                        total => {
                            warn!(
                                session_key = %self.session_key,
                                expected = self.offset,
                                got = ?total,
                                "termination ahead of received text"
                            );
                            break;
                        }
                    },
                    Some(Ok(event)) => match self.apply(&event, &mut on_update) {
                        Applied::Appended => failures = 0,
                        Applied::Duplicate => {}
                        Applied::Gap => {
                            warn!(
                                session_key = %self.session_key,
                                expected = self.offset,
                                got = ?event.offset(),
                                "gap in stream"
                            );
                            break;
                        }
                    },
                    Some(Err(err)) => {
                        warn!(session_key = %self.session_key, error = %err, "stream failed");
                        break;
                    }
                    None => {
                        warn!(session_key = %self.session_key, "stream closed before termination");
                        break;
                    }
                }
            }

            failures = self.record_failure(failures)?;
            if !self.backoff().await {
                return Ok(self.cancelled());
            }
        }
    }

    fn apply<F>(&mut self, event: &WireEvent, on_update: &mut F) -> Applied
    where
        F: FnMut(ConsumerUpdate<'_>),
    {
        let Some(id) = event.offset() else {
            debug!(session_key = %self.session_key, "ignoring event without id");
            return Applied::Duplicate;
        };
        if id > self.offset {
            return Applied::Gap;
        }

        let data = event.data.as_str();
        let overlap = self.offset - id;
        let Some((start, _)) = data.char_indices().nth(overlap) else {
            return Applied::Duplicate;
        };
        let delta = &data[start..];

        let before = self.text.len();
        self.text.push_str(delta);
        self.offset += char_len(delta);

        if let Err(err) = self.store.save(&Cursor::new(&self.session_key, &self.text)) {
            warn!(session_key = %self.session_key, error = %err, "failed to persist cursor");
        }

        on_update(ConsumerUpdate {
            delta: &self.text[before..],
            text: &self.text,
            offset: self.offset,
        });
        Applied::Appended
    }

    fn record_failure(&mut self, failures: u32) -> Result<u32, ConsumerError> {
        let failures = failures + 1;
        if failures > self.policy.max_attempts {
            self.state = ConsumerState::Idle;
            return Err(ConsumerError::ReconnectLimit {
                attempts: self.policy.max_attempts,
            });
        }
        self.state = ConsumerState::Probing;
        info!(
            session_key = %self.session_key,
            attempt = failures,
            offset = self.offset,
            "reconnecting"
        );
        Ok(failures)
    }

    /// Waits out the reconnect delay. `false` if cancelled meanwhile.
    async fn backoff(&self) -> bool {
        or_stopped(&self.stop, tokio::time::sleep(self.policy.delay))
            .await
            .is_some()
    }

    fn finish(&mut self) -> ResumeOutcome {
        self.state = ConsumerState::Completed;
        if let Err(err) = self.store.remove(&self.session_key) {
            warn!(session_key = %self.session_key, error = %err, "failed to discard cursor");
        }
        info!(session_key = %self.session_key, length = self.offset, "stream completed");
        if let Some(callback) = self.on_complete.as_mut() {
            callback(&self.text);
        }
        ResumeOutcome::Completed(self.text.clone())
    }

    /// The server's text is shorter than ours, so the cursor cannot belong to
    /// this stream. It is discarded and the local text kept for inspection.
    fn diverged(&mut self, announced: usize) -> Result<ResumeOutcome, ConsumerError> {
        self.state = ConsumerState::Idle;
        warn!(
            session_key = %self.session_key,
            received = self.offset,
            announced,
            "stream shorter than saved progress; discarding cursor"
        );
        self.store.remove(&self.session_key)?;
        Err(ConsumerError::Diverged {
            received: self.offset,
            announced,
        })
    }

    fn not_found(&mut self) -> Result<ResumeOutcome, ConsumerError> {
        self.state = ConsumerState::Idle;
        info!(session_key = %self.session_key, "no such stream; discarding cursor");
        self.store.remove(&self.session_key)?;
        Ok(ResumeOutcome::NotFound)
    }

    fn cancelled(&mut self) -> ResumeOutcome {
        self.state = ConsumerState::Idle;
        self.stop = CancellationToken::new();
        info!(session_key = %self.session_key, offset = self.offset, "stream cancelled locally");
        ResumeOutcome::Cancelled
    }
}
