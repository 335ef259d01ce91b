use std::{
    convert::Infallible,
    fmt::Display,
    sync::Arc,
    time::{Duration, Instant},
};

use futures::{Stream, StreamExt};
use metrics::{counter, histogram};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::stream::{CancelHandle, Session, SessionRegistry};

/// Why a producer stopped feeding its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStopReason {
    /// The fragment source ran dry.
    Completed,
    /// A cancel request reached the producer.
    Cancelled,
    /// The fragment source yielded an error.
    Failed,
    /// The session was completed by someone else mid-run.
    Closed,
}

impl StreamStopReason {
    /// Label used in logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }
}

/// Pumps `fragments` into `session` until the source ends, fails, or is
/// cancelled through the session.
///
/// The session is always completed afterwards, so subscribers always see a
/// termination. It stays registered for `linger` so late readers can still
/// replay it, then it is removed.
pub async fn drive<S, E>(
    registry: Arc<SessionRegistry>,
    session: Arc<Session>,
    fragments: S,
    linger: Duration,
) -> StreamStopReason
where
    S: Stream<Item = Result<String, E>>,
    E: Display,
{
    let token = CancellationToken::new();
    session.set_cancel_handle(CancelHandle::from_token(token.clone()));

    let started = Instant::now();
    let mut fragments = std::pin::pin!(fragments);
    let reason = loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => None,
            next = fragments.next() => Some(next),
        };
        let Some(next) = next else {
            break StreamStopReason::Cancelled;
        };

        match next {
            Some(Ok(text)) => {
                if !session.append(text) {
                    break StreamStopReason::Closed;
                }
            }
            Some(Err(err)) => {
                warn!(session_id = session.id(), error = %err, "fragment source failed");
                break StreamStopReason::Failed;
            }
            None => break StreamStopReason::Completed,
        }
    };

    session.complete();

    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    histogram!("tokenrelay_stream_duration_ms").record(elapsed_ms);
    counter!("tokenrelay_producer_stops_total", "reason" => reason.as_str()).increment(1);
    info!(
        session_id = session.id(),
        reason = reason.as_str(),
        length = session.len(),
        "producer finished"
    );

    if !linger.is_zero() {
        tokio::time::sleep(linger).await;
    }
    registry.remove_session(&session);
    reason
}

/// Replays `text` in chunks of `chunk_chars` characters with a random pause of
/// up to `max_delay_ms` before each chunk. Stands in for a model during
/// manual testing.
pub fn demo_fragments(
    text: String,
    chunk_chars: usize,
    max_delay_ms: u64,
) -> impl Stream<Item = Result<String, Infallible>> + Send + 'static {
    async_stream::stream! {
        let chars: Vec<char> = text.chars().collect();
        for chunk in chars.chunks(chunk_chars.max(1)) {
            let delay = if max_delay_ms == 0 {
                0
            } else {
                rand::rng().random_range(0..=max_delay_ms)
            };
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            yield Ok(chunk.iter().collect::<String>());
        }
    }
}
