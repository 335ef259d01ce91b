//! The resumable consumer against a live server over HTTP.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use cli::{
    ConsumerState, CursorStore, FileCursorStore, HttpTransport, MemoryCursorStore, Probe,
    ReconnectPolicy, ResumableConsumer, ResumeOutcome, StreamTransport, TransportError,
    cursor::Cursor, transport::WireEventStream,
};
use futures_util::StreamExt;
use server::{app_state::AppState, server::create_app_router, stream::CancelHandle};
use shared::config::server::Config;
use tempfile::TempDir;
use tokio::{net::TcpListener, time::timeout};
use tokio_util::sync::CancellationToken;

async fn start_server() -> (String, Arc<AppState>) {
    let mut config = Config::with_defaults();
    config.stream.completed_linger_ms = 60_000;
    config.stream.demo_max_delay_ms = 5;
    let state = Arc::new(AppState::new(Arc::new(config)));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_app_router(Arc::clone(&state), server::server::metrics_handle());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        delay: Duration::from_millis(20),
        max_attempts: 5,
    }
}

/// Cuts the first connection after a few events to force a reconnect.
struct FlakyTransport {
    inner: HttpTransport,
    cut_after: usize,
    opens: AtomicUsize,
}

#[async_trait]
impl StreamTransport for FlakyTransport {
    async fn probe(&self, session_key: &str) -> Result<Probe, TransportError> {
        self.inner.probe(session_key).await
    }

    async fn open(
        &self,
        session_key: &str,
        from: usize,
    ) -> Result<Option<WireEventStream>, TransportError> {
        let opened = self.inner.open(session_key, from).await?;
        if self.opens.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(opened.map(|events| events.take(self.cut_after).boxed()))
        } else {
            Ok(opened)
        }
    }

    async fn cancel(&self, session_key: &str) -> Result<(), TransportError> {
        self.inner.cancel(session_key).await
    }
}

#[tokio::test]
async fn follows_a_live_stream_to_completion() {
    let (base, state) = start_server().await;
    state.registry.get_or_create("thread-live");

    let transport = Arc::new(HttpTransport::new(&base).unwrap());
    let store = Arc::new(MemoryCursorStore::new());
    let mut consumer =
        ResumableConsumer::new(transport, Arc::clone(&store), "live").unwrap();

    let producer = {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            while state
                .registry
                .get("thread-live")
                .is_some_and(|session| session.subscriber_count() == 0)
            {
                tokio::task::yield_now().await;
            }
            for word in ["stream", "ed ", "text"] {
                state.registry.append("thread-live", word);
            }
            state.registry.complete("thread-live");
        })
    };

    let mut seen = String::new();
    let outcome = timeout(
        Duration::from_secs(5),
        consumer.resume(|update| seen.push_str(update.delta)),
    )
    .await
    .unwrap()
    .unwrap();
    producer.await.unwrap();

    assert_eq!(outcome, ResumeOutcome::Completed("streamed text".into()));
    assert_eq!(seen, "streamed text");
    assert_eq!(consumer.state(), ConsumerState::Completed);
    assert!(store.get("live").is_none());
}

#[tokio::test]
async fn reconnects_after_a_cut_without_duplicating_text() {
    let (base, state) = start_server().await;
    let fragments = ["one ", "two ", "three ", "four ", "five"];
    state.registry.get_or_create("thread-cut");
    for fragment in fragments {
        state.registry.append("thread-cut", fragment);
    }
    state.registry.complete("thread-cut");

    let transport = Arc::new(FlakyTransport {
        inner: HttpTransport::new(&base).unwrap(),
        cut_after: 2,
        opens: AtomicUsize::new(0),
    });
    let mut consumer = ResumableConsumer::new(
        Arc::clone(&transport),
        MemoryCursorStore::new(),
        "cut",
    )
    .unwrap()
    .with_reconnect_policy(fast_policy());

    let outcome = timeout(Duration::from_secs(5), consumer.resume(|_| {}))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome, ResumeOutcome::Completed(fragments.concat()));
    assert_eq!(transport.opens.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn resumes_from_a_cursor_saved_by_an_earlier_run() {
    let (base, state) = start_server().await;
    state.registry.get_or_create("thread-saved");
    state.registry.append("thread-saved", "Hello, ");
    state.registry.append("thread-saved", "world");
    state.registry.complete("thread-saved");

    let dir = TempDir::new().unwrap();
    let store = FileCursorStore::new(dir.path());
    store.save(&Cursor::new("saved", "Hello")).unwrap();

    let transport = Arc::new(HttpTransport::new(&base).unwrap());
    let mut consumer = ResumableConsumer::new(transport, store.clone(), "saved").unwrap();
    assert_eq!(consumer.offset(), 5);

    let mut deltas = Vec::new();
    let outcome = consumer
        .resume(|update| deltas.push(update.delta.to_string()))
        .await
        .unwrap();

    assert_eq!(outcome, ResumeOutcome::Completed("Hello, world".into()));
    assert_eq!(deltas, [", ", "world"]);
    assert!(store.load("saved").unwrap().is_none());
}

#[tokio::test]
async fn unknown_thread_discards_the_cursor() {
    let (base, _state) = start_server().await;
    let store = Arc::new(MemoryCursorStore::new());
    store.save(&Cursor::new("gone", "left over")).unwrap();

    let transport = Arc::new(HttpTransport::new(&base).unwrap());
    let mut consumer = ResumableConsumer::new(transport, Arc::clone(&store), "gone").unwrap();

    let outcome = consumer.resume(|_| {}).await.unwrap();
    assert_eq!(outcome, ResumeOutcome::NotFound);
    assert!(store.get("gone").is_none());
}

#[tokio::test]
async fn cancel_reaches_the_producer() {
    let (base, state) = start_server().await;
    let token = CancellationToken::new();
    state.registry.get_or_create("thread-stop");
    state.registry.append("thread-stop", "partial");
    state
        .registry
        .set_cancel_handle("thread-stop", CancelHandle::from_token(token.clone()));

    let transport = Arc::new(HttpTransport::new(&base).unwrap());
    let store = Arc::new(MemoryCursorStore::new());
    let mut consumer = ResumableConsumer::new(transport, Arc::clone(&store), "stop").unwrap();
    let canceller = consumer.canceller();

    let mut request = None;
    let outcome = timeout(
        Duration::from_secs(5),
        consumer.resume(|update| {
            if update.text == "partial" {
                request = Some(canceller.cancel());
            }
        }),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(outcome, ResumeOutcome::Cancelled);
    request.unwrap().await.unwrap().unwrap();
    assert!(token.is_cancelled());
    assert_eq!(store.get("stop").unwrap().text, "partial");
}

#[tokio::test]
async fn demo_stream_survives_repeated_cuts() {
    let (base, _state) = start_server().await;
    let text = "Streams are resumed from the last character received.\n".repeat(4);

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/api/threads/demo/demo"))
        .json(&serde_json::json!({ "text": text, "chunk_chars": 4 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);

    let transport = Arc::new(FlakyTransport {
        inner: HttpTransport::new(&base).unwrap(),
        cut_after: 3,
        opens: AtomicUsize::new(0),
    });
    let mut consumer = ResumableConsumer::new(transport, MemoryCursorStore::new(), "demo")
        .unwrap()
        .with_reconnect_policy(fast_policy());

    let outcome = timeout(Duration::from_secs(10), consumer.resume(|_| {}))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, ResumeOutcome::Completed(text));
}
