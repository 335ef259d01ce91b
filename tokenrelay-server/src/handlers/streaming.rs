use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{Json, Response},
};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::wire;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info};

use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
    stream::{Delivery, Subscription},
};

/// Query string of a stream read.
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Character offset to resume from, kept raw so bad values fall back to 0.
    pub from: Option<String>,
}

/// Body of a cancel answer.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    /// Session the cancel was routed to.
    pub session_id: String,
    /// What the request did, e.g. `invoked` or `not_found`.
    pub outcome: &'static str,
}

/// Reads the `from` query parameter. Missing, negative or unparsable values
/// all resume from the start.
#[must_use]
pub fn parse_from(raw: Option<&str>) -> usize {
    raw.and_then(|value| value.trim().parse::<i64>().ok())
        .and_then(|value| usize::try_from(value).ok())
        .unwrap_or(0)
}

/// `HEAD`: 200 if a session exists for the thread, otherwise 404.
pub async fn probe_stream(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
) -> StatusCode {
    let session_id = state.session_id(&thread_id);
    if state.registry.exists(&session_id) {
        StatusCode::OK
    } else {
        debug!(session_id, "probe for unknown stream");
        StatusCode::NOT_FOUND
    }
}

/// `GET`: replays the session from `from`, then follows it live until it ends.
///
/// # Errors
/// `404` when the thread has no session.
pub async fn stream_thread(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> AppResult<Response> {
    let session_id = state.session_id(&thread_id);
    let from = parse_from(query.from.as_deref());

    let Some(subscription) = state.registry.subscribe(&session_id, from) else {
        return Err(ApiError::not_found(format!("no stream for thread {thread_id}"))
            .with_details(json!({ "session_id": session_id })));
    };
    info!(session_id, from, subscriber = subscription.id(), "stream reader attached");

    let keep_alive = Duration::from_secs(state.config.sse.keep_alive_seconds.max(5));
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, wire::CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("x-accel-buffering", "no")
        .body(Body::from_stream(wire_stream(subscription, keep_alive)))?;
    Ok(response)
}

/// `DELETE`: forwards a cancel to the thread's producer. Always 200; the body
/// says what happened.
pub async fn cancel_stream(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
) -> Json<CancelResponse> {
    let session_id = state.session_id(&thread_id);
    let outcome = state.registry.request_cancel(&session_id);
    info!(session_id, outcome = outcome.as_str(), "cancel requested");

    Json(CancelResponse {
        session_id,
        outcome: outcome.as_str(),
    })
}

enum Next {
    Delivery(Option<Delivery>),
    KeepAlive,
}

/// Encodes a subscription onto the wire. Ends right after the termination
/// event; dropping the body detaches the subscription.
fn wire_stream(
    mut subscription: Subscription,
    keep_alive: Duration,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    async_stream::stream! {
        let mut ticker = interval_at(Instant::now() + keep_alive, keep_alive);
        loop {
            let next = tokio::select! {
                delivery = subscription.recv() => Next::Delivery(delivery),
                _ = ticker.tick() => Next::KeepAlive,
            };

            match next {
                Next::KeepAlive => yield Ok(Bytes::from_static(wire::KEEP_ALIVE.as_bytes())),
                Next::Delivery(Some(Delivery::Frame(frame))) => {
                    ticker.reset();
                    yield Ok(Bytes::from(wire::encode_frame(&frame)));
                }
                Next::Delivery(Some(Delivery::Terminated { offset })) => {
                    yield Ok(Bytes::from(wire::encode_termination(offset)));
                    break;
                }
                Next::Delivery(None) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::create_app_router;
    use axum::{Router, body::to_bytes, http::Request};
    use futures_util::StreamExt;
    use serde_json::Value;
    use shared::config::server::Config;
    use shared::wire::SseDecoder;
    use tokio::time::timeout;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<AppState>) {
        let state = Arc::new(AppState::new(Arc::new(Config::with_defaults())));
        let router = create_app_router(Arc::clone(&state), crate::server::metrics_handle());
        (router, state)
    }

    fn request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn from_parameter_is_clamped() {
        assert_eq!(parse_from(None), 0);
        assert_eq!(parse_from(Some("12")), 12);
        assert_eq!(parse_from(Some(" 7 ")), 7);
        assert_eq!(parse_from(Some("-5")), 0);
        assert_eq!(parse_from(Some("abc")), 0);
        assert_eq!(parse_from(Some("")), 0);
    }

    #[tokio::test]
    async fn probe_reports_presence() {
        let (router, state) = app();
        let missing = router
            .clone()
            .oneshot(request("HEAD", "/api/threads/42/stream"))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        state.registry.get_or_create("thread-42");
        state.registry.append("thread-42", "hi");
        let found = router
            .oneshot(request("HEAD", "/api/threads/42/stream"))
            .await
            .unwrap();
        assert_eq!(found.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_unknown_stream_is_problem_404() {
        let (router, _state) = app();
        let response = router
            .oneshot(request("GET", "/api/threads/404/stream"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let json: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["code"], "not_found");
        assert_eq!(json["details"]["session_id"], "thread-404");
    }

    #[tokio::test]
    async fn completed_stream_replays_from_offset_with_headers() {
        let (router, state) = app();
        state.registry.get_or_create("thread-1");
        for text in ["Hel", "lo ", "world"] {
            state.registry.append("thread-1", text);
        }
        state.registry.complete("thread-1");

        let response = router
            .oneshot(request("GET", "/api/threads/1/stream?from=3"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
        assert_eq!(response.headers()["x-accel-buffering"], "no");

        let body = body_text(response).await;
        assert_eq!(
            body,
            format!(
                "id:3\nevent:token\ndata:lo \n\nid:6\nevent:token\ndata:world\n\nid:11\nevent:token\ndata:{}\n\n",
                wire::END_OF_TEXT
            )
        );
    }

    #[tokio::test]
    async fn garbage_from_replays_everything() {
        let (router, state) = app();
        state.registry.get_or_create("thread-2");
        state.registry.append("thread-2", "abc");
        state.registry.complete("thread-2");

        let body = body_text(
            router
                .oneshot(request("GET", "/api/threads/2/stream?from=-3"))
                .await
                .unwrap(),
        )
        .await;
        assert!(body.starts_with("id:0\nevent:token\ndata:abc\n\n"));
    }

    #[tokio::test]
    async fn live_stream_delivers_appends_then_ends() {
        let (router, state) = app();
        state.registry.get_or_create("thread-3");

        let response = router
            .oneshot(request("GET", "/api/threads/3/stream"))
            .await
            .unwrap();
        let mut chunks = response.into_body().into_data_stream();

        state.registry.append("thread-3", " two\nlines");
        state.registry.complete("thread-3");

        let mut decoder = SseDecoder::new();
        let mut events = Vec::new();
        while let Some(chunk) = timeout(Duration::from_secs(2), chunks.next())
            .await
            .expect("body makes progress")
        {
            events.extend(decoder.feed(&chunk.unwrap()));
        }

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, " two\nlines");
        assert_eq!(events[0].offset(), Some(0));
        assert!(events[1].is_termination());
        assert_eq!(events[1].offset(), Some(10));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_stream_sends_keep_alive_comments() {
        let (router, state) = app();
        state.registry.get_or_create("thread-idle");

        let response = router
            .oneshot(request("GET", "/api/threads/idle/stream"))
            .await
            .unwrap();
        let mut chunks = response.into_body().into_data_stream();

        let first = chunks.next().await.unwrap().unwrap();
        assert_eq!(&first[..], wire::KEEP_ALIVE.as_bytes());
    }

    #[tokio::test]
    async fn dropping_the_body_detaches_the_reader() {
        let (router, state) = app();
        let session = state.registry.get_or_create("thread-4");

        let response = router
            .oneshot(request("GET", "/api/threads/4/stream"))
            .await
            .unwrap();
        assert_eq!(session.subscriber_count(), 1);

        drop(response);
        assert_eq!(session.subscriber_count(), 0);
        assert!(session.append("producer unaffected"));
    }

    #[tokio::test]
    async fn delete_cancels_the_producer_once() {
        let (router, state) = app();
        let token = tokio_util::sync::CancellationToken::new();
        state.registry.get_or_create("thread-5");
        state.registry.set_cancel_handle(
            "thread-5",
            crate::stream::CancelHandle::from_token(token.clone()),
        );

        let first = router
            .clone()
            .oneshot(request("DELETE", "/api/threads/5/stream"))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let json: Value = serde_json::from_str(&body_text(first).await).unwrap();
        assert_eq!(json["outcome"], "invoked");
        assert!(token.is_cancelled());

        let second = router
            .oneshot(request("DELETE", "/api/threads/5/stream"))
            .await
            .unwrap();
        let json: Value = serde_json::from_str(&body_text(second).await).unwrap();
        assert_eq!(json["outcome"], "already_requested");
    }

    #[tokio::test]
    async fn delete_unknown_stream_is_still_ok() {
        let (router, state) = app();
        let response = router
            .oneshot(request("DELETE", "/api/threads/none/stream"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["outcome"], "not_found");
        assert!(state.registry.is_empty());
    }
}
