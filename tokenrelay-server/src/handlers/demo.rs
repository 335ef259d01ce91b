use std::{sync::Arc, time::Duration};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::models::char_len;
use tracing::{Instrument, info, info_span};

use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
    services::{demo_fragments, drive},
};

/// Body of a demo request.
#[derive(Debug, Deserialize)]
pub struct DemoRequest {
    /// Text to stream. Must not be empty.
    pub text: String,
    /// Characters per fragment; the configured default when absent.
    #[serde(default)]
    pub chunk_chars: Option<usize>,
    /// Upper bound of the pause between fragments; the configured default when absent.
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
}

/// Answer to an accepted demo request.
#[derive(Debug, Serialize)]
pub struct DemoResponse {
    /// Session being fed.
    pub session_id: String,
    /// Length of the text in characters.
    pub length: usize,
}

/// `POST /threads/{id}/demo`: streams the given text into the thread's session
/// in small jittered chunks, as a model would.
///
/// # Errors
/// `400` for empty text, `409` when a producer already feeds the thread.
pub async fn start_demo(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
    Json(request): Json<DemoRequest>,
) -> AppResult<(StatusCode, Json<DemoResponse>)> {
    if request.text.is_empty() {
        return Err(ApiError::bad_request("text must not be empty"));
    }

    let session_id = state.session_id(&thread_id);
    let Some(session) = state.registry.try_create(&session_id) else {
        return Err(
            ApiError::conflict("stream_busy", format!("thread {thread_id} is already streaming"))
                .with_details(json!({ "session_id": session_id })),
        );
    };

    let settings = &state.config.stream;
    let chunk_chars = request.chunk_chars.unwrap_or(settings.demo_chunk_chars).max(1);
    let max_delay_ms = request.max_delay_ms.unwrap_or(settings.demo_max_delay_ms);
    let linger = Duration::from_millis(settings.completed_linger_ms);
    let length = char_len(&request.text);

    session.on_complete(|id, content| {
        info!(session_id = id, length = char_len(&content), "stream content final");
    });

    let span = info_span!("producer", session_id = %session_id);
    tokio::spawn(
        drive(
            Arc::clone(&state.registry),
            session,
            demo_fragments(request.text, chunk_chars, max_delay_ms),
            linger,
        )
        .instrument(span),
    );

    info!(session_id, length, chunk_chars, "demo producer started");
    Ok((StatusCode::ACCEPTED, Json(DemoResponse { session_id, length })))
}
