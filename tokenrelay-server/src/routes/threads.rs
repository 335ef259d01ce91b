use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::{
    app_state::AppState,
    handlers::{demo, streaming},
};

/// Per-thread stream routes, mounted under `/api`.
pub fn create_router_threads() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/threads/{thread_id}/stream",
            get(streaming::stream_thread)
                .head(streaming::probe_stream)
                .delete(streaming::cancel_stream),
        )
        .route("/threads/{thread_id}/demo", post(demo::start_demo))
}
