use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
struct HealthResponse<'a> {
    status: &'a str,
}

#[derive(Serialize)]
struct ReadyResponse<'a> {
    status: &'a str,
    sessions: usize,
}

async fn healthz() -> impl IntoResponse {
    metrics::counter!("health_checks_total", "endpoint" => "healthz", "status" => "ok")
        .increment(1);
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    metrics::counter!("health_checks_total", "endpoint" => "readyz", "status" => "ok")
        .increment(1);
    (
        StatusCode::OK,
        Json(ReadyResponse {
            status: "ready",
            sessions: state.registry.len(),
        }),
    )
}

/// Liveness and readiness routes.
pub fn create_health_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{Body, to_bytes},
        http::Request,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    #[tokio::test]
    async fn healthz_returns_ok() {
        let _ = crate::server::metrics_handle();
        let app = create_health_router().with_state(Arc::new(AppState::default()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readyz_reports_live_sessions() {
        let state = Arc::new(AppState::default());
        state.registry.get_or_create("thread-1");
        state.registry.get_or_create("thread-2");
        state.registry.append("thread-1", "x");
        state.registry.append("thread-2", "y");

        let app = create_health_router().with_state(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/readyz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), 1024).await.unwrap();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "ready");
        assert_eq!(json["sessions"], 2);
    }
}
