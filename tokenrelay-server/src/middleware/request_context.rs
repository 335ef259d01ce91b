use std::str::FromStr;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::http::error::{ApiError, AppResult};
use shared::config::server::Config;

/// Per-request data stashed in request extensions.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    /// Correlation id, echoed on the response.
    pub request_id: String,
}

/// Which header [`assign_request_id`] reads and writes.
#[derive(Clone, Debug)]
pub struct RequestIdState {
    header: HeaderName,
}

impl RequestIdState {
    /// Uses the configured header, falling back to `x-request-id` when the
    /// configured name is not a valid header.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let header = HeaderName::from_str(&config.server.request_id_header)
            .unwrap_or_else(|_| HeaderName::from_static("x-request-id"));
        Self { header }
    }
}

/// Reuses the caller's request id or mints one, and echoes it on the response.
///
/// # Errors
/// Fails when the id cannot be encoded as a header value.
pub async fn assign_request_id(
    State(state): State<RequestIdState>,
    mut request: Request<Body>,
    next: Next,
) -> AppResult<Response> {
    let request_id = extract_request_id(request.headers(), &state.header)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let header_value = HeaderValue::from_str(&request_id)
        .map_err(|_| ApiError::internal_server_error("failed to encode request id"))?;

    request.extensions_mut().insert(RequestContext {
        request_id: request_id.clone(),
    });
    request
        .headers_mut()
        .insert(state.header.clone(), header_value.clone());

    let mut response = next.run(request).await;
    response.headers_mut().insert(state.header, header_value);

    Ok(response)
}

fn extract_request_id(headers: &HeaderMap, header: &HeaderName) -> Option<String> {
    headers
        .get(header)
        .and_then(|value| value.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
