use axum::{body::Body, http::Request};
use std::time::Duration;
use tower_http::classify::{ServerErrorsAsFailures, ServerErrorsFailureClass, SharedClassifier};
use tower_http::trace::{DefaultOnBodyChunk, DefaultOnResponse, MakeSpan, OnEos, TraceLayer};
use tracing::{Level, Span, debug, error};

use crate::middleware::request_context::RequestContext;

/// The concrete layer returned by [`create_trace_layer`].
pub type TraceLayerType = TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    HttpMakeSpan,
    fn(&Request<Body>, &Span),
    DefaultOnResponse,
    DefaultOnBodyChunk,
    StreamEnded,
    fn(ServerErrorsFailureClass, Duration, &Span),
>;

/// Opens one `http_request` span per request, tagged with the request id.
#[derive(Clone, Debug, Default)]
pub struct HttpMakeSpan;

impl<B> MakeSpan<B> for HttpMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let request_id = request
            .extensions()
            .get::<RequestContext>()
            .map_or_else(|| "n/a".into(), |ctx| ctx.request_id.clone());

        tracing::info_span!(
            "http_request",
            method = %request.method(),
            path = %request.uri().path(),
            request_id = %request_id,
        )
    }
}

/// Logs the end of a streamed response body, which for stream routes is
/// when the reader actually goes away.
#[derive(Clone, Copy, Debug, Default)]
pub struct StreamEnded;

impl OnEos for StreamEnded {
    fn on_eos(self, _trailers: Option<&http::HeaderMap>, stream_duration: Duration, span: &Span) {
        span.in_scope(|| debug!(duration = ?stream_duration, "response body finished"));
    }
}

/// Logs the query and protocol version when a request arrives.
pub fn on_request_handler(req: &Request<Body>, span: &Span) {
    span.in_scope(|| {
        debug!(
            query = req.uri().query().unwrap_or(""),
            version = ?req.version(),
            "started processing request"
        );
    });
}

/// Logs server errors with their latency.
pub fn on_failure_handler(error: ServerErrorsFailureClass, latency: Duration, span: &Span) {
    span.in_scope(|| {
        error!(
            error = %error,
            latency = ?latency,
            "error processing request"
        );
    });
}

/// Request/response logging for every route.
#[must_use]
pub fn create_trace_layer() -> TraceLayerType {
    TraceLayer::new_for_http()
        .make_span_with(HttpMakeSpan)
        .on_request(on_request_handler as fn(&Request<Body>, &Span))
        .on_response(DefaultOnResponse::new().level(Level::INFO))
        .on_eos(StreamEnded)
        .on_failure(on_failure_handler as fn(ServerErrorsFailureClass, Duration, &Span))
}
