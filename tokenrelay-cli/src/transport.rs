//! How the consumer reaches a stream: probe, open from an offset, cancel.

use async_trait::async_trait;
use futures_util::{StreamExt, stream::BoxStream};
use reqwest::{Client, StatusCode};
use shared::wire::{SseDecoder, WireEvent};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Decoded events of one open connection.
pub type WireEventStream = BoxStream<'static, Result<WireEvent, TransportError>>;

/// Answer to an existence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// The server knows the session.
    Found,
    /// The session was never created or has been forgotten.
    NotFound,
}

/// Failure talking to the server.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be sent or its body broke off.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The configured server URL does not parse.
    #[error("invalid server URL: {0}")]
    Url(#[from] url::ParseError),
    /// The configured server URL has no path to extend.
    #[error("server URL cannot carry a path: {0}")]
    NotABase(String),
    /// The server answered with a status the client does not handle.
    #[error("server answered {status} for {url}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Requested URL.
        url: String,
    },
    /// Any other transport failure.
    #[error("{0}")]
    Other(String),
}

/// The consumer's view of a server.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Existence check that opens no stream.
    ///
    /// # Errors
    /// Network failures and unexpected statuses.
    async fn probe(&self, session_key: &str) -> Result<Probe, TransportError>;

    /// Opens the stream from `from`. `Ok(None)` when the session does not exist.
    ///
    /// # Errors
    /// Network failures and unexpected statuses.
    async fn open(
        &self,
        session_key: &str,
        from: usize,
    ) -> Result<Option<WireEventStream>, TransportError>;

    /// Asks the server to stop the session's producer.
    ///
    /// # Errors
    /// Network failures and non-success statuses.
    async fn cancel(&self, session_key: &str) -> Result<(), TransportError>;
}

/// Talks to a `tokenrelay-server` over HTTP. Session keys are thread ids.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    api_base: Url,
}

impl HttpTransport {
    /// # Errors
    /// Fails when `server` is not an absolute base URL or the client cannot be built.
    pub fn new(server: &str) -> Result<Self, TransportError> {
        let api_base = Url::parse(server)?.join("api/")?;
        if api_base.cannot_be_a_base() {
            return Err(TransportError::NotABase(server.to_string()));
        }
        let client = Client::builder().user_agent("tokenrelay-cli").build()?;
        Ok(Self { client, api_base })
    }

    fn stream_url(&self, thread_id: &str) -> Result<Url, TransportError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|()| TransportError::NotABase(self.api_base.to_string()))?
            .pop_if_empty()
            .extend(["threads", thread_id, "stream"]);
        Ok(url)
    }
}

fn unexpected(status: StatusCode, url: &Url) -> TransportError {
    TransportError::Status {
        status: status.as_u16(),
        url: url.to_string(),
    }
}

#[async_trait]
impl StreamTransport for HttpTransport {
    async fn probe(&self, session_key: &str) -> Result<Probe, TransportError> {
        let url = self.stream_url(session_key)?;
        let response = self.client.head(url.clone()).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(Probe::NotFound),
            status if status.is_success() => Ok(Probe::Found),
            status => Err(unexpected(status, &url)),
        }
    }

    async fn open(
        &self,
        session_key: &str,
        from: usize,
    ) -> Result<Option<WireEventStream>, TransportError> {
        let mut url = self.stream_url(session_key)?;
        url.query_pairs_mut().append_pair("from", &from.to_string());
        debug!(%url, "opening stream");

        let response = self.client.get(url.clone()).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => return Err(unexpected(status, &url)),
            _ => {}
        }

        let mut body = response.bytes_stream();
        let events = async_stream::stream! {
            let mut decoder = SseDecoder::new();
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => {
                        for event in decoder.feed(&bytes) {
                            yield Ok(event);
                        }
                    }
                    Err(err) => {
                        yield Err(TransportError::Http(err));
                        break;
                    }
                }
            }
        };
        Ok(Some(events.boxed()))
    }

    async fn cancel(&self, session_key: &str) -> Result<(), TransportError> {
        let url = self.stream_url(session_key)?;
        let response = self.client.delete(url.clone()).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(unexpected(response.status(), &url))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_url_is_built_under_api() {
        let transport = HttpTransport::new("http://localhost:8080").unwrap();
        assert_eq!(
            transport.stream_url("42").unwrap().as_str(),
            "http://localhost:8080/api/threads/42/stream"
        );
    }

    #[test]
    fn server_path_prefix_is_kept_and_ids_are_escaped() {
        let transport = HttpTransport::new("https://relay.example/base/").unwrap();
        assert_eq!(
            transport.stream_url("a b/c").unwrap().as_str(),
            "https://relay.example/base/api/threads/a%20b%2Fc/stream"
        );
    }

    #[test]
    fn relative_server_is_rejected() {
        assert!(matches!(
            HttpTransport::new("localhost"),
            Err(TransportError::Url(_))
        ));
    }
}
