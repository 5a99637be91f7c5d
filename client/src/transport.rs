//! Push transport.
//!
//! The connection state machine only needs "open a stream of SSE frames for
//! this filter". [`HttpTransport`] does that over reqwest; tests substitute
//! a scripted implementation.

use async_trait::async_trait;
use beacon_engine::{SseDecoder, SseFrame, SubjectId};
use futures::stream::{self, BoxStream, StreamExt};
use url::Url;

use crate::error::{Result, TransportError};

/// Frames decoded from one open connection.
pub type FrameStream = BoxStream<'static, std::result::Result<SseFrame, TransportError>>;

/// Parameters of one connection attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectRequest {
    pub subject_id: Option<SubjectId>,
    /// Canonical event types; empty means all
    pub event_types: Vec<String>,
    /// Resumption token from the last received event
    pub last_event_id: Option<String>,
}

/// Opens push connections.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection. The returned stream ends when the server closes it.
    async fn open(&self, request: &ConnectRequest) -> std::result::Result<FrameStream, TransportError>;
}

/// SSE over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpTransport {
    /// Transport for the stream endpoint at `endpoint` (e.g. `http://host:3000/events`).
    pub fn new(endpoint: &str) -> Result<Self> {
        Ok(Self::with_client(reqwest::Client::new(), Url::parse(endpoint)?))
    }

    pub fn with_client(client: reqwest::Client, endpoint: Url) -> Self {
        Self { client, endpoint }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// The endpoint with the request's filters as query parameters.
    pub fn request_url(&self, request: &ConnectRequest) -> Url {
        let mut pairs: Vec<(&str, String)> = Vec::new();
        if let Some(subject) = &request.subject_id {
            pairs.push(("subjectID", subject.clone()));
        }
        if !request.event_types.is_empty() {
            pairs.push(("eventTypes", request.event_types.join(",")));
        }
        if let Some(id) = &request.last_event_id {
            pairs.push(("lastEventId", id.clone()));
        }

        let mut url = self.endpoint.clone();
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, request: &ConnectRequest) -> std::result::Result<FrameStream, TransportError> {
        let url = self.request_url(request);
        tracing::debug!(url = %url, "Opening event stream");

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let frames = response
            .bytes_stream()
            .scan(SseDecoder::new(), |decoder, chunk| {
                let batch: Vec<_> = match chunk {
                    Ok(bytes) => decoder.feed(&bytes).into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(TransportError::Stream(e.to_string()))],
                };
                futures::future::ready(Some(stream::iter(batch)))
            })
            .flatten();

        Ok(frames.boxed())
    }
}
