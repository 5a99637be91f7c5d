//! Stream handler - opens an SSE connection for one client.

use std::convert::Infallible;
use std::sync::Arc;

use axum::response::sse::{Event, KeepAlive, Sse};
use beacon_engine::{ClientFilter, ClientId};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::broadcast::{Broadcaster, OutboundFrame};
use crate::config::Config;
use crate::error::Result;

/// Query parameters for `GET /events`.
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Only events for this subject
    #[serde(rename = "subjectID")]
    pub subject_id: Option<String>,
    /// Comma-separated event types
    #[serde(rename = "eventTypes")]
    pub event_types: Option<String>,
    /// Resume after this event id
    #[serde(rename = "lastEventId")]
    pub last_event_id: Option<String>,
}

/// Unregisters the client when its response stream is dropped.
struct ClientGuard {
    id: ClientId,
    broadcaster: Arc<Broadcaster>,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.broadcaster.remove_client(&self.id);
    }
}

/// Register a new client and build its SSE response.
///
/// `header_last_event_id` is the `Last-Event-ID` header a browser sends on
/// automatic reconnection; the query parameter wins when both are present.
pub fn open_stream(
    broadcaster: Arc<Broadcaster>,
    config: &Config,
    query: StreamQuery,
    header_last_event_id: Option<String>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let filter = ClientFilter::from_query(query.subject_id.as_deref(), query.event_types.as_deref());
    let last_event_id = query.last_event_id.or(header_last_event_id);

    let client_id = uuid::Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::channel(config.client_buffer);
    let preamble = broadcaster.add_client(client_id.clone(), tx, filter, last_event_id.as_deref())?;

    let guard = ClientGuard {
        id: client_id,
        broadcaster,
    };

    Ok(Sse::new(client_stream(preamble, rx, guard)).keep_alive(KeepAlive::default()))
}

/// Preamble frames followed by whatever the broadcaster queues.
///
/// The stream ends when the broadcaster drops the sender (eviction) and
/// unregisters the client when the connection goes away.
fn client_stream(
    preamble: Vec<OutboundFrame>,
    rx: mpsc::Receiver<OutboundFrame>,
    guard: ClientGuard,
) -> impl Stream<Item = std::result::Result<Event, Infallible>> {
    let live = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|frame| (frame, rx))
    });

    stream::iter(preamble).chain(live).map(move |frame| {
        guard.broadcaster.touch(&guard.id);
        Ok(frame.to_sse_event())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{BroadcastEvent, BroadcasterSettings};
    use serde_json::json;

    fn setup() -> (Arc<Broadcaster>, Config) {
        let config = Config::default();
        (Broadcaster::new_shared(BroadcasterSettings::from(&config)), config)
    }

    #[tokio::test]
    async fn stream_registers_and_unregisters() {
        let (broadcaster, config) = setup();
        let sse = open_stream(broadcaster.clone(), &config, StreamQuery::default(), None).unwrap();
        assert_eq!(broadcaster.client_count(), 1);

        drop(sse);
        assert_eq!(broadcaster.client_count(), 0);
    }

    #[tokio::test]
    async fn stream_yields_preamble_then_live_frames() {
        let (broadcaster, _config) = setup();
        let (tx, rx) = mpsc::channel(4);
        let preamble = broadcaster
            .add_client("c-1".into(), tx, ClientFilter::default(), None)
            .unwrap();
        let guard = ClientGuard {
            id: "c-1".into(),
            broadcaster: broadcaster.clone(),
        };
        let mut stream = Box::pin(client_stream(preamble, rx, guard));

        assert!(stream.next().await.is_some());
        broadcaster
            .broadcast(BroadcastEvent::new("stage_change", json!({})))
            .unwrap();
        assert!(stream.next().await.is_some());

        // Eviction drops the sender and ends the stream.
        broadcaster.remove_client("c-1");
        assert!(stream.next().await.is_none());
    }
}
