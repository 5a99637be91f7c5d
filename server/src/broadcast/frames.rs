//! Outbound SSE frames.
//!
//! Event bodies are serialized once per broadcast and shared between every
//! recipient through `Arc<str>`.

use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::Event;
use beacon_engine::{
    ClientId, ConnectedFrame, EventFrame, HeartbeatFrame, Sequence, SseFrame, Timestamp,
    CONNECTED_EVENT, HEARTBEAT_EVENT,
};

use super::BroadcastError;

/// A frame queued for one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    /// SSE event name
    pub event: Arc<str>,
    /// Sequence number, sent as the SSE `id`
    pub id: Option<Sequence>,
    /// JSON body
    pub data: Arc<str>,
    /// Reconnection hint
    pub retry: Option<Duration>,
}

impl OutboundFrame {
    /// The acknowledgment sent once per accepted connection.
    pub fn connected(client_id: &ClientId, now: Timestamp, retry: Duration) -> Result<Self, BroadcastError> {
        let body = ConnectedFrame {
            client_id: client_id.clone(),
            timestamp: now,
        };
        Ok(Self {
            event: Arc::from(CONNECTED_EVENT),
            id: None,
            data: Arc::from(serde_json::to_string(&body)?),
            retry: Some(retry),
        })
    }

    /// A keep-alive frame.
    pub fn heartbeat(now: Timestamp) -> Result<Self, BroadcastError> {
        let body = HeartbeatFrame { timestamp: now };
        Ok(Self {
            event: Arc::from(HEARTBEAT_EVENT),
            id: None,
            data: Arc::from(serde_json::to_string(&body)?),
            retry: None,
        })
    }

    /// A domain event named after its (canonical) type.
    pub fn event(sequence: Sequence, body: &EventFrame) -> Result<Self, BroadcastError> {
        Ok(Self {
            event: Arc::from(body.event_type.as_str()),
            id: Some(sequence),
            data: Arc::from(serde_json::to_string(body)?),
            retry: None,
        })
    }

    /// Convert to an axum SSE event.
    pub fn to_sse_event(&self) -> Event {
        let mut event = Event::default().event(&*self.event).data(&*self.data);
        if let Some(id) = self.id {
            event = event.id(id.to_string());
        }
        if let Some(retry) = self.retry {
            event = event.retry(retry);
        }
        event
    }

    /// The engine's view of this frame, as a client would decode it.
    pub fn to_sse_frame(&self) -> SseFrame {
        SseFrame {
            event: Some(self.event.to_string()),
            id: self.id.map(|id| id.to_string()),
            data: self.data.to_string(),
            retry: self.retry.map(|r| r.as_millis() as u64),
        }
    }
}
