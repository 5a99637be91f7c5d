//! Event types observed by clients.

use crate::{EventId, SubjectId, Timestamp};
use serde::{Deserialize, Serialize};

/// Where an event entered the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    /// Pushed by the server over the live transport
    Push,
    /// Reloaded from durable client storage
    Restored,
    /// Published by the application itself
    Manual,
    /// Synthesized after a successful polling refresh
    Poll,
}

/// Metadata associated with an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    /// When this client received the event (milliseconds since epoch)
    pub received_at: Timestamp,
    /// Set once the event has been fanned out to subscribers
    pub processed: bool,
    /// Set by the application through an explicit acknowledgment
    pub acknowledged: bool,
    /// How the event reached the client
    pub source: EventSource,
}

impl EventMetadata {
    /// Fresh metadata for an event received at `received_at`.
    pub fn new(source: EventSource, received_at: Timestamp) -> Self {
        Self {
            received_at,
            processed: false,
            acknowledged: false,
            source,
        }
    }
}

/// A state-change event as seen by one client.
///
/// Events are immutable once created; only the processing flags in
/// [`EventMetadata`] change afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    /// Transport message id, or a locally generated id
    pub id: EventId,
    /// Canonical event type
    pub event_type: String,
    /// Event body as sent by the server
    pub payload: serde_json::Value,
    /// Subject (order) the event is scoped to
    #[serde(rename = "subjectID", default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<SubjectId>,
    /// Server-side generation time (milliseconds since epoch)
    pub timestamp: Timestamp,
    /// Client-side bookkeeping
    pub metadata: EventMetadata,
}

impl SyncEvent {
    /// Create a new event.
    pub fn new(
        id: impl Into<EventId>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        subject_id: Option<SubjectId>,
        timestamp: Timestamp,
        source: EventSource,
        received_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            payload,
            subject_id,
            timestamp,
            metadata: EventMetadata::new(source, received_at),
        }
    }

    /// The subject this event is scoped to, if any.
    pub fn subject(&self) -> Option<&str> {
        self.subject_id.as_deref()
    }

    /// Whether the event is older than `max_age_ms` relative to `now`.
    pub fn is_older_than(&self, max_age_ms: u64, now: Timestamp) -> bool {
        now.saturating_sub(self.timestamp) > max_age_ms
    }

    /// Equality that ignores the volatile `received_at` stamp.
    pub fn same_content(&self, other: &SyncEvent) -> bool {
        self.id == other.id
            && self.event_type == other.event_type
            && self.payload == other.payload
            && self.subject_id == other.subject_id
            && self.timestamp == other.timestamp
            && self.metadata.processed == other.metadata.processed
            && self.metadata.acknowledged == other.metadata.acknowledged
            && self.metadata.source == other.metadata.source
    }
}
