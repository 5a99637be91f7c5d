//! Server-side event broadcasting.
//!
//! Domain code calls [`Broadcaster::broadcast`] whenever an order changes.
//! The broadcaster stamps and serializes the event once, then pushes it to
//! every connected client whose filter matches. Each client owns a bounded
//! channel drained by its SSE response; a push never waits on a client.

mod frames;
mod manager;
mod replay;

pub use frames::OutboundFrame;
pub use manager::{BroadcastReport, Broadcaster, BroadcasterSettings, BroadcasterStats, ClientRecord, FrameSender};
pub use replay::{LoggedEvent, ReplayLog};

use beacon_engine::SubjectId;
use serde::Deserialize;

/// An event handed to the broadcaster by domain code.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastEvent {
    /// Event type; aliases are canonicalized before delivery
    pub event_type: String,
    /// Domain payload
    #[serde(default)]
    pub data: serde_json::Value,
    /// Subject the event is scoped to
    #[serde(rename = "subjectID", default)]
    pub subject_id: Option<SubjectId>,
}

impl BroadcastEvent {
    /// A subject-less (global) event.
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            subject_id: None,
        }
    }

    /// Scope the event to a subject.
    pub fn for_subject(mut self, subject_id: impl Into<SubjectId>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }
}

/// Broadcaster errors.
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("client id already registered: {0}")]
    DuplicateClient(String),

    #[error("client limit reached ({0})")]
    CapacityExceeded(usize),

    #[error("invalid event type: {0:?}")]
    InvalidEventType(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
