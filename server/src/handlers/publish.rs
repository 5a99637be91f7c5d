//! Publish handler - accepts events from domain services and fans them out.

use beacon_engine::{Sequence, SubjectId, Timestamp};
use serde::Serialize;

use crate::broadcast::{BroadcastEvent, Broadcaster};
use crate::error::{AppError, Result};

/// Response for a publish.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    /// Event id as seen by clients
    pub id: String,
    pub timestamp: Timestamp,
    /// Clients the event was queued for
    pub delivered: usize,
    /// Clients dropped during delivery
    pub evicted: usize,
}

impl PublishResponse {
    fn new(id: Sequence, timestamp: Timestamp, delivered: usize, evicted: usize) -> Self {
        Self {
            id: id.to_string(),
            timestamp,
            delivered,
            evicted,
        }
    }
}

/// Broadcast an event, optionally scoped to a subject from the path.
pub fn handle_publish(
    broadcaster: &Broadcaster,
    subject_id: Option<SubjectId>,
    mut event: BroadcastEvent,
) -> Result<PublishResponse> {
    if event.event_type.trim().is_empty() {
        return Err(AppError::BadRequest("eventType is required".to_string()));
    }
    if let Some(subject_id) = subject_id {
        if subject_id.trim().is_empty() {
            return Err(AppError::BadRequest("subject id must not be blank".to_string()));
        }
        event = event.for_subject(subject_id);
    }

    let report = broadcaster.broadcast(event)?;
    Ok(PublishResponse::new(
        report.id,
        report.timestamp,
        report.delivered,
        report.evicted,
    ))
}
