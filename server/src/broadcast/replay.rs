//! Bounded replay log for `lastEventId` resumption.
//!
//! Only the last `capacity` events are kept, in memory. A client resuming
//! from a token older than the log simply gets what is left.

use std::collections::VecDeque;

use beacon_engine::{canonicalize, ClientFilter, EventFrame, Sequence, SequenceClock, SubjectId, Timestamp};

use super::{BroadcastError, BroadcastEvent, OutboundFrame};

/// A broadcast event as stored in the log.
#[derive(Debug, Clone)]
pub struct LoggedEvent {
    pub sequence: Sequence,
    pub timestamp: Timestamp,
    pub event_type: String,
    pub subject_id: Option<SubjectId>,
    pub frame: OutboundFrame,
}

/// Sequence clock plus the most recent serialized events.
#[derive(Debug)]
pub struct ReplayLog {
    clock: SequenceClock,
    entries: VecDeque<LoggedEvent>,
    capacity: usize,
}

impl ReplayLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            clock: SequenceClock::new(),
            entries: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Stamp, serialize and remember an event.
    pub fn record(&mut self, event: BroadcastEvent, now: Timestamp) -> Result<LoggedEvent, BroadcastError> {
        let event_type = canonicalize(&event.event_type);
        if event_type.is_empty() || event_type.chars().any(char::is_control) {
            return Err(BroadcastError::InvalidEventType(event.event_type));
        }
        let subject_id = event.subject_id.filter(|s| !s.trim().is_empty());

        let (sequence, timestamp) = self.clock.tick(now);
        let body = EventFrame {
            event_type: event_type.clone(),
            data: event.data,
            subject_id: subject_id.clone(),
            timestamp,
        };
        let logged = LoggedEvent {
            sequence,
            timestamp,
            event_type,
            subject_id,
            frame: OutboundFrame::event(sequence, &body)?,
        };

        if self.capacity > 0 {
            if self.entries.len() == self.capacity {
                self.entries.pop_front();
            }
            self.entries.push_back(logged.clone());
        }
        Ok(logged)
    }

    /// Frames after `token` that `filter` accepts, oldest first.
    ///
    /// Tokens that are not sequence numbers replay nothing.
    pub fn replay_after(&self, token: &str, filter: &ClientFilter) -> Vec<OutboundFrame> {
        self.entries
            .iter()
            .filter(|e| SequenceClock::is_after(e.sequence, token).unwrap_or(false))
            .filter(|e| filter.matches_canonical(e.subject_id.as_deref(), &e.event_type))
            .map(|e| e.frame.clone())
            .collect()
    }

    /// Last issued sequence number.
    pub fn last_sequence(&self) -> Sequence {
        self.clock.sequence
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
