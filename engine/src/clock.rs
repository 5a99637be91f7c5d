//! Sequence clock for stamping broadcast events.
//!
//! The broadcaster stamps every event with a sequence number (the SSE `id`,
//! echoed back by clients as `lastEventId`) and a timestamp. Timestamps are
//! never allowed to go backwards, so a client observes a non-decreasing
//! stream even if the host clock is stepped.

use crate::{Sequence, Timestamp};
use serde::{Deserialize, Serialize};

/// A monotonic (sequence, timestamp) generator.
///
/// Ordering rules:
/// 1. Each call to [`SequenceClock::tick`] returns a strictly higher sequence
/// 2. The returned timestamp is never lower than any previously returned one
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceClock {
    /// Last issued sequence number (0 = none issued yet)
    pub sequence: Sequence,
    /// Last issued timestamp
    pub last_timestamp: Timestamp,
}

impl SequenceClock {
    /// Create a clock that has issued nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next (sequence, timestamp) pair for wall-clock time `now`.
    pub fn tick(&mut self, now: Timestamp) -> (Sequence, Timestamp) {
        self.sequence += 1;
        self.last_timestamp = self.last_timestamp.max(now);
        (self.sequence, self.last_timestamp)
    }

    /// Whether `sequence` was issued after `token`.
    ///
    /// Tokens that are not sequence numbers yield `None`.
    pub fn is_after(sequence: Sequence, token: &str) -> Option<bool> {
        token.trim().parse::<Sequence>().ok().map(|seen| sequence > seen)
    }
}
