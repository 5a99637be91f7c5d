//! Capped in-memory event buffer.
//!
//! The history holds the most recent events a client has observed, oldest
//! first. It never grows past its limit: appending to a full buffer evicts
//! from the front.

use crate::SyncEvent;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A bounded, insertion-ordered event buffer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventHistory {
    events: VecDeque<SyncEvent>,
    limit: usize,
}

impl EventHistory {
    /// Create an empty history holding at most `limit` events.
    pub fn new(limit: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(limit.min(1024)),
            limit,
        }
    }

    /// Maximum number of retained events.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Change the limit, evicting the oldest events if needed.
    ///
    /// Returns the number of evicted events.
    pub fn set_limit(&mut self, limit: usize) -> usize {
        self.limit = limit;
        self.trim()
    }

    /// Append an event, evicting the oldest ones beyond the limit.
    ///
    /// Returns the number of evicted events.
    pub fn push(&mut self, event: SyncEvent) -> usize {
        self.events.push_back(event);
        self.trim()
    }

    /// Append several events in order.
    pub fn extend<I: IntoIterator<Item = SyncEvent>>(&mut self, events: I) -> usize {
        events.into_iter().map(|e| self.push(e)).sum()
    }

    fn trim(&mut self) -> usize {
        let mut evicted = 0;
        while self.events.len() > self.limit {
            self.events.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Look up an event by id.
    pub fn get(&self, id: &str) -> Option<&SyncEvent> {
        self.events.iter().find(|e| e.id == id)
    }

    /// Mark an event as acknowledged. Returns false if it is not buffered.
    pub fn acknowledge(&mut self, id: &str) -> bool {
        match self.events.iter_mut().find(|e| e.id == id) {
            Some(event) => {
                event.metadata.acknowledged = true;
                true
            }
            None => false,
        }
    }

    /// Mark an event as fanned out to subscribers.
    pub fn mark_processed(&mut self, id: &str) -> bool {
        match self.events.iter_mut().rev().find(|e| e.id == id) {
            Some(event) => {
                event.metadata.processed = true;
                true
            }
            None => false,
        }
    }

    /// Events scoped to `subject_id`, oldest first.
    pub fn for_subject<'a>(&'a self, subject_id: &'a str) -> impl Iterator<Item = &'a SyncEvent> {
        self.events
            .iter()
            .filter(move |e| e.subject() == Some(subject_id))
    }

    /// All events, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &SyncEvent> {
        self.events.iter()
    }

    /// The most recent event.
    pub fn latest(&self) -> Option<&SyncEvent> {
        self.events.back()
    }

    /// The oldest retained event.
    pub fn oldest(&self) -> Option<&SyncEvent> {
        self.events.front()
    }

    /// Copy of the buffer, oldest first.
    pub fn to_vec(&self) -> Vec<SyncEvent> {
        self.events.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Drop every event, keeping the limit.
    pub fn clear(&mut self) {
        self.events.clear();
    }
}
