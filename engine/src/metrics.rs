//! Cumulative connection metrics.

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Counters a client accumulates over its lifetime.
///
/// Counters only grow; [`ConnectionMetrics::reset`] is reserved for an
/// explicit history clear.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionMetrics {
    pub total_connections: u64,
    pub total_events: u64,
    pub total_reconnects: u64,
    pub polling_sessions: u64,
    /// Cumulative time spent in polling fallback (milliseconds)
    #[serde(rename = "totalPollingTime")]
    pub total_polling_time_ms: u64,
    /// Events received per canonical event type
    pub event_type_counts: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connected_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_disconnected_at: Option<Timestamp>,
}

impl ConnectionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful connection.
    pub fn record_connected(&mut self, now: Timestamp, is_reconnect: bool) {
        self.total_connections += 1;
        if is_reconnect {
            self.total_reconnects += 1;
        }
        self.last_connected_at = Some(now);
    }

    pub fn record_disconnected(&mut self, now: Timestamp) {
        self.last_disconnected_at = Some(now);
    }

    pub fn record_event(&mut self, event_type: &str) {
        self.total_events += 1;
        *self
            .event_type_counts
            .entry(event_type.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_polling_started(&mut self) {
        self.polling_sessions += 1;
    }

    /// Add a finished polling session's duration.
    pub fn record_polling_time(&mut self, elapsed_ms: u64) {
        self.total_polling_time_ms = self.total_polling_time_ms.saturating_add(elapsed_ms);
    }

    /// Count for one event type.
    pub fn events_of_type(&self, event_type: &str) -> u64 {
        self.event_type_counts.get(event_type).copied().unwrap_or(0)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
