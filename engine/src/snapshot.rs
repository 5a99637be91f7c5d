//! Persisted client state.
//!
//! A [`PersistedState`] is the bridge between a client's in-memory state and
//! durable storage. It is written after every meaningful change and read once
//! at start-up. Events older than the retention window are dropped on
//! restore so they are never replayed as current; the resumption token is
//! always kept because it only tells the server where the stream left off.

use crate::{
    error::Result, ConnectionMetrics, Error, EventHistory, SyncConfiguration, SyncEvent, Timestamp,
};
use serde::{Deserialize, Serialize};

/// Version of the persisted layout, `major.minor`.
///
/// Minor bumps only add optional fields; a major bump is not readable by
/// older builds.
pub const PERSISTED_SCHEMA_VERSION: &str = "1.0";

/// Events older than this (milliseconds) are discarded on restore.
pub const DEFAULT_RETENTION_MS: u64 = 60 * 60 * 1000;

/// The blob stored per sync session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedState {
    /// Layout version
    pub schema_version: String,
    /// Buffered events, oldest first
    pub events: Vec<SyncEvent>,
    /// Configuration at save time
    pub configuration: SyncConfiguration,
    /// When the client last reached CONNECTED
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connection_time: Option<Timestamp>,
    pub connection_metrics: ConnectionMetrics,
    /// Resumption token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_id: Option<String>,
    /// When the blob was written
    pub saved_at: Timestamp,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            schema_version: PERSISTED_SCHEMA_VERSION.to_string(),
            events: Vec::new(),
            configuration: SyncConfiguration::default(),
            last_connection_time: None,
            connection_metrics: ConnectionMetrics::default(),
            last_event_id: None,
            saved_at: 0,
        }
    }
}

/// What a client gets back from a persisted blob.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoredState {
    /// Events inside the retention window, oldest first
    pub events: Vec<SyncEvent>,
    pub configuration: SyncConfiguration,
    pub connection_metrics: ConnectionMetrics,
    pub last_event_id: Option<String>,
    pub last_connection_time: Option<Timestamp>,
    /// Number of events dropped for age
    pub discarded: usize,
}

impl PersistedState {
    /// Capture the current client state.
    pub fn capture(
        history: &EventHistory,
        configuration: &SyncConfiguration,
        metrics: &ConnectionMetrics,
        last_event_id: Option<&str>,
        last_connection_time: Option<Timestamp>,
        now: Timestamp,
    ) -> Self {
        let skip = history.len().saturating_sub(configuration.event_history_limit);
        Self {
            schema_version: PERSISTED_SCHEMA_VERSION.to_string(),
            events: history.iter().skip(skip).cloned().collect(),
            configuration: configuration.clone(),
            last_connection_time,
            connection_metrics: metrics.clone(),
            last_event_id: last_event_id.map(str::to_string),
            saved_at: now,
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON, rejecting layouts from a newer major version.
    pub fn from_json(json: &str) -> Result<Self> {
        let state: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        let major = state
            .schema_version
            .split('.')
            .next()
            .and_then(|m| m.trim().parse::<u32>().ok())
            .ok_or_else(|| Error::UnsupportedSchemaVersion(state.schema_version.clone()))?;
        if major > supported_major() {
            return Err(Error::UnsupportedSchemaVersion(state.schema_version));
        }

        Ok(state)
    }

    /// Split into restorable parts, dropping events older than `retention_ms`.
    pub fn restore(self, now: Timestamp, retention_ms: u64) -> RestoredState {
        let total = self.events.len();
        let events: Vec<SyncEvent> = self
            .events
            .into_iter()
            .filter(|e| !e.is_older_than(retention_ms, now))
            .collect();

        RestoredState {
            discarded: total - events.len(),
            events,
            configuration: self.configuration,
            connection_metrics: self.connection_metrics,
            last_event_id: self.last_event_id,
            last_connection_time: self.last_connection_time,
        }
    }
}

fn supported_major() -> u32 {
    PERSISTED_SCHEMA_VERSION
        .split('.')
        .next()
        .and_then(|m| m.parse().ok())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventSource;
    use serde_json::json;

    const HOUR: u64 = DEFAULT_RETENTION_MS;

    fn event(id: &str, timestamp: Timestamp) -> SyncEvent {
        SyncEvent::new(
            id,
            "stage_change",
            json!({"stage": "assembly", "notes": ["a", "b"]}),
            Some("ORD-1".into()),
            timestamp,
            EventSource::Push,
            timestamp + 3,
        )
    }

    fn sample_state(now: Timestamp) -> PersistedState {
        let mut history = EventHistory::new(10);
        history.push(event("1", now - 2 * HOUR));
        history.push(event("2", now - HOUR / 2));
        history.push(event("3", now - 1_000));
        let mut metrics = ConnectionMetrics::new();
        metrics.record_connected(now - 5_000, false);
        metrics.record_event("stage_change");

        PersistedState::capture(
            &history,
            &SyncConfiguration::default(),
            &metrics,
            Some("3"),
            Some(now - 5_000),
            now,
        )
    }

    #[test]
    fn json_roundtrip() {
        let now = 10 * HOUR;
        let state = sample_state(now);
        let json = state.to_json().unwrap();
        let restored = PersistedState::from_json(&json).unwrap();
        assert_eq!(state, restored);
        assert!(json.contains(r#""schemaVersion":"1.0""#));
        assert!(json.contains(r#""lastEventId":"3""#));
    }

    #[test]
    fn restore_drops_stale_events_but_keeps_token() {
        let now = 10 * HOUR;
        let json = sample_state(now).to_json().unwrap();
        let restored = PersistedState::from_json(&json).unwrap().restore(now, HOUR);

        let ids: Vec<_> = restored.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3"]);
        assert_eq!(restored.discarded, 1);
        assert_eq!(restored.last_event_id.as_deref(), Some("3"));
        assert_eq!(restored.connection_metrics.total_events, 1);
    }

    #[test]
    fn token_survives_even_when_every_event_expired() {
        let now = 10 * HOUR;
        let state = sample_state(now);
        let restored = state.restore(now + 5 * HOUR, HOUR);
        assert!(restored.events.is_empty());
        assert_eq!(restored.last_event_id.as_deref(), Some("3"));
    }

    #[test]
    fn restored_events_equal_originals() {
        let now = 10 * HOUR;
        let state = sample_state(now);
        let originals = state.events.clone();
        let json = state.to_json().unwrap();
        let restored = PersistedState::from_json(&json).unwrap().restore(now, HOUR);
        for restored_event in &restored.events {
            let original = originals.iter().find(|e| e.id == restored_event.id).unwrap();
            assert!(original.same_content(restored_event));
            assert_eq!(
                serde_json::to_vec(original).unwrap(),
                serde_json::to_vec(restored_event).unwrap()
            );
        }
    }

    #[test]
    fn capture_respects_history_limit() {
        let mut history = EventHistory::new(10);
        for n in 0..6 {
            history.push(event(&n.to_string(), 1_000 + n));
        }
        let config = SyncConfiguration {
            event_history_limit: 2,
            ..SyncConfiguration::default()
        };
        let state =
            PersistedState::capture(&history, &config, &ConnectionMetrics::new(), None, None, 0);
        let ids: Vec<_> = state.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["4", "5"]);
    }

    #[test]
    fn minor_versions_and_missing_fields_load() {
        let state = PersistedState::from_json(r#"{"schemaVersion":"1.7","lastEventId":"9"}"#).unwrap();
        assert_eq!(state.last_event_id.as_deref(), Some("9"));
        assert!(state.events.is_empty());
    }

    #[test]
    fn reject_future_major_version() {
        let result = PersistedState::from_json(r#"{"schemaVersion":"2.0"}"#);
        assert!(matches!(result, Err(Error::UnsupportedSchemaVersion(_))));

        let result = PersistedState::from_json(r#"{"schemaVersion":"banana"}"#);
        assert!(matches!(result, Err(Error::UnsupportedSchemaVersion(_))));
    }

    #[test]
    fn reject_garbage() {
        assert!(matches!(
            PersistedState::from_json("not json"),
            Err(Error::InvalidSnapshot(_))
        ));
    }
}
