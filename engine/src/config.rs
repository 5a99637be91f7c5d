//! Client sync configuration.

use crate::{canonicalize_all, ClientFilter, SubjectId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration owned by a client's connection state machine.
///
/// Durations are kept in milliseconds so the structure persists as plain
/// JSON. Unknown fields are ignored and missing fields take their defaults,
/// which lets older persisted blobs load into newer builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfiguration {
    /// Server-side subject filter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_filter: Option<SubjectId>,
    /// Server-side event-type filter (canonical names)
    pub event_type_filter: Vec<String>,
    /// Connect as soon as the client is built
    pub auto_connect: bool,
    /// Retry after transport errors
    pub auto_reconnect: bool,
    /// Retries before giving up on push
    pub max_reconnect_attempts: u32,
    /// Base of the exponential reconnect delay
    #[serde(rename = "reconnectBaseDelay")]
    pub reconnect_base_delay_ms: u64,
    /// Interval of fallback pollers
    #[serde(rename = "pollingInterval")]
    pub polling_interval_ms: u64,
    /// How often to try push again while polling
    #[serde(rename = "sseRetryInterval")]
    pub sse_retry_interval_ms: u64,
    /// How long an opened stream may go without its `connected` frame (0 disables)
    #[serde(rename = "connectTimeout")]
    pub connect_timeout_ms: u64,
    /// Switch to polling once retries are exhausted
    pub enable_polling_fallback: bool,
    /// Capacity of the in-memory event buffer
    pub event_history_limit: usize,
}

impl Default for SyncConfiguration {
    fn default() -> Self {
        Self {
            subject_filter: None,
            event_type_filter: Vec::new(),
            auto_connect: true,
            auto_reconnect: true,
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 1_000,
            polling_interval_ms: 15_000,
            sse_retry_interval_ms: 120_000,
            connect_timeout_ms: 10_000,
            enable_polling_fallback: true,
            event_history_limit: 100,
        }
    }
}

impl SyncConfiguration {
    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn sse_retry_interval(&self) -> Duration {
        Duration::from_millis(self.sse_retry_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// The filter to send to the server.
    pub fn client_filter(&self) -> ClientFilter {
        ClientFilter::new(self.subject_filter.clone(), &self.event_type_filter)
    }

    /// Merge a partial update.
    ///
    /// Returns whether the server-side filter changed by value.
    pub fn apply(&mut self, update: ConfigurationUpdate) -> bool {
        let before = self.client_filter();

        if let Some(subject) = update.subject_filter {
            self.subject_filter = subject;
        }
        if let Some(types) = update.event_type_filter {
            self.event_type_filter = canonicalize_all(types);
        }
        if let Some(v) = update.auto_connect {
            self.auto_connect = v;
        }
        if let Some(v) = update.auto_reconnect {
            self.auto_reconnect = v;
        }
        if let Some(v) = update.max_reconnect_attempts {
            self.max_reconnect_attempts = v;
        }
        if let Some(v) = update.reconnect_base_delay {
            self.reconnect_base_delay_ms = millis(v);
        }
        if let Some(v) = update.polling_interval {
            self.polling_interval_ms = millis(v);
        }
        if let Some(v) = update.sse_retry_interval {
            self.sse_retry_interval_ms = millis(v);
        }
        if let Some(v) = update.connect_timeout {
            self.connect_timeout_ms = millis(v);
        }
        if let Some(v) = update.enable_polling_fallback {
            self.enable_polling_fallback = v;
        }
        if let Some(v) = update.event_history_limit {
            self.event_history_limit = v;
        }

        !same_filter(&before, &self.client_filter())
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Order-insensitive filter comparison.
fn same_filter(a: &ClientFilter, b: &ClientFilter) -> bool {
    let mut a_types = a.event_types.clone();
    let mut b_types = b.event_types.clone();
    a_types.sort();
    b_types.sort();
    a.subject_id == b.subject_id && a_types == b_types
}

/// A partial configuration; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigurationUpdate {
    /// `Some(None)` clears the subject filter
    pub subject_filter: Option<Option<SubjectId>>,
    pub event_type_filter: Option<Vec<String>>,
    pub auto_connect: Option<bool>,
    pub auto_reconnect: Option<bool>,
    pub max_reconnect_attempts: Option<u32>,
    pub reconnect_base_delay: Option<Duration>,
    pub polling_interval: Option<Duration>,
    pub sse_retry_interval: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub enable_polling_fallback: Option<bool>,
    pub event_history_limit: Option<usize>,
}

impl ConfigurationUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subject(mut self, subject: Option<SubjectId>) -> Self {
        self.subject_filter = Some(subject);
        self
    }

    pub fn event_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_type_filter = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = Some(interval);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = Some(enabled);
        self
    }

    pub fn enable_polling_fallback(mut self, enabled: bool) -> Self {
        self.enable_polling_fallback = Some(enabled);
        self
    }

    pub fn event_history_limit(mut self, limit: usize) -> Self {
        self.event_history_limit = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_surface() {
        let config = SyncConfiguration::default();
        assert!(config.auto_connect);
        assert!(config.auto_reconnect);
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_base_delay(), Duration::from_millis(1_000));
        assert_eq!(config.polling_interval(), Duration::from_millis(15_000));
        assert_eq!(config.sse_retry_interval(), Duration::from_millis(120_000));
        assert_eq!(config.connect_timeout(), Duration::from_millis(10_000));
        assert!(config.enable_polling_fallback);
        assert_eq!(config.event_history_limit, 100);
    }

    #[test]
    fn wire_names() {
        let json = serde_json::to_value(SyncConfiguration::default()).unwrap();
        assert_eq!(json["reconnectBaseDelay"], 1_000);
        assert_eq!(json["pollingInterval"], 15_000);
        assert_eq!(json["sseRetryInterval"], 120_000);
        assert_eq!(json["connectTimeout"], 10_000);
        assert_eq!(json["eventHistoryLimit"], 100);
        assert!(json.get("subjectFilter").is_none());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: SyncConfiguration =
            serde_json::from_str(r#"{"subjectFilter":"ORD-1","futureField":true}"#).unwrap();
        assert_eq!(config.subject_filter.as_deref(), Some("ORD-1"));
        assert_eq!(config.max_reconnect_attempts, 5);
    }

    #[test]
    fn unrelated_update_does_not_change_filter() {
        let mut config = SyncConfiguration::default();
        let changed = config.apply(ConfigurationUpdate::new().polling_interval(Duration::from_secs(5)));
        assert!(!changed);
        assert_eq!(config.polling_interval_ms, 5_000);
    }

    #[test]
    fn filter_change_is_by_value() {
        let mut config = SyncConfiguration::default();
        assert!(config.apply(ConfigurationUpdate::new().subject(Some("ORD-1".into()))));
        assert!(!config.apply(ConfigurationUpdate::new().subject(Some("ORD-1".into()))));

        assert!(config.apply(ConfigurationUpdate::new().event_types(["stage_change", "new_order"])));
        // Same set in another order, one spelled with an alias.
        assert!(!config.apply(ConfigurationUpdate::new().event_types(["order_created", "stage_changed"])));

        assert!(config.apply(ConfigurationUpdate::new().subject(None)));
        assert_eq!(config.subject_filter, None);
    }
}
