//! Connection lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle state of a client's push connection.
///
/// Exactly one state is active at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    PollingFallback,
    Error,
}

impl ConnectionState {
    /// Whether data is currently flowing, by push or by polling.
    pub fn is_receiving(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::PollingFallback)
    }

    /// Whether a connection attempt is in flight or scheduled.
    pub fn is_transitional(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Reconnecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Reconnecting => "RECONNECTING",
            ConnectionState::PollingFallback => "POLLING_FALLBACK",
            ConnectionState::Error => "ERROR",
        };
        f.write_str(name)
    }
}
