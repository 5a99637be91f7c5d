//! Configuration management for the server.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Clients silent for longer than this are swept
    pub idle_timeout: Duration,
    /// Period of the stale-client sweep
    pub sweep_interval: Duration,
    /// Period of heartbeat frames
    pub heartbeat_interval: Duration,
    /// `retry:` hint sent with the `connected` frame
    pub sse_retry: Duration,
    /// Frames buffered per client before it counts as dead
    pub client_buffer: usize,
    /// Events kept for `lastEventId` resumption
    pub replay_capacity: usize,
    /// Concurrent stream limit
    pub max_clients: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            idle_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(30),
            sse_retry: Duration::from_millis(5_000),
            client_buffer: 64,
            replay_capacity: 256,
            max_clients: 10_000,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let host = env::var("HOST").unwrap_or(defaults.host);
        let port = parse_var("PORT")?.unwrap_or(defaults.port);

        let idle_timeout = parse_var("IDLE_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.idle_timeout);
        let sweep_interval = parse_var("SWEEP_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.sweep_interval);
        let heartbeat_interval = parse_var("HEARTBEAT_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.heartbeat_interval);
        let sse_retry = parse_var("SSE_RETRY_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.sse_retry);

        let client_buffer = parse_var("CLIENT_BUFFER")?.unwrap_or(defaults.client_buffer);
        let replay_capacity = parse_var("REPLAY_CAPACITY")?.unwrap_or(defaults.replay_capacity);
        let max_clients = parse_var("MAX_CLIENTS")?.unwrap_or(defaults.max_clients);

        if sweep_interval.is_zero() {
            return Err(ConfigError::Invalid("SWEEP_INTERVAL_SECS"));
        }
        if heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid("HEARTBEAT_INTERVAL_SECS"));
        }
        if client_buffer == 0 {
            return Err(ConfigError::Invalid("CLIENT_BUFFER"));
        }

        Ok(Self {
            host,
            port,
            idle_timeout,
            sweep_interval,
            heartbeat_interval,
            sse_retry,
            client_buffer,
            replay_capacity,
            max_clients,
        })
    }
}

/// Read and parse an optional variable.
fn parse_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(None),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}")]
    Invalid(&'static str),
}
