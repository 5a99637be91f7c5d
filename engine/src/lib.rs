//! # Beacon Engine
//!
//! The shared core of Beacon, the order-state event synchronization system.
//!
//! This crate holds everything the broadcaster (server) and the connection
//! manager (client) must agree on: the event model, event-type
//! canonicalization, filter matching, the wire protocol, configuration,
//! metrics, backoff arithmetic and the persisted client state.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never touches sockets, files or timers
//! - **Explicit time**: every function that depends on "now" takes it as an argument
//! - **One matching rule**: server fan-out and client subscriptions share [`filter`]
//!
//! ## Core Concepts
//!
//! ### Events
//!
//! A [`SyncEvent`] is an immutable record of a state change observed by a
//! client. Its [`EventMetadata`] says where it came from ([`EventSource`]) and
//! whether the application has processed or acknowledged it.
//!
//! ### Event types
//!
//! Event types are free-form strings, but renamed types keep working through
//! the alias table in [`event_type`]. Both publish and match sites call
//! [`canonicalize`].
//!
//! ### Wire protocol
//!
//! The server pushes Server-Sent Events. [`protocol`] defines the frame
//! bodies (`connected`, `heartbeat`, named domain events), the SSE text
//! encoding and an incremental [`SseDecoder`].
//!
//! ### Persistence
//!
//! [`PersistedState`] is the versioned blob a client writes to durable
//! storage and restores on start, dropping events older than the retention
//! window.
//!
//! ## Quick Start
//!
//! ```rust
//! use beacon_engine::{ClientFilter, EventHistory, EventSource, SyncEvent};
//! use serde_json::json;
//!
//! let filter = ClientFilter::new(Some("ORD-1".into()), vec![String::from("stage_change")]);
//! assert!(filter.matches(Some("ORD-1"), "stage_changed")); // alias
//! assert!(!filter.matches(None, "stage_change"));
//!
//! let mut history = EventHistory::new(2);
//! for n in 0..3u64 {
//!     history.push(SyncEvent::new(
//!         format!("evt-{n}"),
//!         "stage_change",
//!         json!({"stage": n}),
//!         Some("ORD-1".into()),
//!         1_000 + n,
//!         EventSource::Push,
//!         1_000 + n,
//!     ));
//! }
//! assert_eq!(history.len(), 2);
//! assert_eq!(history.oldest().unwrap().id, "evt-1");
//! ```

pub mod backoff;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod event_type;
pub mod filter;
pub mod history;
pub mod metrics;
pub mod protocol;
pub mod snapshot;
pub mod state;

// Re-export main types at crate root
pub use backoff::{reconnect_delay, BackoffPolicy, MAX_RECONNECT_DELAY};
pub use clock::SequenceClock;
pub use config::{ConfigurationUpdate, SyncConfiguration};
pub use error::Error;
pub use event::{EventMetadata, EventSource, SyncEvent};
pub use event_type::{canonicalize, canonicalize_all, EVENT_TYPE_ALIASES};
pub use filter::{ClientFilter, SubscriptionFilter};
pub use history::EventHistory;
pub use metrics::ConnectionMetrics;
pub use protocol::{
    ConnectedFrame, EventFrame, HeartbeatFrame, InboundMessage, SseDecoder, SseFrame,
    CONNECTED_EVENT, HEARTBEAT_EVENT,
};
pub use snapshot::{PersistedState, RestoredState, DEFAULT_RETENTION_MS, PERSISTED_SCHEMA_VERSION};
pub use state::ConnectionState;

/// Type aliases for clarity
pub type EventId = String;
pub type SubjectId = String;
pub type ClientId = String;
pub type Sequence = u64;
/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;
