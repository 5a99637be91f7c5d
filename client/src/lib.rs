//! # Beacon Client
//!
//! The dashboard side of Beacon. A [`SyncClient`] keeps one Server-Sent
//! Events connection to the broadcaster and turns whatever arrives into a
//! bounded event history plus in-process notifications.
//!
//! When push is unavailable the client reconnects with exponential backoff.
//! After `maxReconnectAttempts` failures it switches to registered pollers
//! and keeps retrying push in the background. Each successful poll appears
//! to subscribers as a `refresh` event.
//!
//! ```no_run
//! use beacon_client::{MemoryStorage, SyncClient};
//! use beacon_engine::SubscriptionFilter;
//!
//! # async fn run() -> beacon_client::Result<()> {
//! let client = SyncClient::builder()
//!     .endpoint("http://localhost:3000/events")
//!     .storage(MemoryStorage::new())
//!     .build()
//!     .await?;
//!
//! let _orders = client.subscribe(SubscriptionFilter::all().subject("ORD-1"), |event| {
//!     println!("{} {}", event.event_type, event.payload);
//! });
//! client.register_poll("orders", || async { Ok::<(), beacon_client::BoxError>(()) });
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod fallback;
mod machine;
pub mod poller;
pub mod registry;
pub mod storage;
pub mod transport;

pub use client::{SyncClient, SyncClientBuilder, SyncStatus, UpdateOptions, DEFAULT_STORAGE_KEY};
pub use error::{BoxError, Error, Result, StorageError, TransportError};
pub use fallback::{FallbackMetrics, PollerId, PollerStatus, PollingFallbackEngine};
pub use machine::{HISTORY_RESTORED_EVENT, REFRESH_EVENT};
pub use poller::{poll_fn, PollFn, Poller, PollerOptions, PollerStats};
pub use registry::{SubscriptionHandle, SubscriptionId, SubscriptionRegistry};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use transport::{ConnectRequest, FrameStream, HttpTransport, Transport};
