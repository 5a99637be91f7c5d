//! The public client handle and its builder.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use beacon_engine::{
    canonicalize, ClientId, ConfigurationUpdate, ConnectionMetrics, ConnectionState, EventSource,
    SubjectId, SubscriptionFilter, SyncConfiguration, SyncEvent, DEFAULT_RETENTION_MS,
};
use serde::Serialize;
use tokio::sync::watch;

use crate::error::{BoxError, Error, Result};
use crate::fallback::{FallbackMetrics, PollerId, PollingFallbackEngine};
use crate::machine::{local_event_id, now_ms, Machine, Persistence, Shared};
use crate::poller::{poll_fn, PollerOptions};
use crate::registry::{SubscriptionHandle, SubscriptionRegistry};
use crate::storage::Storage;
use crate::transport::{HttpTransport, Transport};

/// Storage key used when none is configured.
pub const DEFAULT_STORAGE_KEY: &str = "beacon-sync";

type BoxedCallback = Box<dyn Fn(&SyncEvent) + Send + Sync>;

/// Options for [`SyncClient::update_configuration`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Restart the connection even if the filter did not change.
    pub reconnect: bool,
}

/// Point-in-time view of the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: ConnectionState,
    pub error: Option<String>,
    pub reconnect_attempts: u32,
    pub client_id: Option<ClientId>,
    pub last_event_id: Option<String>,
    pub is_polling_fallback: bool,
}

/// Connection manager for one dashboard.
///
/// Holds a single push connection, falls back to registered pollers when push
/// is unavailable, buffers received events and fans them out to in-process
/// subscribers. Clones share the same connection.
///
/// Use one client per storage key: two clients writing the same key
/// overwrite each other's persisted state.
#[derive(Clone)]
pub struct SyncClient {
    shared: Arc<Shared>,
}

impl fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncClient")
            .field("status", &self.status())
            .finish()
    }
}

impl SyncClient {
    pub fn builder() -> SyncClientBuilder {
        SyncClientBuilder::default()
    }

    /// Open the push connection. No-op unless DISCONNECTED or ERROR.
    ///
    /// Returns whether a connection attempt was started.
    pub fn connect(&self) -> bool {
        self.shared.connect()
    }

    /// Close everything: the connection, pending reconnects, the push retry
    /// timer and all pollers. Nothing fires afterwards.
    pub async fn disconnect(&self) {
        self.shared.disconnect().await;
    }

    /// Merge a partial configuration.
    ///
    /// A changed subject or event-type filter restarts an open connection so
    /// the server sees it; `options.reconnect` forces the restart. Other
    /// fields take effect at their next use. Returns whether the connection
    /// was restarted.
    pub async fn update_configuration(&self, update: ConfigurationUpdate, options: UpdateOptions) -> bool {
        let restarted = {
            let mut m = self.shared.machine.lock();
            let interval_before = m.config.polling_interval_ms;
            let filter_changed = m.config.apply(update);

            let limit = m.config.event_history_limit;
            let evicted = m.history.set_limit(limit);
            if evicted > 0 {
                tracing::debug!(evicted, limit, "History trimmed to new limit");
            }
            if m.config.polling_interval_ms != interval_before {
                self.shared.fallback.set_interval(m.config.polling_interval());
            }

            let restart = (filter_changed || options.reconnect) && m.state == ConnectionState::Connected;
            if restart {
                tracing::info!(filter_changed, "Restarting connection with updated configuration");
                self.shared.restart_connection(&mut m);
            }
            restart
        };
        self.shared.persist().await;
        restarted
    }

    /// Register a poll callback run while push is unavailable.
    ///
    /// Every successful poll appends a `refresh` event (source
    /// [`EventSource::Poll`]) so subscribers learn they should re-fetch.
    pub fn register_poll<F, Fut>(&self, name: impl Into<String>, callback: F) -> PollerId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        let options = self.shared.poller_options.clone();
        self.register_poll_with(name, options, callback)
    }

    pub fn register_poll_with<F, Fut>(
        &self,
        name: impl Into<String>,
        options: PollerOptions,
        callback: F,
    ) -> PollerId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        let name = name.into();
        let label = name.clone();
        let shared = Arc::downgrade(&self.shared);
        let callback = Arc::new(callback);

        let wrapped = poll_fn(move || {
            let shared = shared.clone();
            let callback = callback.clone();
            let label = label.clone();
            async move {
                (*callback)().await?;
                if let Some(shared) = shared.upgrade() {
                    shared.on_poll_success(&label).await;
                }
                Ok::<(), BoxError>(())
            }
        });

        let (interval, polling) = {
            let m = self.shared.machine.lock();
            (m.config.polling_interval(), m.state == ConnectionState::PollingFallback)
        };
        let id = self.shared.fallback.register_boxed(name, interval, options, wrapped);
        if polling {
            self.shared.fallback.start(Some(id));
        }
        id
    }

    pub fn unregister_poll(&self, id: PollerId) -> bool {
        self.shared.fallback.unregister(id)
    }

    /// Subscribe to received events. Dropping the handle unsubscribes.
    pub fn subscribe<F>(&self, filter: SubscriptionFilter, callback: F) -> SubscriptionHandle
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.shared.registry.subscribe(filter, callback)
    }

    /// Record and deliver an application-originated event.
    pub async fn publish_local(
        &self,
        event_type: &str,
        payload: serde_json::Value,
        subject_id: Option<SubjectId>,
    ) -> SyncEvent {
        let event = {
            let mut m = self.shared.machine.lock();
            let now = now_ms();
            let event = SyncEvent::new(
                local_event_id(),
                canonicalize(event_type),
                payload,
                subject_id.filter(|s| !s.trim().is_empty()),
                now,
                EventSource::Manual,
                now,
            );
            m.record(event.clone());
            event
        };
        self.shared.deliver(&event).await;
        event
    }

    /// Mark a buffered event as acknowledged. Returns false if it is not buffered.
    pub async fn acknowledge_event(&self, id: &str) -> bool {
        let found = self.shared.machine.lock().history.acknowledge(id);
        if found {
            self.shared.persist().await;
        }
        found
    }

    /// Drop all buffered events and reset the metrics.
    pub async fn clear_event_history(&self) {
        {
            let mut m = self.shared.machine.lock();
            m.history.clear();
            m.metrics.reset();
        }
        self.shared.persist().await;
    }

    /// Write the current state to storage now.
    ///
    /// Unlike the save that follows every mutation, failures are returned
    /// instead of logged.
    pub async fn flush(&self) -> Result<()> {
        self.shared.try_persist().await
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.machine.lock().state
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.watch_state()
    }

    pub fn status(&self) -> SyncStatus {
        let m = self.shared.machine.lock();
        SyncStatus {
            state: m.state,
            error: m.error.clone(),
            reconnect_attempts: m.reconnect_attempts,
            client_id: m.client_id.clone(),
            last_event_id: m.last_event_id.clone(),
            is_polling_fallback: m.state == ConnectionState::PollingFallback,
        }
    }

    pub fn error(&self) -> Option<String> {
        self.shared.machine.lock().error.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_polling_fallback(&self) -> bool {
        self.state() == ConnectionState::PollingFallback
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.machine.lock().reconnect_attempts
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.shared.machine.lock().client_id.clone()
    }

    pub fn last_event_id(&self) -> Option<String> {
        self.shared.machine.lock().last_event_id.clone()
    }

    pub fn configuration(&self) -> SyncConfiguration {
        self.shared.machine.lock().config.clone()
    }

    pub fn metrics(&self) -> ConnectionMetrics {
        self.shared.machine.lock().metrics.clone()
    }

    /// Buffered events, oldest first.
    pub fn events(&self) -> Vec<SyncEvent> {
        self.shared.machine.lock().history.to_vec()
    }

    pub fn events_for_subject(&self, subject_id: &str) -> Vec<SyncEvent> {
        self.shared
            .machine
            .lock()
            .history
            .for_subject(subject_id)
            .cloned()
            .collect()
    }

    pub fn last_event(&self) -> Option<SyncEvent> {
        self.shared.machine.lock().history.latest().cloned()
    }

    pub fn fallback(&self) -> &PollingFallbackEngine {
        &self.shared.fallback
    }

    pub fn fallback_metrics(&self) -> FallbackMetrics {
        self.shared.fallback.metrics()
    }
}

/// Builds a [`SyncClient`], restoring persisted state first.
pub struct SyncClientBuilder {
    configuration: SyncConfiguration,
    transport: Option<Arc<dyn Transport>>,
    endpoint: Option<String>,
    storage: Option<Arc<dyn Storage>>,
    storage_key: String,
    retention: Duration,
    poller_options: PollerOptions,
    subscriptions: Vec<(SubscriptionFilter, BoxedCallback)>,
}

impl Default for SyncClientBuilder {
    fn default() -> Self {
        Self {
            configuration: SyncConfiguration::default(),
            transport: None,
            endpoint: None,
            storage: None,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            retention: Duration::from_millis(DEFAULT_RETENTION_MS),
            poller_options: PollerOptions::default(),
            subscriptions: Vec::new(),
        }
    }
}

impl SyncClientBuilder {
    /// Initial configuration. Replaced by the persisted one, if any.
    pub fn configuration(mut self, configuration: SyncConfiguration) -> Self {
        self.configuration = configuration;
        self
    }

    /// Connect over HTTP to the stream endpoint at `url`.
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = Some(url.into());
        self
    }

    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn storage(mut self, storage: impl Storage + 'static) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    pub fn storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    /// Maximum age of restored events.
    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Defaults for pollers registered with [`SyncClient::register_poll`].
    pub fn poller_options(mut self, options: PollerOptions) -> Self {
        self.poller_options = options;
        self
    }

    /// Subscribe before restore so the `history_restored` notice is seen.
    pub fn subscribe<F>(mut self, filter: SubscriptionFilter, callback: F) -> Self
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.subscriptions.push((filter, Box::new(callback)));
        self
    }

    pub async fn build(self) -> Result<SyncClient> {
        let transport: Arc<dyn Transport> = match (self.transport, self.endpoint) {
            (Some(transport), _) => transport,
            (None, Some(url)) => Arc::new(HttpTransport::new(&url)?),
            (None, None) => {
                return Err(Error::Configuration(
                    "either a transport or an endpoint is required".to_string(),
                ))
            }
        };

        let persistence = self
            .storage
            .map(|storage| Persistence::new(storage, self.storage_key));
        let restored = match &persistence {
            Some(p) => p.restore(self.retention).await,
            None => None,
        };
        let notice = restored.as_ref().map(|r| {
            Shared::history_restored_event(r.events.len(), r.discarded, r.last_event_id.as_deref())
        });

        let registry = SubscriptionRegistry::new();
        for (filter, callback) in self.subscriptions {
            registry.subscribe(filter, callback).detach();
        }

        let machine = Machine::new(self.configuration, restored);
        let auto_connect = machine.config.auto_connect;
        let shared = Arc::new(Shared::new(
            machine,
            registry,
            transport,
            persistence,
            self.poller_options,
        ));
        let client = SyncClient { shared };

        if let Some(notice) = notice {
            tracing::info!(
                restored = client.shared.machine.lock().history.len(),
                payload = %notice.payload,
                "Restored persisted sync state"
            );
            client.shared.registry.notify(&notice);
        }

        if auto_connect {
            client.connect();
        }
        Ok(client)
    }
}
