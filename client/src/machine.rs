//! Connection state machine internals.
//!
//! All state lives in one [`Machine`] behind a mutex. Transport callbacks,
//! timers and pollers run as tokio tasks holding only a `Weak` to the shared
//! state, and every callback re-checks, under the lock, that it still
//! belongs to the current connection or timer epoch. That makes anything
//! arriving after `disconnect()` (or after a superseding transition) a no-op.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use beacon_engine::{
    reconnect_delay, ClientId, ConnectedFrame, ConnectionMetrics, ConnectionState, EventFrame,
    EventHistory, EventSource, InboundMessage, PersistedState, RestoredState, SseFrame,
    SyncConfiguration, SyncEvent, Timestamp,
};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{Result, TransportError};
use crate::fallback::PollingFallbackEngine;
use crate::poller::PollerOptions;
use crate::registry::SubscriptionRegistry;
use crate::storage::Storage;
use crate::transport::{ConnectRequest, Transport};

/// Event type synthesized after each successful poll.
pub const REFRESH_EVENT: &str = "refresh";

/// Event type of the notification emitted after restoring persisted state.
pub const HISTORY_RESTORED_EVENT: &str = "history_restored";

struct Connection {
    id: u64,
    task: JoinHandle<()>,
}

/// What the reader loop does after handing over a frame.
enum FrameOutcome {
    /// The connection was superseded; stop reading.
    Stale,
    Continue,
    /// The server acknowledged the connection.
    Acknowledged,
}

/// Timers owned by the machine. `clear` cancels both and invalidates any
/// timer that already fired but has not taken the lock yet.
#[derive(Default)]
struct Timers {
    reconnect: Option<JoinHandle<()>>,
    sse_retry: Option<JoinHandle<()>>,
    epoch: u64,
}

impl Timers {
    fn clear(&mut self) {
        if let Some(t) = self.reconnect.take() {
            t.abort();
        }
        if let Some(t) = self.sse_retry.take() {
            t.abort();
        }
        self.epoch += 1;
    }
}

pub(crate) struct Machine {
    pub(crate) config: SyncConfiguration,
    pub(crate) state: ConnectionState,
    pub(crate) error: Option<String>,
    pub(crate) reconnect_attempts: u32,
    pub(crate) history: EventHistory,
    pub(crate) metrics: ConnectionMetrics,
    pub(crate) last_event_id: Option<String>,
    pub(crate) last_connection_time: Option<Timestamp>,
    pub(crate) client_id: Option<ClientId>,
    connection: Option<Connection>,
    next_connection_id: u64,
    timers: Timers,
    polling_since: Option<Timestamp>,
}

impl Machine {
    pub(crate) fn new(config: SyncConfiguration, restored: Option<RestoredState>) -> Self {
        let mut machine = Self {
            history: EventHistory::new(config.event_history_limit),
            config,
            state: ConnectionState::Disconnected,
            error: None,
            reconnect_attempts: 0,
            metrics: ConnectionMetrics::default(),
            last_event_id: None,
            last_connection_time: None,
            client_id: None,
            connection: None,
            next_connection_id: 0,
            timers: Timers::default(),
            polling_since: None,
        };

        if let Some(restored) = restored {
            machine.config = restored.configuration;
            machine.history.set_limit(machine.config.event_history_limit);
            machine.history.extend(restored.events);
            machine.metrics = restored.connection_metrics;
            machine.last_event_id = restored.last_event_id;
            machine.last_connection_time = restored.last_connection_time;
        }
        machine
    }

    fn is_current(&self, connection_id: u64) -> bool {
        self.connection.as_ref().is_some_and(|c| c.id == connection_id)
    }

    fn close_connection(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.task.abort();
        }
    }

    fn finish_polling(&mut self, now: Timestamp) {
        if let Some(since) = self.polling_since.take() {
            self.metrics.record_polling_time(now.saturating_sub(since));
        }
    }

    fn connect_request(&self) -> ConnectRequest {
        ConnectRequest {
            subject_id: self.config.subject_filter.clone(),
            event_types: self.config.event_type_filter.clone(),
            last_event_id: self.last_event_id.clone(),
        }
    }

    /// Append to the buffer and count it.
    pub(crate) fn record(&mut self, event: SyncEvent) {
        self.metrics.record_event(&event.event_type);
        let evicted = self.history.push(event);
        if evicted > 0 {
            tracing::trace!(evicted, "Event history at capacity");
        }
    }
}

pub(crate) struct Persistence {
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) key: String,
    /// Orders saves so an older snapshot never overwrites a newer one.
    write_lock: tokio::sync::Mutex<()>,
}

impl Persistence {
    pub(crate) fn new(storage: Arc<dyn Storage>, key: String) -> Self {
        Self {
            storage,
            key,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Load and age-filter the persisted blob. Unreadable state is logged and
    /// treated as absent.
    pub(crate) async fn restore(&self, retention: Duration) -> Option<RestoredState> {
        let raw = match self.storage.load(&self.key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Failed to load persisted sync state");
                return None;
            }
        };

        match PersistedState::from_json(&raw) {
            Ok(state) => {
                let retention_ms = u64::try_from(retention.as_millis()).unwrap_or(u64::MAX);
                Some(state.restore(now_ms(), retention_ms))
            }
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Ignoring unreadable persisted sync state");
                None
            }
        }
    }
}

pub(crate) struct Shared {
    pub(crate) machine: Mutex<Machine>,
    pub(crate) registry: SubscriptionRegistry,
    pub(crate) fallback: PollingFallbackEngine,
    pub(crate) poller_options: PollerOptions,
    transport: Arc<dyn Transport>,
    persistence: Option<Persistence>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Shared {
    pub(crate) fn new(
        machine: Machine,
        registry: SubscriptionRegistry,
        transport: Arc<dyn Transport>,
        persistence: Option<Persistence>,
        poller_options: PollerOptions,
    ) -> Self {
        let (state_tx, _) = watch::channel(machine.state);
        Self {
            machine: Mutex::new(machine),
            registry,
            fallback: PollingFallbackEngine::new(),
            poller_options,
            transport,
            persistence,
            state_tx,
        }
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, m: &mut Machine, state: ConnectionState) {
        if m.state != state {
            tracing::debug!(from = %m.state, to = %state, "Connection state changed");
            m.state = state;
            self.state_tx.send_replace(state);
        }
    }

    /// DISCONNECTED/ERROR → CONNECTING. Ignored in any other state.
    pub(crate) fn connect(self: &Arc<Self>) -> bool {
        let mut m = self.machine.lock();
        if !matches!(m.state, ConnectionState::Disconnected | ConnectionState::Error) {
            tracing::debug!(state = %m.state, "connect() ignored");
            return false;
        }
        m.timers.clear();
        m.reconnect_attempts = 0;
        m.error = None;
        self.set_state(&mut m, ConnectionState::Connecting);
        self.open_connection(&mut m);
        true
    }

    /// Any state → DISCONNECTED with nothing left running.
    pub(crate) async fn disconnect(&self) {
        {
            let mut m = self.machine.lock();
            m.timers.clear();
            m.close_connection();
            let stopped = self.fallback.stop(None);

            let now = now_ms();
            m.finish_polling(now);
            if m.state == ConnectionState::Connected {
                m.metrics.record_disconnected(now);
            }
            m.reconnect_attempts = 0;
            m.client_id = None;
            m.error = None;
            self.set_state(&mut m, ConnectionState::Disconnected);
            tracing::info!(pollers_stopped = stopped, "Disconnected");
        }
        self.persist().await;
    }

    /// Restart the connection so the server sees the current filter.
    pub(crate) fn restart_connection(self: &Arc<Self>, m: &mut Machine) {
        m.timers.clear();
        m.metrics.record_disconnected(now_ms());
        self.set_state(m, ConnectionState::Reconnecting);
        self.open_connection(m);
    }

    fn open_connection(self: &Arc<Self>, m: &mut Machine) {
        m.close_connection();
        m.next_connection_id += 1;
        let id = m.next_connection_id;
        let request = m.connect_request();
        let ack_timeout = Some(m.config.connect_timeout()).filter(|t| !t.is_zero());
        tracing::debug!(
            connection = id,
            subject = ?request.subject_id,
            event_types = ?request.event_types,
            last_event_id = ?request.last_event_id,
            "Opening push connection"
        );
        let task = tokio::spawn(run_connection(
            Arc::downgrade(self),
            self.transport.clone(),
            id,
            request,
            ack_timeout,
        ));
        m.connection = Some(Connection { id, task });
    }

    async fn on_frame(self: &Arc<Self>, connection_id: u64, frame: SseFrame) -> FrameOutcome {
        let current = match InboundMessage::parse(&frame) {
            Ok(InboundMessage::Connected(ack)) => {
                return if self.on_connected(connection_id, ack).await {
                    FrameOutcome::Acknowledged
                } else {
                    FrameOutcome::Stale
                };
            }
            Ok(InboundMessage::Heartbeat(_)) => {
                tracing::trace!("Heartbeat");
                self.machine.lock().is_current(connection_id)
            }
            Ok(InboundMessage::Event { id, frame }) => self.on_event(connection_id, id, frame).await,
            Err(e) => {
                tracing::warn!(event = %frame.event_name(), error = %e, "Dropping malformed frame");
                self.machine.lock().is_current(connection_id)
            }
        };
        if current {
            FrameOutcome::Continue
        } else {
            FrameOutcome::Stale
        }
    }

    async fn on_connected(self: &Arc<Self>, connection_id: u64, ack: ConnectedFrame) -> bool {
        {
            let mut m = self.machine.lock();
            if !m.is_current(connection_id) {
                return false;
            }

            let now = now_ms();
            let previous = m.state;
            if previous == ConnectionState::PollingFallback {
                let stopped = self.fallback.stop(None);
                m.finish_polling(now);
                tracing::info!(pollers_stopped = stopped, "Push restored, leaving polling fallback");
            }

            m.timers.clear();
            m.reconnect_attempts = 0;
            m.error = None;
            m.last_connection_time = Some(now);
            m.metrics.record_connected(
                now,
                matches!(
                    previous,
                    ConnectionState::Reconnecting | ConnectionState::PollingFallback
                ),
            );
            tracing::info!(client_id = %ack.client_id, "Connected to event stream");
            m.client_id = Some(ack.client_id);
            self.set_state(&mut m, ConnectionState::Connected);
        }
        self.persist().await;
        true
    }

    async fn on_event(
        self: &Arc<Self>,
        connection_id: u64,
        event_id: Option<String>,
        frame: EventFrame,
    ) -> bool {
        let event = {
            let mut m = self.machine.lock();
            if !m.is_current(connection_id) {
                return false;
            }
            if let Some(token) = &event_id {
                m.last_event_id = Some(token.clone());
            }
            let event = SyncEvent::new(
                event_id.unwrap_or_else(local_event_id),
                frame.event_type,
                frame.data,
                frame.subject_id.filter(|s| !s.trim().is_empty()),
                frame.timestamp,
                EventSource::Push,
                now_ms(),
            );
            m.record(event.clone());
            event
        };

        self.deliver(&event).await;
        true
    }

    async fn on_transport_error(self: &Arc<Self>, connection_id: u64, error: TransportError) {
        {
            let mut m = self.machine.lock();
            if !m.is_current(connection_id) {
                tracing::trace!(connection = connection_id, "Ignoring error from stale connection");
                return;
            }
            m.connection = None;

            match m.state {
                ConnectionState::PollingFallback => {
                    tracing::debug!(error = %error, "Push retry failed, staying on polling fallback");
                    return;
                }
                ConnectionState::Disconnected => return,
                ConnectionState::Connected => m.metrics.record_disconnected(now_ms()),
                _ => {}
            }

            tracing::warn!(
                error = %error,
                state = %m.state,
                attempts = m.reconnect_attempts,
                "Transport error"
            );
            m.error = Some(error.to_string());
            self.handle_failure(&mut m);
        }
        self.persist().await;
    }

    /// Decide between RECONNECTING, POLLING_FALLBACK and ERROR.
    fn handle_failure(self: &Arc<Self>, m: &mut Machine) {
        let max_attempts = m.config.max_reconnect_attempts;

        if m.config.auto_reconnect && m.reconnect_attempts < max_attempts {
            let delay = reconnect_delay(m.config.reconnect_base_delay(), m.reconnect_attempts);
            m.reconnect_attempts += 1;
            self.set_state(m, ConnectionState::Reconnecting);
            self.schedule_reconnect(m, delay);
            tracing::info!(
                attempt = m.reconnect_attempts,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Reconnect scheduled"
            );
        } else if m.config.enable_polling_fallback && m.reconnect_attempts >= max_attempts {
            self.enter_fallback(m);
        } else {
            self.set_state(m, ConnectionState::Error);
            tracing::error!(attempts = m.reconnect_attempts, "Push connection failed, giving up");
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, m: &mut Machine, delay: Duration) {
        m.timers.clear();
        let epoch = m.timers.epoch;
        let shared = Arc::downgrade(self);
        m.timers.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = shared.upgrade() {
                shared.fire_reconnect(epoch);
            }
        }));
    }

    fn fire_reconnect(self: &Arc<Self>, epoch: u64) {
        let mut m = self.machine.lock();
        if m.timers.epoch != epoch || m.state != ConnectionState::Reconnecting {
            return;
        }
        m.timers.reconnect = None;
        self.open_connection(&mut m);
    }

    fn enter_fallback(self: &Arc<Self>, m: &mut Machine) {
        m.timers.clear();
        m.close_connection();
        self.set_state(m, ConnectionState::PollingFallback);
        m.polling_since = Some(now_ms());
        m.metrics.record_polling_started();
        let started = self.fallback.start(None);

        let period = m.config.sse_retry_interval().max(Duration::from_millis(1));
        let epoch = m.timers.epoch;
        let shared = Arc::downgrade(self);
        m.timers.sse_retry = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                if !shared.fire_retry(epoch) {
                    break;
                }
            }
        }));

        tracing::warn!(
            pollers = started,
            retry_interval_ms = period.as_millis() as u64,
            "Entering polling fallback"
        );
    }

    /// Periodic push retry while polling. Returns false when the timer is obsolete.
    fn fire_retry(self: &Arc<Self>, epoch: u64) -> bool {
        let mut m = self.machine.lock();
        if m.timers.epoch != epoch || m.state != ConnectionState::PollingFallback {
            return false;
        }
        if m.connection.is_some() {
            tracing::debug!("Previous push retry never acknowledged, replacing it");
        } else {
            tracing::debug!("Retrying push connection");
        }
        self.open_connection(&mut m);
        true
    }

    /// A poll callback succeeded; surface it as a `refresh` event.
    pub(crate) async fn on_poll_success(&self, poller: &str) {
        let event = {
            let mut m = self.machine.lock();
            if m.state == ConnectionState::Disconnected {
                return;
            }
            let now = now_ms();
            let event = SyncEvent::new(
                local_event_id(),
                REFRESH_EVENT,
                json!({ "poller": poller }),
                m.config.subject_filter.clone(),
                now,
                EventSource::Poll,
                now,
            );
            m.record(event.clone());
            event
        };
        self.deliver(&event).await;
    }

    /// Fan an already-recorded event out to subscribers, then persist.
    pub(crate) async fn deliver(&self, event: &SyncEvent) {
        let delivered = self.registry.notify(event);
        tracing::debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            subject = ?event.subject_id,
            source = ?event.metadata.source,
            delivered,
            "Event received"
        );
        self.machine.lock().history.mark_processed(&event.id);
        self.persist().await;
    }

    /// Mirror the current state to storage, logging failures.
    pub(crate) async fn persist(&self) {
        if let Err(e) = self.try_persist().await {
            tracing::warn!(error = %e, "Failed to persist sync state");
        }
    }

    pub(crate) async fn try_persist(&self) -> Result<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        let _write = persistence.write_lock.lock().await;

        let snapshot = {
            let m = self.machine.lock();
            PersistedState::capture(
                &m.history,
                &m.config,
                &m.metrics,
                m.last_event_id.as_deref(),
                m.last_connection_time,
                now_ms(),
            )
        };
        let json = snapshot.to_json()?;
        persistence.storage.save(&persistence.key, &json).await?;
        Ok(())
    }

    /// Build the notification emitted after a restore.
    pub(crate) fn history_restored_event(count: usize, discarded: usize, last_event_id: Option<&str>) -> SyncEvent {
        let now = now_ms();
        SyncEvent::new(
            local_event_id(),
            HISTORY_RESTORED_EVENT,
            json!({ "count": count, "discarded": discarded, "lastEventId": last_event_id }),
            None,
            now,
            EventSource::Restored,
            now,
        )
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let m = self.machine.get_mut();
        m.timers.clear();
        m.close_connection();
        self.fallback.stop(None);
    }
}

/// Drive one connection until it fails, ends or stops being current.
///
/// Until the `connected` frame arrives, opening and reading are bounded by
/// `ack_timeout`; expiry is reported like any other transport error.
async fn run_connection(
    shared: Weak<Shared>,
    transport: Arc<dyn Transport>,
    connection_id: u64,
    request: ConnectRequest,
    ack_timeout: Option<Duration>,
) {
    let mut deadline = ack_timeout.map(|t| Instant::now() + t);
    let timed_out = || TransportError::ConnectTimeout(ack_timeout.unwrap_or_default());

    let error = match within(deadline, transport.open(&request)).await {
        None => timed_out(),
        Some(Err(e)) => e,
        Some(Ok(mut frames)) => loop {
            let Some(next) = within(deadline, frames.next()).await else {
                break timed_out();
            };
            match next {
                Some(Ok(frame)) => {
                    let Some(shared) = shared.upgrade() else {
                        return;
                    };
                    match shared.on_frame(connection_id, frame).await {
                        FrameOutcome::Stale => return,
                        FrameOutcome::Acknowledged => deadline = None,
                        FrameOutcome::Continue => {}
                    }
                }
                Some(Err(e)) => break e,
                None => break TransportError::Closed,
            }
        },
    };

    if let Some(shared) = shared.upgrade() {
        shared.on_transport_error(connection_id, error).await;
    }
}

/// Await `future`, giving up at `deadline` if one is set.
async fn within<F: Future>(deadline: Option<Instant>, future: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, future).await.ok(),
        None => Some(future.await),
    }
}

pub(crate) fn now_ms() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

pub(crate) fn local_event_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
