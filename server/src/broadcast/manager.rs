//! Connected-client registry and fan-out.
//!
//! Tracks active SSE clients with their filters and pushes events to the
//! matching ones. Pushes use `try_send` on each client's bounded channel, so
//! a slow or dead client is evicted instead of delaying anyone else.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use beacon_engine::{ClientFilter, ClientId, Sequence, SubjectId, Timestamp};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::{BroadcastError, BroadcastEvent, OutboundFrame, ReplayLog};
use crate::config::Config;

/// Sender half of a client's frame channel.
pub type FrameSender = mpsc::Sender<OutboundFrame>;

/// The process-wide broadcaster, created on first use.
static SHARED: OnceLock<Arc<Broadcaster>> = OnceLock::new();

/// A single connected client.
#[derive(Debug)]
pub struct ClientRecord {
    /// Unique identifier for this connection
    pub id: ClientId,
    /// Channel drained by the client's SSE response
    pub sender: FrameSender,
    /// What the client asked to receive
    pub filter: ClientFilter,
    /// Accept time (milliseconds since epoch)
    pub connected_at: Timestamp,
    last_activity: AtomicU64,
}

impl ClientRecord {
    /// Last time the client's stream yielded a frame.
    pub fn last_activity(&self) -> Timestamp {
        self.last_activity.load(Ordering::Relaxed)
    }

    fn touch(&self, now: Timestamp) {
        self.last_activity.fetch_max(now, Ordering::Relaxed);
    }
}

/// Tunables for the broadcaster and its background tasks.
#[derive(Debug, Clone)]
pub struct BroadcasterSettings {
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    pub heartbeat_interval: Duration,
    pub sse_retry: Duration,
    pub replay_capacity: usize,
    pub max_clients: usize,
}

impl Default for BroadcasterSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for BroadcasterSettings {
    fn from(config: &Config) -> Self {
        Self {
            idle_timeout: config.idle_timeout,
            sweep_interval: config.sweep_interval,
            heartbeat_interval: config.heartbeat_interval,
            sse_retry: config.sse_retry,
            replay_capacity: config.replay_capacity,
            max_clients: config.max_clients,
        }
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastReport {
    /// Sequence number assigned to the event
    pub id: Sequence,
    pub timestamp: Timestamp,
    /// Clients the event was queued for
    pub delivered: usize,
    /// Clients removed because the push failed
    pub evicted: usize,
}

/// Monitoring snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcasterStats {
    pub clients: usize,
    /// Distinct subject filters among connected clients
    pub subjects: usize,
    pub last_sequence: Sequence,
}

/// Fans events out to connected clients.
///
/// Thread-safe and shared across handlers via `Arc`.
#[derive(Debug)]
pub struct Broadcaster {
    clients: DashMap<ClientId, ClientRecord>,
    /// Serializes broadcasts with client registration so a resuming client
    /// gets every event exactly once across the replay/live boundary.
    log: Mutex<ReplayLog>,
    settings: BroadcasterSettings,
    background_started: AtomicBool,
}

impl Broadcaster {
    /// Create a new broadcaster.
    pub fn new(settings: BroadcasterSettings) -> Self {
        Self {
            clients: DashMap::new(),
            log: Mutex::new(ReplayLog::new(settings.replay_capacity)),
            settings,
            background_started: AtomicBool::new(false),
        }
    }

    /// Create a new broadcaster wrapped in Arc for sharing.
    pub fn new_shared(settings: BroadcasterSettings) -> Arc<Self> {
        Arc::new(Self::new(settings))
    }

    /// The process-wide broadcaster.
    ///
    /// `settings` only apply to the call that creates it; later calls return
    /// the existing instance.
    pub fn shared(settings: BroadcasterSettings) -> Arc<Self> {
        SHARED
            .get_or_init(|| Self::new_shared(settings))
            .clone()
    }

    pub fn settings(&self) -> &BroadcasterSettings {
        &self.settings
    }

    /// Register a client.
    ///
    /// Returns the frames the client must receive before any live event: the
    /// `connected` acknowledgment followed by replayed events newer than
    /// `last_event_id`.
    pub fn add_client(
        &self,
        id: ClientId,
        sender: FrameSender,
        filter: ClientFilter,
        last_event_id: Option<&str>,
    ) -> Result<Vec<OutboundFrame>, BroadcastError> {
        let log = self.log.lock();

        if self.clients.len() >= self.settings.max_clients {
            tracing::warn!(client_id = %id, limit = self.settings.max_clients, "Client limit reached");
            return Err(BroadcastError::CapacityExceeded(self.settings.max_clients));
        }

        let now = now_ms();
        let mut preamble = vec![OutboundFrame::connected(&id, now, self.settings.sse_retry)?];
        if let Some(token) = last_event_id {
            preamble.extend(log.replay_after(token, &filter));
        }

        match self.clients.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(BroadcastError::DuplicateClient(id));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(ClientRecord {
                    id: id.clone(),
                    sender,
                    filter: filter.clone(),
                    connected_at: now,
                    last_activity: AtomicU64::new(now),
                });
            }
        }

        tracing::info!(
            client_id = %id,
            subject = ?filter.subject_id,
            event_types = ?filter.event_types,
            replayed = preamble.len() - 1,
            "SSE client registered"
        );

        Ok(preamble)
    }

    /// Unregister a client and close its channel. Safe to call twice.
    pub fn remove_client(&self, id: &str) -> bool {
        match self.clients.remove(id) {
            Some((_, record)) => {
                tracing::info!(
                    client_id = %id,
                    connected_for_ms = now_ms().saturating_sub(record.connected_at),
                    "SSE client unregistered"
                );
                true
            }
            None => false,
        }
    }

    /// Push an event to every matching client.
    ///
    /// A failed push evicts only that client; delivery to the others goes on.
    pub fn broadcast(&self, event: BroadcastEvent) -> Result<BroadcastReport, BroadcastError> {
        let mut log = self.log.lock();
        let logged = log.record(event, now_ms())?;

        let mut delivered = 0;
        let mut dead = Vec::new();
        for entry in self.clients.iter() {
            let client = entry.value();
            if !client
                .filter
                .matches_canonical(logged.subject_id.as_deref(), &logged.event_type)
            {
                continue;
            }
            if push(client, logged.frame.clone()) {
                delivered += 1;
            } else {
                dead.push(client.id.clone());
            }
        }
        drop(log);

        for id in &dead {
            self.remove_client(id);
        }

        tracing::debug!(
            id = logged.sequence,
            event_type = %logged.event_type,
            subject = ?logged.subject_id,
            recipients = delivered,
            evicted = dead.len(),
            "Broadcast event"
        );

        Ok(BroadcastReport {
            id: logged.sequence,
            timestamp: logged.timestamp,
            delivered,
            evicted: dead.len(),
        })
    }

    /// Broadcast an event scoped to `subject_id`.
    pub fn broadcast_to_subject(
        &self,
        subject_id: impl Into<SubjectId>,
        event: BroadcastEvent,
    ) -> Result<BroadcastReport, BroadcastError> {
        self.broadcast(event.for_subject(subject_id))
    }

    /// Record that a client's stream yielded a frame.
    pub fn touch(&self, id: &str) {
        if let Some(client) = self.clients.get(id) {
            client.touch(now_ms());
        }
    }

    /// Remove clients idle for longer than the idle timeout.
    pub fn cleanup_stale(&self) -> usize {
        self.cleanup_stale_at(now_ms())
    }

    /// [`Broadcaster::cleanup_stale`] against an explicit clock.
    pub fn cleanup_stale_at(&self, now: Timestamp) -> usize {
        let threshold = self.settings.idle_timeout.as_millis() as u64;
        let stale: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|entry| now.saturating_sub(entry.value().last_activity()) > threshold)
            .map(|entry| entry.key().clone())
            .collect();

        for id in &stale {
            tracing::info!(client_id = %id, "Evicting idle SSE client");
            self.remove_client(id);
        }
        stale.len()
    }

    /// Push a heartbeat frame to every client, evicting the unreachable ones.
    ///
    /// Returns the number of clients reached.
    pub fn heartbeat(&self) -> usize {
        let frame = match OutboundFrame::heartbeat(now_ms()) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Failed to build heartbeat frame: {}", e);
                return 0;
            }
        };

        let mut reached = 0;
        let mut dead = Vec::new();
        for entry in self.clients.iter() {
            if push(entry.value(), frame.clone()) {
                reached += 1;
            } else {
                dead.push(entry.key().clone());
            }
        }
        for id in &dead {
            self.remove_client(id);
        }
        reached
    }

    /// Drop every client, ending their streams. Returns how many were removed.
    pub fn disconnect_all(&self) -> usize {
        let ids: Vec<ClientId> = self.clients.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.remove_client(id)).count()
    }

    /// Start the sweep and heartbeat timers.
    ///
    /// Idempotent: only the first call spawns tasks. Returns whether this
    /// call started them. The tasks stop once the broadcaster is dropped.
    pub fn start_background_tasks(self: &Arc<Self>) -> bool {
        if self
            .background_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Broadcaster background tasks already running");
            return false;
        }

        spawn_periodic(Arc::downgrade(self), self.settings.sweep_interval, |b| {
            let removed = b.cleanup_stale();
            if removed > 0 {
                tracing::info!(removed, remaining = b.client_count(), "Stale client sweep");
            }
        });
        spawn_periodic(Arc::downgrade(self), self.settings.heartbeat_interval, |b| {
            let reached = b.heartbeat();
            tracing::trace!(reached, "Heartbeat sent");
        });

        tracing::info!(
            sweep_interval = ?self.settings.sweep_interval,
            heartbeat_interval = ?self.settings.heartbeat_interval,
            "Broadcaster background tasks started"
        );
        true
    }

    /// Whether the background timers have been started.
    pub fn background_tasks_started(&self) -> bool {
        self.background_started.load(Ordering::SeqCst)
    }

    /// Get the number of connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.clients.contains_key(id)
    }

    /// The filter a client registered with.
    pub fn client_filter(&self, id: &str) -> Option<ClientFilter> {
        self.clients.get(id).map(|c| c.filter.clone())
    }

    pub fn stats(&self) -> BroadcasterStats {
        let mut subjects: Vec<SubjectId> = self
            .clients
            .iter()
            .filter_map(|c| c.filter.subject_id.clone())
            .collect();
        subjects.sort();
        subjects.dedup();

        BroadcasterStats {
            clients: self.clients.len(),
            subjects: subjects.len(),
            last_sequence: self.log.lock().last_sequence(),
        }
    }
}

/// Queue a frame without waiting. False means the client must go.
fn push(client: &ClientRecord, frame: OutboundFrame) -> bool {
    match client.sender.try_send(frame) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            tracing::warn!(client_id = %client.id, "Client buffer full, evicting");
            false
        }
        Err(TrySendError::Closed(_)) => {
            tracing::warn!(client_id = %client.id, "Client channel closed, evicting");
            false
        }
    }
}

/// Run `tick` every `period` until the broadcaster is gone.
fn spawn_periodic<F>(broadcaster: Weak<Broadcaster>, period: Duration, tick: F)
where
    F: Fn(&Broadcaster) + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match broadcaster.upgrade() {
                Some(b) => tick(&b),
                None => break,
            }
        }
    });
}

fn now_ms() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
