//! Polling fallback engine: a registry of named pollers started and stopped
//! together while the push transport is unavailable.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::BoxError;
use crate::poller::{poll_fn, PollFn, Poller, PollerOptions, PollerStats};

/// Identifier returned by [`PollingFallbackEngine::register`].
pub type PollerId = u64;

/// Aggregate counters across all registered pollers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackMetrics {
    pub pollers: usize,
    pub running: usize,
    pub total_invocations: u64,
    pub total_failures: u64,
    pub suppressed_ticks: u64,
}

/// Status of one registered poller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollerStatus {
    pub id: PollerId,
    pub name: String,
    pub running: bool,
    pub circuit_open: bool,
    pub stats: PollerStats,
}

#[derive(Debug, Default)]
pub struct PollingFallbackEngine {
    pollers: Mutex<BTreeMap<PollerId, Arc<Poller>>>,
    next_id: AtomicU64,
}

impl PollingFallbackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async callback. It does not run until started.
    pub fn register<F, Fut>(
        &self,
        name: impl Into<String>,
        interval: Duration,
        options: PollerOptions,
        callback: F,
    ) -> PollerId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.register_boxed(name, interval, options, poll_fn(callback))
    }

    pub fn register_boxed(
        &self,
        name: impl Into<String>,
        interval: Duration,
        options: PollerOptions,
        callback: PollFn,
    ) -> PollerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let poller = Poller::new(name, interval, options, callback);
        tracing::debug!(poller_id = id, name = %poller.name(), ?interval, "Poller registered");
        self.pollers.lock().insert(id, Arc::new(poller));
        id
    }

    /// Remove a poller, stopping it first.
    pub fn unregister(&self, id: PollerId) -> bool {
        match self.pollers.lock().remove(&id) {
            Some(poller) => {
                poller.stop();
                true
            }
            None => false,
        }
    }

    /// Start one poller, or all of them. Returns how many were started.
    pub fn start(&self, id: Option<PollerId>) -> usize {
        self.select(id).iter().filter(|p| p.start()).count()
    }

    /// Stop one poller, or all of them. Returns how many were stopped.
    pub fn stop(&self, id: Option<PollerId>) -> usize {
        self.select(id).iter().filter(|p| p.stop()).count()
    }

    pub fn is_running(&self, id: PollerId) -> bool {
        self.pollers
            .lock()
            .get(&id)
            .is_some_and(|p| p.is_running())
    }

    /// Whether any poller is running.
    pub fn is_active(&self) -> bool {
        self.pollers.lock().values().any(|p| p.is_running())
    }

    /// Apply a new base interval to every poller.
    pub fn set_interval(&self, interval: Duration) {
        for poller in self.pollers.lock().values() {
            poller.set_interval(interval);
        }
    }

    pub fn status(&self, id: PollerId) -> Option<PollerStatus> {
        self.pollers.lock().get(&id).map(|p| status_of(id, p))
    }

    pub fn statuses(&self) -> Vec<PollerStatus> {
        self.pollers
            .lock()
            .iter()
            .map(|(id, p)| status_of(*id, p))
            .collect()
    }

    pub fn metrics(&self) -> FallbackMetrics {
        self.statuses()
            .into_iter()
            .fold(FallbackMetrics::default(), |mut m, s| {
                m.pollers += 1;
                m.running += usize::from(s.running);
                m.total_invocations += s.stats.invocations;
                m.total_failures += s.stats.failures;
                m.suppressed_ticks += s.stats.suppressed_ticks;
                m
            })
    }

    pub fn len(&self) -> usize {
        self.pollers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pollers.lock().is_empty()
    }

    fn select(&self, id: Option<PollerId>) -> Vec<Arc<Poller>> {
        let pollers = self.pollers.lock();
        match id {
            Some(id) => pollers.get(&id).cloned().into_iter().collect(),
            None => pollers.values().cloned().collect(),
        }
    }
}

fn status_of(id: PollerId, poller: &Poller) -> PollerStatus {
    PollerStatus {
        id,
        name: poller.name().to_string(),
        running: poller.is_running(),
        circuit_open: poller.is_circuit_open(),
        stats: poller.stats(),
    }
}
