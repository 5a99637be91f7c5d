//! A single repeating poll task with backoff, jitter and a circuit breaker.
//!
//! The callback runs immediately on [`Poller::start`], then again after a
//! delay computed once the previous invocation settles, so two invocations
//! of the same poller never overlap.
//!
//! After `failure_threshold` consecutive failures the circuit opens: ticks
//! keep being scheduled but the callback is not invoked until `cooldown`
//! has elapsed. The first tick after that is a half-open trial; success
//! closes the circuit, failure re-opens it for another full cooldown.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use beacon_engine::BackoffPolicy;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::BoxError;

/// Future returned by a poll callback.
pub type PollFuture = BoxFuture<'static, Result<(), BoxError>>;

/// A shareable poll callback.
pub type PollFn = Arc<dyn Fn() -> PollFuture + Send + Sync>;

/// Wrap an async closure as a [`PollFn`].
pub fn poll_fn<F, Fut>(f: F) -> PollFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Backoff and circuit-breaker settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PollerOptions {
    pub backoff: BackoffPolicy,
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long an open circuit suppresses invocations
    pub cooldown: Duration,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Counters for one poller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollerStats {
    /// Callback invocations (successful or not)
    pub invocations: u64,
    pub failures: u64,
    /// Ticks skipped because the circuit was open
    pub suppressed_ticks: u64,
    pub consecutive_failures: u32,
}

#[derive(Debug, Default)]
struct PollerState {
    interval: Duration,
    stats: PollerStats,
    circuit_open_until: Option<Instant>,
    task: Option<JoinHandle<()>>,
}

/// A named repeating task.
pub struct Poller {
    name: String,
    callback: PollFn,
    options: PollerOptions,
    state: Arc<Mutex<PollerState>>,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Poller {
    pub fn new(name: impl Into<String>, interval: Duration, options: PollerOptions, callback: PollFn) -> Self {
        Self {
            name: name.into(),
            callback,
            options,
            state: Arc::new(Mutex::new(PollerState {
                interval,
                ..PollerState::default()
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start ticking. Returns false if already running.
    pub fn start(&self) -> bool {
        let mut state = self.state.lock();
        if state.task.as_ref().is_some_and(|t| !t.is_finished()) {
            return false;
        }

        let task = tokio::spawn(run(
            self.name.clone(),
            self.callback.clone(),
            self.options.clone(),
            self.state.clone(),
        ));
        state.task = Some(task);
        tracing::debug!(poller = %self.name, "Poller started");
        true
    }

    /// Stop ticking and cancel an in-flight invocation. Returns false if not running.
    pub fn stop(&self) -> bool {
        match self.state.lock().task.take() {
            Some(task) => {
                task.abort();
                tracing::debug!(poller = %self.name, "Poller stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .task
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().stats.consecutive_failures
    }

    pub fn is_circuit_open(&self) -> bool {
        self.state
            .lock()
            .circuit_open_until
            .is_some_and(|until| Instant::now() < until)
    }

    pub fn stats(&self) -> PollerStats {
        self.state.lock().stats.clone()
    }

    pub fn interval(&self) -> Duration {
        self.state.lock().interval
    }

    /// Change the base interval; applies from the next scheduled tick.
    pub fn set_interval(&self, interval: Duration) {
        self.state.lock().interval = interval;
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if let Some(task) = self.state.lock().task.take() {
            task.abort();
        }
    }
}

async fn run(name: String, callback: PollFn, options: PollerOptions, state: Arc<Mutex<PollerState>>) {
    loop {
        let suppressed = {
            let mut s = state.lock();
            match s.circuit_open_until {
                Some(until) if Instant::now() < until => {
                    s.stats.suppressed_ticks += 1;
                    true
                }
                _ => false,
            }
        };

        if suppressed {
            tracing::trace!(poller = %name, "Circuit open, tick suppressed");
        } else {
            // The callback itself may panic before handing back a future.
            let invocation = futures::future::lazy(|_| callback()).flatten();
            let outcome = AssertUnwindSafe(invocation).catch_unwind().await;
            let mut s = state.lock();
            s.stats.invocations += 1;
            match outcome {
                Ok(Ok(())) => {
                    if s.circuit_open_until.take().is_some() {
                        tracing::info!(poller = %name, "Circuit closed");
                    }
                    s.stats.consecutive_failures = 0;
                }
                failed => {
                    let reason = match failed {
                        Ok(Err(e)) => e.to_string(),
                        _ => "callback panicked".to_string(),
                    };
                    s.stats.failures += 1;
                    s.stats.consecutive_failures += 1;
                    tracing::error!(
                        poller = %name,
                        consecutive_failures = s.stats.consecutive_failures,
                        error = %reason,
                        "Poll callback failed"
                    );
                    if s.stats.consecutive_failures >= options.failure_threshold {
                        s.circuit_open_until = Some(Instant::now() + options.cooldown);
                        tracing::warn!(
                            poller = %name,
                            cooldown = ?options.cooldown,
                            "Circuit opened"
                        );
                    }
                }
            }
        }

        let delay = {
            let s = state.lock();
            let unit: f64 = rand::rng().random_range(-1.0..=1.0);
            options
                .backoff
                .next_delay(s.interval, s.stats.consecutive_failures, unit)
        };
        tokio::time::sleep(delay).await;
    }
}
