//! Shared fixtures for client integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_client::{BoxError, ConnectRequest, FrameStream, PollerOptions, SyncClient, Transport, TransportError};
use beacon_engine::{BackoffPolicy, SseFrame, SyncConfiguration};
use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::time::Instant;

type FrameSender = mpsc::UnboundedSender<Result<SseFrame, TransportError>>;

/// What the next `open` call does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Fail,
    Open,
}

#[derive(Default)]
struct Inner {
    script: VecDeque<Step>,
    default_open: bool,
    opens: Vec<(Instant, ConnectRequest)>,
    stream: Option<FrameSender>,
}

/// Transport whose connection attempts follow a script. The test drives the
/// most recently opened stream.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedTransport {
    /// Every attempt fails unless scripted otherwise.
    pub fn failing() -> Self {
        Self::default()
    }

    /// Every attempt opens unless scripted otherwise.
    pub fn accepting() -> Self {
        let transport = Self::default();
        transport.inner.lock().default_open = true;
        transport
    }

    pub fn script(self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.inner.lock().script.extend(steps);
        self
    }

    pub fn set_default(&self, step: Step) {
        self.inner.lock().default_open = step == Step::Open;
    }

    pub fn opens(&self) -> usize {
        self.inner.lock().opens.len()
    }

    pub fn open_times(&self) -> Vec<Instant> {
        self.inner.lock().opens.iter().map(|(t, _)| *t).collect()
    }

    pub fn last_request(&self) -> Option<ConnectRequest> {
        self.inner.lock().opens.last().map(|(_, r)| r.clone())
    }

    /// Send a frame on the open stream. Returns false if nobody is reading.
    pub fn send(&self, frame: SseFrame) -> bool {
        match &self.inner.lock().stream {
            Some(tx) => tx.unbounded_send(Ok(frame)).is_ok(),
            None => false,
        }
    }

    pub fn connected(&self, client_id: &str) -> bool {
        self.send(SseFrame::named(
            "connected",
            json!({ "clientId": client_id, "timestamp": 1 }).to_string(),
        ))
    }

    pub fn event(&self, id: &str, event_type: &str, subject: Option<&str>, data: Value) -> bool {
        let mut body = json!({ "eventType": event_type, "data": data, "timestamp": 1_000 });
        if let Some(subject) = subject {
            body["subjectID"] = json!(subject);
        }
        self.send(SseFrame::named(event_type, body.to_string()).with_id(id))
    }

    /// End the open stream cleanly.
    pub fn close(&self) {
        self.inner.lock().stream = None;
    }

    /// Fail the open stream.
    pub fn fail(&self) {
        if let Some(tx) = self.inner.lock().stream.take() {
            let _ = tx.unbounded_send(Err(TransportError::Stream("reset by peer".into())));
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, request: &ConnectRequest) -> Result<FrameStream, TransportError> {
        let mut inner = self.inner.lock();
        inner.opens.push((Instant::now(), request.clone()));
        let step = inner.script.pop_front().unwrap_or(if inner.default_open {
            Step::Open
        } else {
            Step::Fail
        });
        match step {
            Step::Fail => Err(TransportError::Connect("connection refused".into())),
            Step::Open => {
                let (tx, rx) = mpsc::unbounded();
                inner.stream = Some(tx);
                Ok(rx.boxed())
            }
        }
    }
}

/// Configuration that never connects on its own.
pub fn manual_config() -> SyncConfiguration {
    SyncConfiguration {
        auto_connect: false,
        polling_interval_ms: 5_000,
        sse_retry_interval_ms: 10_000,
        ..SyncConfiguration::default()
    }
}

pub fn steady_pollers() -> PollerOptions {
    PollerOptions {
        backoff: BackoffPolicy::default().without_jitter(),
        ..PollerOptions::default()
    }
}

pub async fn client_with(transport: &ScriptedTransport, config: SyncConfiguration) -> SyncClient {
    SyncClient::builder()
        .transport(transport.clone())
        .configuration(config)
        .poller_options(steady_pollers())
        .build()
        .await
        .unwrap()
}

/// Register a poller that counts its invocations.
pub fn counting_poller(client: &SyncClient, name: &str) -> Arc<AtomicU32> {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    client.register_poll(name, move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), BoxError>(())
        }
    });
    calls
}

/// Let spawned tasks run without advancing the clock.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Advance the paused clock, then let tasks catch up.
pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
    settle().await;
}
