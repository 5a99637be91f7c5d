//! Tail a Beacon event stream from the terminal.
//!
//! Environment:
//! - `BEACON_URL`: stream endpoint (default `http://localhost:3000/events`)
//! - `BEACON_SUBJECT`: only this subject's events
//! - `BEACON_EVENT_TYPES`: comma-separated event types
//! - `BEACON_STATE_DIR`: persist state here between runs

use beacon_client::{FileStorage, SyncClient};
use beacon_engine::{SubscriptionFilter, SyncConfiguration};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let url = std::env::var("BEACON_URL").unwrap_or_else(|_| "http://localhost:3000/events".to_string());
    let configuration = SyncConfiguration {
        subject_filter: std::env::var("BEACON_SUBJECT").ok().filter(|s| !s.trim().is_empty()),
        event_type_filter: std::env::var("BEACON_EVENT_TYPES")
            .map(|raw| beacon_engine::canonicalize_all(raw.split(',').map(str::trim).filter(|t| !t.is_empty())))
            .unwrap_or_default(),
        ..SyncConfiguration::default()
    };

    let mut builder = SyncClient::builder()
        .endpoint(url.clone())
        .configuration(configuration)
        .subscribe(SubscriptionFilter::all(), |event| {
            tracing::info!(
                id = %event.id,
                event_type = %event.event_type,
                subject = event.subject().unwrap_or("-"),
                payload = %event.payload,
                "event"
            );
        });
    if let Ok(dir) = std::env::var("BEACON_STATE_DIR") {
        builder = builder.storage(FileStorage::new(dir));
    }

    let client = builder.build().await?;
    // A restored configuration may have auto_connect disabled
    client.connect();
    tracing::info!("Tailing {}", url);

    let mut states = client.watch_state();
    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = client.status();
                tracing::info!(state = %status.state, error = ?status.error, attempts = status.reconnect_attempts, "Connection state");
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.disconnect().await;
    let metrics = client.metrics();
    tracing::info!(events = metrics.total_events, reconnects = metrics.total_reconnects, "Stopped");
    Ok(())
}
