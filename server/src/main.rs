//! Beacon Server binary.

use std::sync::Arc;

use beacon_server::{build_router, AppState, Broadcaster, BroadcasterSettings, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Beacon Server on {}:{}", config.host, config.port);

    let broadcaster = Broadcaster::shared(BroadcasterSettings::from(&config));
    broadcaster.start_background_tasks();

    let state = AppState {
        config: Arc::new(config.clone()),
        broadcaster: broadcaster.clone(),
    };
    let app = build_router(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(broadcaster))
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Wait for ctrl-c, then end every open stream so in-flight connections drain.
async fn shutdown_signal(broadcaster: Arc<Broadcaster>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    let closed = broadcaster.disconnect_all();
    tracing::info!(closed, "Shutdown signal received");
}
