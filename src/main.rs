use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use parley_server::api;
use parley_server::config::AppConfig;
use parley_server::gateway::RoomManager;
use parley_server::services::auth::AcceptAnyToken;
use parley_server::state::AppState;
use parley_server::types::SystemClock;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load config
    let config = Arc::new(AppConfig::load()?);
    if config.openai.is_none() {
        tracing::warn!("Speech service key not configured; transcription and coaching disabled");
    }
    let bot_enabled = config
        .recall
        .as_ref()
        .is_some_and(|recall| !recall.api_key.is_empty());
    if !bot_enabled {
        tracing::warn!("Meeting-bot key not configured; bot dispatch disabled");
    }

    // Build room manager and start the heartbeat loop
    let manager = RoomManager::new(
        config.clone(),
        Arc::new(AcceptAnyToken),
        Arc::new(SystemClock),
    );
    manager.spawn_heartbeat().await;

    let state = AppState {
        config: config.clone(),
        manager: manager.clone(),
    };

    // Build router
    let app = api::router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Parley server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    tracing::info!("Shutting down...");
}
