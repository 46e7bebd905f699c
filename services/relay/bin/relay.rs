//! Main Entrypoint for the Live Relay Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Building the live agent backend and the session manager.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use gemini_live::{GeminiLiveBackend, GeminiLiveConfig};
use pairlive_core::{session::SessionRegistry, tools::ToolConfig};
use pairlive_relay::{config::Config, router::create_router, state::AppState, ws::SessionManager};
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Shared Services ---
    let backend = GeminiLiveBackend::new(GeminiLiveConfig {
        model: config.live_model.clone(),
        ..GeminiLiveConfig::new(config.gemini_api_key.clone())
    });
    let tool_config = ToolConfig {
        project_root: config.project_root.clone(),
        context_file: config.context_file.clone(),
        allowed_external_files: config.allowed_external_files.clone(),
    };
    let sessions = SessionManager::new(
        config.app_name.clone(),
        Arc::new(backend),
        Arc::new(SessionRegistry::new()),
        config.agent_profile,
        Arc::new(tool_config),
    );

    let app_state = Arc::new(AppState {
        sessions: Arc::new(sessions),
        config: Arc::new(config.clone()),
    });

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        profile = ?config.agent_profile,
        model = %config.live_model,
        bind_address = %config.bind_address,
        static_dir = %config.static_dir.display(),
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
