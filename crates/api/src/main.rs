use std::net::SocketAddr;
use std::sync::Arc;

use sofi_engine::cdb::{CdbLibrary, MissingCdbLibrary, NativeCdbLibrary};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sofi_api::background::workspace_reaper;
use sofi_api::config::ServerConfig;
use sofi_api::router::build_app_router;
use sofi_api::state::AppState;
use sofi_api::ws;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "sofi_api=debug,sofi_engine=debug,sofi_core=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Result database library ---
    let cdb_library: Arc<dyn CdbLibrary> = match NativeCdbLibrary::load(&config.engine.cdb_library) {
        Ok(library) => {
            tracing::info!(path = %config.engine.cdb_library.display(), "Result database library loaded");
            Arc::new(library)
        }
        Err(e) => {
            tracing::error!(error = %e, "Result extraction disabled");
            Arc::new(MissingCdbLibrary::new(e.to_string()))
        }
    };

    // --- App state ---
    let state = AppState::new(config.clone(), cdb_library);

    let stale = state
        .workspaces
        .init()
        .await
        .expect("Failed to create workspace root");
    tracing::info!(root = %state.workspaces.root().display(), stale, "Workspace root ready");

    if !state.invoker.engine_installed().await {
        tracing::warn!(
            engine = %state.invoker.config().engine_path.display(),
            "Calculation engine not found; calculations will fail until it is installed",
        );
    }

    // --- Heartbeat ---
    let ws_manager = Arc::clone(&state.ws_manager);
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&ws_manager));

    // --- Workspace reaper ---
    let reaper_cancel = tokio_util::sync::CancellationToken::new();
    let reaper_handle = tokio::spawn(workspace_reaper::run(
        Arc::clone(&state.workspaces),
        config.engine.workspace_ttl(),
        workspace_reaper::SWEEP_INTERVAL,
        reaper_cancel.clone(),
    ));

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    let ws_count = ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    ws_manager.shutdown_all().await;

    heartbeat_handle.abort();
    tracing::info!("Heartbeat task stopped");

    reaper_cancel.cancel();
    let _ = reaper_handle.await;

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
