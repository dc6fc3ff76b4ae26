//! Server execution logic.

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::usecase::PresenceCoordinator;

use super::{
    handler::{
        get_presence_patterns, get_presence_quality, get_presence_state, get_presence_stats,
        get_reconnection_stats, health_check, websocket_handler,
    },
    signal::shutdown_signal,
    state::AppState,
};

/// Build the router with every endpoint attached to the coordinator.
pub fn build_router(coordinator: Arc<PresenceCoordinator>) -> Router {
    let app_state = Arc::new(AppState { coordinator });

    Router::new()
        // WebSocket エンドポイント
        .route("/ws", get(websocket_handler))
        // HTTP エンドポイント
        .route("/api/health", get(health_check))
        .route("/api/presence/{user_id}/stats", get(get_presence_stats))
        .route(
            "/api/presence/{user_id}/{context_type}/{context_id}",
            get(get_presence_state),
        )
        .route(
            "/api/presence/{user_id}/{context_type}/{context_id}/patterns",
            get(get_presence_patterns),
        )
        .route(
            "/api/presence/{user_id}/{context_type}/{context_id}/quality",
            get(get_presence_quality),
        )
        .route(
            "/api/presence/{user_id}/{context_type}/{context_id}/reconnections",
            get(get_reconnection_stats),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Presence server
///
/// # Example
///
/// ```ignore
/// let server = Server::new(coordinator);
/// server.run("127.0.0.1".to_string(), 8080).await?;
/// ```
pub struct Server {
    /// PresenceCoordinator（プレゼンスのファサード）
    coordinator: Arc<PresenceCoordinator>,
}

impl Server {
    pub fn new(coordinator: Arc<PresenceCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Run the presence server until a shutdown signal arrives
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to the specified address or
    /// if there's an error during server execution.
    pub async fn run(self, host: String, port: u16) -> Result<(), Box<dyn std::error::Error>> {
        let app = build_router(self.coordinator);

        // Bind the server to the host and port
        let bind_addr = format!("{}:{}", host, port);
        let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

        tracing::info!("Presence server listening on {}", listener.local_addr()?);
        tracing::info!(
            "Connect to: ws://{}/ws?user_id=<user>&context_type=<type>&context_id=<id>",
            bind_addr
        );
        tracing::info!("Press Ctrl+C to shutdown gracefully");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Server shutdown complete");

        Ok(())
    }
}
