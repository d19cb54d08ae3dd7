//! HTTP server wiring for the tile map API.

use axum::{
    http::{header::CONTENT_TYPE, Method},
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{self, AppState};
use crate::core::error::Result;
use crate::storage::tile_store::TileStore;

/// Creates the application router with all routes and middleware.
pub fn create_app<S: TileStore>(state: AppState<S>) -> Router {
    // Tiles are fetched cross-origin by map front-ends.
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([CONTENT_TYPE])
        .allow_origin(Any);

    Router::new()
        // Tile routes
        .route("/tiles/:map/:index/:z/:x/:y", get(handlers::tile_image::<S>))
        .route(
            "/tiles/:map/:index/:z/:x/:y/meta",
            get(handlers::tile_meta::<S>),
        )
        // Timeline routes
        .route(
            "/api/v1/maps/:map/timeline",
            get(handlers::timeline_list::<S>).post(handlers::timeline_insert::<S>),
        )
        .route(
            "/api/v1/maps/:map/timeline/:index",
            delete(handlers::timeline_delete::<S>),
        )
        // Tile mutation routes
        .route(
            "/api/v1/maps/:map/tiles/:index/:z/:x/:y/generate",
            post(handlers::tile_generate::<S>),
        )
        .route(
            "/api/v1/maps/:map/tiles/:index/:z/:x/:y",
            delete(handlers::tile_delete::<S>),
        )
        // System routes
        .route("/api/v1/health", get(handlers::health_check))
        // Apply middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Start the HTTP server and run until shutdown is signalled.
pub async fn start_server<S: TileStore>(addr: SocketAddr, state: AppState<S>) -> Result<()> {
    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Health check available at http://{}/api/v1/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => tracing::error!(error = %err, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
