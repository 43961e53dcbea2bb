//! HTTP server exposing the engine
//!
//! JSON endpoints for parsing, detection, conversation state and sandbox
//! access, plus SSE streams for apply, generate and package installs.

mod events;
mod request_log;
pub mod routes;
pub mod state;

pub use events::{sse_response, to_sse_event};
pub use request_log::RequestLogLayer;
pub use state::ServerAppState;

use crate::config::ServerConfig;
use axum::{
    http::{header::ACCEPT, header::CONTENT_TYPE, HeaderName, HeaderValue},
    routing::{get, post},
    Router,
};
use routes::{parse_routes, sandbox_routes, state_routes, stream_routes, PROJECT_ID_HEADER};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

fn cors_layer(origins: &[String]) -> CorsLayer {
    let headers = [
        CONTENT_TYPE,
        ACCEPT,
        HeaderName::from_static(PROJECT_ID_HEADER),
    ];
    if origins.is_empty() {
        // Permissive CORS: allow any origin (default for development)
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(headers)
    } else {
        let allowed_origins: Vec<HeaderValue> =
            origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(allowed_origins)
            .allow_methods(Any)
            .allow_headers(headers)
    }
}

/// Build the router with all routes and layers
pub fn build_router(state: ServerAppState, cors_origins: &[String]) -> Router {
    // Layer order: cors (outer) -> request log -> handler
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/parse", post(parse_routes::parse_handler))
        .route(
            "/api/detect-packages",
            post(parse_routes::detect_packages_handler),
        )
        .route(
            "/api/apply-ai-code-stream",
            post(stream_routes::apply_stream_handler),
        )
        .route(
            "/api/generate-ai-code-stream",
            post(stream_routes::generate_stream_handler),
        )
        .route(
            "/api/conversation-state",
            get(state_routes::get_state_handler)
                .post(state_routes::post_state_handler)
                .delete(state_routes::delete_state_handler),
        )
        .route("/api/activity", get(state_routes::activity_handler))
        .route(
            "/api/sandbox-files",
            get(sandbox_routes::list_files_handler),
        )
        .route("/api/run-command", post(sandbox_routes::run_command_handler))
        .route(
            "/api/install-packages",
            post(sandbox_routes::install_packages_handler),
        )
        .route(
            "/api/projects",
            get(state_routes::list_projects_handler).delete(state_routes::delete_project_handler),
        )
        .layer(RequestLogLayer::new())
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

/// Run the HTTP server until shutdown is requested
pub async fn run_server(config: &ServerConfig, state: ServerAppState) -> Result<(), String> {
    let addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let shutdown_state = state.shutdown_state.clone();
    let app = build_router(state, &config.cors_origins);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;

    log::info!("Server listening on http://{}", addr);
    if config.cors_origins.is_empty() {
        log::info!("CORS: any origin");
    } else {
        log::info!("CORS: {}", config.cors_origins.join(", "));
    }

    let shutdown_signal = async move {
        shutdown_state.requested().await;
        log::info!("Shutdown signal received, stopping server...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| format!("Server error: {}", e))
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "OK"
}
