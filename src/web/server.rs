//! Status server setup and routing

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use super::handlers;
use super::state::AppState;

/// Build the status API router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/servers", get(handlers::api_list_servers))
        .route("/api/servers/:server_id", get(handlers::api_get_server))
        .route("/api/announcements", post(handlers::api_announce))
        .layer(cors)
        .with_state(state)
}

/// Serve the status API until the process exits
pub async fn start_server(port: u16, state: AppState) -> anyhow::Result<()> {
    let app = router(Arc::new(state));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting status API on http://localhost:{}", port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
