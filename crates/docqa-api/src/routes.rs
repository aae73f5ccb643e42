//! Router setup with all API routes and middleware.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use docqa_core::error::Result;

use crate::handlers;
use crate::state::AppState;

/// Create the axum Router with all routes and middleware.
///
/// Request bodies are capped at `api.max_upload_bytes`. CORS admits
/// localhost origins on the configured port.
pub fn create_router(state: AppState) -> Router {
    let api = &state.service.config().api;
    let body_limit = api.max_upload_bytes;
    let origins: Vec<HeaderValue> = ["127.0.0.1", "localhost"]
        .iter()
        .filter_map(|host| HeaderValue::from_str(&format!("http://{}:{}", host, api.port)).ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/upload", post(handlers::upload))
        .route("/documents", get(handlers::documents))
        .route("/ingest", post(handlers::ingest))
        .route("/query", get(handlers::query))
        .route("/query_structured", post(handlers::query_structured))
        .route("/clear", post(handlers::clear))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API on `api.host:api.port` until Ctrl-C.
pub async fn start_server(state: AppState) -> Result<()> {
    let api = &state.service.config().api;
    let addr = format!("{}:{}", api.host, api.port);
    let router = create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        tracing::error!(addr = %addr, error = %e, "Failed to bind, is another instance running?");
        e
    })?;
    tracing::info!(addr = %addr, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;
    Ok(())
}
