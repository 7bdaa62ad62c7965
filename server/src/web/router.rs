use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};

use super::app_state::AppState;
use super::rest_api;

/// Build the axum router with every API route, falling back to the
/// dashboard's static files.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Read-only
        .route("/api/health", get(rest_api::health))
        .route("/api/default-channels", get(rest_api::default_channels))
        .route("/api/inactive-defaults", get(rest_api::inactive_defaults))
        .route("/api/scan-status", get(rest_api::scan_status))
        .route("/api/inactive-status", get(rest_api::inactive_status))
        .route("/api/csv-files", get(rest_api::csv_files))
        // Scans
        .route("/api/zero-messages", post(rest_api::start_zero_scan))
        .route("/api/inactive-scan", post(rest_api::start_inactive_scan))
        .route("/api/cancel-scan", post(rest_api::cancel_zero_scan))
        .route("/api/cancel-inactive", post(rest_api::cancel_inactive_scan))
        // Cleanup jobs
        .route("/api/kick-from-csv", post(rest_api::kick_from_csv))
        .route("/api/cancel-kick", post(rest_api::cancel_kick))
        .route("/api/cleanup-roles", post(rest_api::cleanup_roles))
        .route("/api/inactive-channels", post(rest_api::inactive_channels));

    let static_dir = PathBuf::from(&state.config.server.static_dir);
    Router::new()
        .merge(api_routes)
        // Static files with SPA fallback: unmatched routes serve index.html
        .fallback_service(
            ServeDir::new(&static_dir).fallback(ServeFile::new(static_dir.join("index.html"))),
        )
        .layer(cors)
        .with_state(state)
}
