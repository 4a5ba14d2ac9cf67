//! API module - Axum HTTP server and routes
//!
//! One endpoint per EA command, plus banner and health routes.

mod handlers;

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all handlers
pub struct AppState {
    pub bridge: Arc<Bridge>,
    pub config: BridgeConfig,
}

/// Create the main application router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ==========================================
        // Status & Health
        // ==========================================
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))

        // ==========================================
        // Orders
        // ==========================================
        .route("/order", post(handlers::create_order))
        .route("/order/:ticket", delete(handlers::delete_order))
        .route("/orders", get(handlers::get_orders))

        // ==========================================
        // Positions
        // ==========================================
        .route("/positions", get(handlers::get_positions))
        .route("/position/:ticket", delete(handlers::close_position))

        // ==========================================
        // Account
        // ==========================================
        .route("/stats", get(handlers::get_stats))
        .route("/safe-shutdown", post(handlers::safe_shutdown))

        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
