//! API request handlers
//!
//! Every command endpoint returns the EA's reply verbatim on success.

use super::AppState;
use crate::bridge::BridgeError;
use crate::types::OrderRequest;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, warn};

// ==========================================
// Response Helpers
// ==========================================

fn error_body(status: StatusCode, error: &str) -> Response {
    (
        status,
        Json(serde_json::json!({
            "success": false,
            "error": error
        })),
    )
        .into_response()
}

pub fn bad_request(error: &str) -> Response {
    error_body(StatusCode::BAD_REQUEST, error)
}

/// Map a bridge failure to an HTTP status
pub fn bridge_error_response(err: &BridgeError) -> Response {
    let status = match err {
        BridgeError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        BridgeError::Protocol(_) => StatusCode::BAD_GATEWAY,
        BridgeError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
    };
    error_body(status, &err.to_string())
}

fn relay(result: Result<Value, BridgeError>) -> Response {
    match result {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => {
            match &e {
                BridgeError::Timeout(_) => warn!("{}", e),
                _ => error!("{}", e),
            }
            bridge_error_response(&e)
        }
    }
}

// ==========================================
// Health & Status Handlers
// ==========================================

pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "online",
        "service": "MT5 TCP Bridge"
    }))
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": if state.bridge.is_shutting_down() { "shutting_down" } else { "healthy" },
        "tcp_host": state.config.tcp_host,
        "tcp_port": state.config.tcp_port,
        "bridge": state.bridge.stats(),
    }))
}

// ==========================================
// Command Handlers
// ==========================================

pub async fn create_order(
    State(state): State<Arc<AppState>>,
    body: Result<Json<OrderRequest>, JsonRejection>,
) -> Response {
    let Json(order) = match body {
        Ok(order) => order,
        Err(rejection) => return bad_request(&rejection.body_text()),
    };
    if let Err(reason) = order.validate() {
        return bad_request(&reason);
    }

    relay(state.bridge.place_order(&order).await)
}

pub async fn get_positions(State(state): State<Arc<AppState>>) -> Response {
    relay(state.bridge.get_positions().await)
}

pub async fn get_orders(State(state): State<Arc<AppState>>) -> Response {
    relay(state.bridge.get_orders().await)
}

pub async fn delete_order(
    State(state): State<Arc<AppState>>,
    Path(ticket): Path<u64>,
) -> Response {
    relay(state.bridge.delete_order(ticket).await)
}

pub async fn close_position(
    State(state): State<Arc<AppState>>,
    Path(ticket): Path<u64>,
) -> Response {
    relay(state.bridge.close_position(ticket).await)
}

pub async fn get_stats(State(state): State<Arc<AppState>>) -> Response {
    relay(state.bridge.get_stats().await)
}

/// Consolidates open take-profit levels so positions are protected while unattended
pub async fn safe_shutdown(State(state): State<Arc<AppState>>) -> Response {
    relay(state.bridge.safe_shutdown().await)
}
