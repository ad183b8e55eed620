//! WebAPI - HTTP endpoints and observer transport
//!
//! ## Responsibilities
//!
//! - Registry read endpoint
//! - WebSocket upgrade into the RealtimeHub
//! - Health check

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let cameras = state
        .store
        .snapshot()
        .await
        .map(|r| r.len())
        .unwrap_or(0);

    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cameras,
        observers: state.realtime.connection_count(),
    };

    Json(response)
}
