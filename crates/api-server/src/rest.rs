//! Shared handler state and operational endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use carepath_journey::JourneyEngine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;
use utoipa::ToSchema;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: JourneyEngine,
    pub node_id: String,
    pub environment: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(engine: JourneyEngine, node_id: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            engine,
            node_id: node_id.into(),
            environment: environment.into(),
            start_time: Instant::now(),
        }
    }
}

/// GET /health — Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Operations",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        environment: state.environment.clone(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready — Readiness probe. The router is only served after unfinished
/// runs have been resumed, so reaching this handler means ready.
#[utoipa::path(
    get,
    path = "/ready",
    tag = "Operations",
    responses(
        (status = 200, description = "Ready to accept traffic"),
    )
)]
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// GET /live — Liveness probe.
#[utoipa::path(
    get,
    path = "/live",
    tag = "Operations",
    responses(
        (status = 200, description = "Process is alive"),
    )
)]
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Fallback for unmatched routes.
pub async fn route_not_found() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "Route not found".to_string(),
        }),
    )
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub environment: String,
    pub node_id: String,
    pub uptime_secs: u64,
}
