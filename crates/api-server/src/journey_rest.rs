//! Journey management and execution REST endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use carepath_core::types::{Journey, JourneyRun, PatientContext, RunStatus};
use carepath_journey::{parse_journey_draft, parse_patient_context};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;
use crate::rest::AppState;

/// Path ids that are not UUIDs cannot name a stored record.
fn parse_id(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw).ok()
}

/// POST /api/journeys — Create a journey definition.
#[utoipa::path(
    post,
    path = "/api/journeys",
    tag = "Journeys",
    request_body = carepath_core::types::JourneyDraft,
    responses(
        (status = 201, description = "Journey created", body = CreateJourneyResponse),
        (status = 400, description = "Invalid journey definition", body = crate::rest::ErrorResponse),
    )
)]
pub async fn create_journey(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateJourneyResponse>), ApiError> {
    let Json(raw) = body?;
    let draft = parse_journey_draft(&raw)?;
    let journey = state.engine.submit_journey(draft).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateJourneyResponse {
            journey_id: journey.id,
        }),
    ))
}

/// GET /api/journeys — List journeys, newest first.
#[utoipa::path(
    get,
    path = "/api/journeys",
    tag = "Journeys",
    responses(
        (status = 200, description = "All journeys", body = JourneyListResponse),
    )
)]
pub async fn list_journeys(
    State(state): State<AppState>,
) -> Result<Json<JourneyListResponse>, ApiError> {
    let journeys = state.engine.list_journeys().await?;
    Ok(Json(JourneyListResponse { journeys }))
}

/// GET /api/journeys/{journeyId} — Fetch one journey.
#[utoipa::path(
    get,
    path = "/api/journeys/{journeyId}",
    tag = "Journeys",
    params(("journeyId" = String, Path, description = "Journey id")),
    responses(
        (status = 200, description = "The journey", body = Journey),
        (status = 404, description = "Journey not found", body = crate::rest::ErrorResponse),
    )
)]
pub async fn get_journey(
    State(state): State<AppState>,
    Path(journey_id): Path<String>,
) -> Result<Json<Journey>, ApiError> {
    let id = parse_id(&journey_id).ok_or(ApiError::JourneyNotFound)?;
    Ok(Json(state.engine.get_journey(id).await?))
}

/// POST /api/journeys/{journeyId}/trigger — Start a run for a patient.
#[utoipa::path(
    post,
    path = "/api/journeys/{journeyId}/trigger",
    tag = "Execution",
    params(("journeyId" = String, Path, description = "Journey id")),
    request_body = PatientContext,
    responses(
        (status = 202, description = "Run started", body = TriggerResponse,
            headers(("Location" = String, description = "Run status URL"))),
        (status = 400, description = "Invalid patient context", body = crate::rest::ErrorResponse),
        (status = 404, description = "Journey not found", body = crate::rest::ErrorResponse),
    )
)]
pub async fn trigger_journey(
    State(state): State<AppState>,
    Path(journey_id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(raw) = body?;
    let context = parse_patient_context(&raw)?;
    let journey_id = parse_id(&journey_id).ok_or(ApiError::JourneyNotFound)?;

    let run_id = state.engine.start(journey_id, context).await?;
    info!(run_id = %run_id, journey_id = %journey_id, "Journey triggered");

    Ok((
        StatusCode::ACCEPTED,
        [(header::LOCATION, format!("/api/journeys/runs/{run_id}"))],
        Json(TriggerResponse { run_id }),
    ))
}

/// GET /api/journeys/runs/{runId} — Poll a run's progress.
#[utoipa::path(
    get,
    path = "/api/journeys/runs/{runId}",
    tag = "Execution",
    params(("runId" = String, Path, description = "Run id")),
    responses(
        (status = 200, description = "Run status", body = RunStatusResponse),
        (status = 404, description = "Journey run not found", body = crate::rest::ErrorResponse),
    )
)]
pub async fn get_run_status(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunStatusResponse>, ApiError> {
    let id = parse_id(&run_id).ok_or(ApiError::RunNotFound)?;
    let run = state.engine.run_status(id).await?;
    Ok(Json(run.into()))
}

/// POST /api/journeys/runs/{runId}/cancel — Stop a run and mark it failed.
#[utoipa::path(
    post,
    path = "/api/journeys/runs/{runId}/cancel",
    tag = "Execution",
    params(("runId" = String, Path, description = "Run id")),
    responses(
        (status = 200, description = "Run cancelled", body = RunStatusResponse),
        (status = 404, description = "Journey run not found", body = crate::rest::ErrorResponse),
        (status = 409, description = "Run already finished", body = crate::rest::ErrorResponse),
    )
)]
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunStatusResponse>, ApiError> {
    let id = parse_id(&run_id).ok_or(ApiError::RunNotFound)?;
    let run = state.engine.cancel(id).await?;
    Ok(Json(run.into()))
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateJourneyResponse {
    pub journey_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct JourneyListResponse {
    pub journeys: Vec<Journey>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    pub run_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunStatusResponse {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub current_node_id: Option<String>,
    pub patient_context: PatientContext,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<JourneyRun> for RunStatusResponse {
    fn from(run: JourneyRun) -> Self {
        Self {
            run_id: run.id,
            status: run.status,
            current_node_id: run.current_node_id,
            patient_context: run.patient_context,
            created_at: run.created_at,
            updated_at: run.updated_at,
            completed_at: run.completed_at,
        }
    }
}
