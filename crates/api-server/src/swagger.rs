//! OpenAPI specification and Swagger UI configuration.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "CarePath Journey API",
        version = "0.1.0",
        description = "Orchestrates patient care journeys: directed graphs of MESSAGE, DELAY and CONDITIONAL nodes walked against a patient's data.\n\n1. Create a journey with POST /api/journeys\n2. Trigger it for a patient with POST /api/journeys/{journeyId}/trigger\n3. Poll the run with GET /api/journeys/runs/{runId}",
        license(name = "MIT"),
    ),
    tags(
        (name = "Journeys", description = "Journey definition management"),
        (name = "Execution", description = "Journey runs: trigger, monitor, cancel"),
        (name = "Operations", description = "Health, readiness, and liveness probes"),
    ),
    paths(
        // Journeys
        crate::journey_rest::create_journey,
        crate::journey_rest::list_journeys,
        crate::journey_rest::get_journey,
        // Execution
        crate::journey_rest::trigger_journey,
        crate::journey_rest::get_run_status,
        crate::journey_rest::cancel_run,
        // Operations
        crate::rest::health_check,
        crate::rest::readiness,
        crate::rest::liveness,
    ),
    components(schemas(
        // Journey graph
        carepath_core::types::Journey,
        carepath_core::types::JourneyDraft,
        carepath_core::types::Node,
        carepath_core::types::MessageNode,
        carepath_core::types::DelayNode,
        carepath_core::types::ConditionalNode,
        carepath_core::types::Condition,
        carepath_core::types::Operator,
        // Patients and runs
        carepath_core::types::PatientContext,
        carepath_core::types::Language,
        carepath_core::types::CareCondition,
        carepath_core::types::RunStatus,
        carepath_core::types::JourneyRun,
        // REST envelopes
        crate::journey_rest::CreateJourneyResponse,
        crate::journey_rest::JourneyListResponse,
        crate::journey_rest::TriggerResponse,
        crate::journey_rest::RunStatusResponse,
        crate::rest::ErrorResponse,
        crate::rest::HealthResponse,
    ))
)]
pub struct ApiDoc;
