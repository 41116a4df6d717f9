//! API server: HTTP routes, Swagger UI, and the metrics exporter.

use crate::journey_rest;
use crate::rest::{self, AppState};
use crate::swagger::ApiDoc;
use axum::routing::{get, post};
use axum::Router;
use carepath_core::config::AppConfig;
use carepath_journey::JourneyEngine;
use std::future::Future;
use std::net::SocketAddr;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Builds the full HTTP application around `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Journeys
        .route(
            "/api/journeys",
            post(journey_rest::create_journey).get(journey_rest::list_journeys),
        )
        .route("/api/journeys/:journey_id", get(journey_rest::get_journey))
        // Execution
        .route(
            "/api/journeys/:journey_id/trigger",
            post(journey_rest::trigger_journey),
        )
        .route("/api/journeys/runs/:run_id", get(journey_rest::get_run_status))
        .route(
            "/api/journeys/runs/:run_id/cancel",
            post(journey_rest::cancel_run),
        )
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        // Documentation
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .fallback(rest::route_not_found)
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Main API server for the journey service.
pub struct ApiServer {
    config: AppConfig,
    engine: JourneyEngine,
}

impl ApiServer {
    pub fn new(config: AppConfig, engine: JourneyEngine) -> Self {
        Self { config, engine }
    }

    /// Serve the REST API until `shutdown` resolves, then drain connections.
    pub async fn start_http<F>(&self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let state = AppState::new(
            self.engine.clone(),
            self.config.node_id.clone(),
            self.config.environment.clone(),
        );
        let app = router(state);

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");
        info!(url = %format!("http://{addr}/swagger-ui"), "API documentation");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }

    /// Start the Prometheus exporter on its own port.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.metrics.port);
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use carepath_core::config::EngineConfig;
    use carepath_journey::demo::recovery_journey_draft;
    use carepath_journey::{MemoryStore, RecordingChannel};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app() -> Router {
        let store = Arc::new(MemoryStore::new());
        let engine = JourneyEngine::new(store.clone(), store, &EngineConfig::default())
            .with_channel(Arc::new(RecordingChannel::new()));
        router(AppState::new(engine, "node-test", "test"))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, _, body) = send_full(app, method, uri, body).await;
        (status, body)
    }

    async fn send_full(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, axum::http::HeaderMap, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, headers, value)
    }

    fn demo_journey() -> Value {
        serde_json::to_value(recovery_journey_draft()).unwrap()
    }

    fn senior_patient() -> Value {
        json!({"id": "patient-001", "age": 72, "language": "en", "condition": "knee_replacement"})
    }

    async fn create(app: &Router) -> String {
        let (status, body) = send(app, "POST", "/api/journeys", Some(demo_journey())).await;
        assert_eq!(status, StatusCode::CREATED);
        body["journeyId"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_create_get_and_list_journeys() {
        let app = app();
        let journey_id = create(&app).await;

        let (status, body) = send(&app, "GET", &format!("/api/journeys/{journey_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], journey_id.as_str());
        assert_eq!(body["name"], "Hip Replacement Recovery Journey");
        assert_eq!(body["nodes"][1]["type"], "CONDITIONAL");

        let second = create(&app).await;
        let (status, body) = send(&app, "GET", "/api/journeys", None).await;
        assert_eq!(status, StatusCode::OK);
        let journeys = body["journeys"].as_array().unwrap();
        assert_eq!(journeys.len(), 2);
        assert_eq!(journeys[0]["id"], second.as_str());
    }

    #[tokio::test]
    async fn test_invalid_journey_is_rejected() {
        let app = app();
        let mut journey = demo_journey();
        journey["start_node_id"] = json!("nowhere");

        let (status, body) = send(&app, "POST", "/api/journeys", Some(journey)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "start_node_id must reference an existing node");

        let (_, body) = send(&app, "GET", "/api/journeys", None).await;
        assert!(body["journeys"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_journey_lookups() {
        let app = app();
        let (status, body) = send(&app, "GET", "/api/journeys/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Journey not found");

        let missing = uuid::Uuid::new_v4();
        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/journeys/{missing}/trigger"),
            Some(senior_patient()),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Journey not found");
    }

    #[tokio::test]
    async fn test_context_validated_before_journey_lookup() {
        let app = app();
        let missing = uuid::Uuid::new_v4();
        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/journeys/{missing}/trigger"),
            Some(json!({"id": "p", "age": -1, "language": "en", "condition": "knee_replacement"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"],
            "Patient age is required and must be a non-negative number"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_and_poll_to_completion() {
        let app = app();
        let journey_id = create(&app).await;

        let (status, headers, body) = send_full(
            &app,
            "POST",
            &format!("/api/journeys/{journey_id}/trigger"),
            Some(senior_patient()),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let run_id = body["runId"].as_str().unwrap().to_string();
        assert_eq!(
            headers[header::LOCATION].to_str().unwrap(),
            format!("/api/journeys/runs/{run_id}")
        );

        let mut last = Value::Null;
        for _ in 0..100 {
            let (status, body) = send(&app, "GET", &format!("/api/journeys/runs/{run_id}"), None).await;
            assert_eq!(status, StatusCode::OK);
            last = body;
            if last["status"] == "completed" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        assert_eq!(last["status"], "completed");
        assert_eq!(last["runId"], run_id.as_str());
        assert!(last["currentNodeId"].is_null());
        assert!(last["completedAt"].is_string());
        assert_eq!(last["patientContext"]["age"], 72);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_run() {
        let app = app();
        let journey_id = create(&app).await;
        let (_, body) = send(
            &app,
            "POST",
            &format!("/api/journeys/{journey_id}/trigger"),
            Some(senior_patient()),
        )
        .await;
        let run_id = body["runId"].as_str().unwrap().to_string();

        let (status, body) = send(&app, "POST", &format!("/api/journeys/runs/{run_id}/cancel"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "failed");
        assert!(body["completedAt"].is_string());

        let (status, _) = send(&app, "POST", &format!("/api/journeys/runs/{run_id}/cancel"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        tokio::time::sleep(Duration::from_secs(30)).await;
        let (_, body) = send(&app, "GET", &format!("/api/journeys/runs/{run_id}"), None).await;
        assert_eq!(body["status"], "failed");
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let app = app();
        let (status, body) = send(&app, "GET", "/api/journeys/runs/12345", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Journey run not found");

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/journeys/runs/{}/cancel", uuid::Uuid::new_v4()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let app = app();
        let request = Request::builder()
            .method("POST")
            .uri("/api/journeys")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_operational_routes() {
        let app = app();
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["environment"], "test");
        assert_eq!(body["node_id"], "node-test");

        let (status, _) = send(&app, "GET", "/ready", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "GET", "/live", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, "GET", "/no/such/route", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Route not found");
    }

    #[tokio::test]
    async fn test_openapi_document_is_served() {
        let app = app();
        let (status, body) = send(&app, "GET", "/api-docs/openapi.json", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/api/journeys"].is_object());
        assert!(body["paths"]["/api/journeys/runs/{runId}"].is_object());
        assert!(body["components"]["schemas"]["PatientContext"].is_object());
    }
}
