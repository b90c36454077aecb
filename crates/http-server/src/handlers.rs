use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use simulation_core::{SimulationError, SimulationService};
use tracing::error;
use types::SimulateRequest;

/// `POST /simulate`. 200 on success, 422 when the simulated transaction
/// itself failed (the body still carries the decoded error and report), 400
/// on request-shape problems, 500 when the fork could not be restored or
/// something unexpected broke.
pub async fn simulate(
    State(service): State<Arc<SimulationService>>,
    Json(request): Json<SimulateRequest>,
) -> Response {
    match service.simulate(&request).await {
        Ok(response) => {
            let status = if response.success {
                StatusCode::OK
            } else {
                StatusCode::UNPROCESSABLE_ENTITY
            };
            (status, Json(response)).into_response()
        }
        Err(SimulationError::InvalidRequest(message)) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
        }
        Err(err) => {
            error!(error = %err, fatal = err.is_fatal(), "simulation request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

/// `GET /health`. `ok` only when both fork backends answer their probes.
pub async fn health(State(service): State<Arc<SimulationService>>) -> Response {
    let health = service.health().await;
    Json(json!({
        "status": if health.ok { "ok" } else { "degraded" },
        "evm": health.evm,
        "substrate": health.substrate,
    }))
    .into_response()
}
