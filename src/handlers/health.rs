use axum::{extract::State, http::StatusCode, Json};
use tracing::{debug, error};

use crate::models::HealthResponse;
use crate::state::SharedState;

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Server is running".to_string(),
    })
}

/// Readiness check endpoint; ready once the document store answers.
pub async fn ready_check(State(state): State<SharedState>) -> (StatusCode, Json<HealthResponse>) {
    debug!("Readiness check requested");
    match state.store().get("00000000-0000-0000-0000-000000000000").await {
        Ok(_) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".to_string(),
                message: "Service is ready".to_string(),
            }),
        ),
        Err(e) => {
            error!("Document store not reachable: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable".to_string(),
                    message: format!("Document store not reachable: {}", e),
                }),
            )
        }
    }
}
