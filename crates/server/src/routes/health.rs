//! Health check endpoint

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    resource_types: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

/// Ping the database and confirm the version ledger table is reachable
async fn check_storage(state: &AppState) -> Result<(), String> {
    let client = state
        .pool
        .get()
        .await
        .map_err(|e| format!("Database connection failed: {}", e))?;
    client
        .query_opt("SELECT 1 FROM resource_versions LIMIT 1", &[])
        .await
        .map_err(|e| format!("Ledger query failed: {}", e))?;
    Ok(())
}

/// GET /health - Report database and ledger availability
pub async fn check(State(state): State<AppState>) -> impl IntoResponse {
    let resource_types = state.registry.definitions().len();
    match check_storage(&state).await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy",
                resource_types,
                reason: None,
            }),
        ),
        Err(reason) => {
            tracing::error!(reason = %reason, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy",
                    resource_types,
                    reason: Some(reason),
                }),
            )
        }
    }
}
