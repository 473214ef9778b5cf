//! Metadata endpoint handler

use axum::{Json, extract::State};
use ehr_core::CapabilityStatement;

use crate::state::AppState;

/// GET /metadata - Return server capability statement
pub async fn get(State(state): State<AppState>) -> Json<CapabilityStatement> {
    let resources = state
        .registry
        .definitions()
        .into_iter()
        .map(|definition| definition.capability())
        .collect();
    Json(CapabilityStatement::new(resources))
}
