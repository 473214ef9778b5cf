pub mod health;
pub mod metadata;
pub mod metrics;
mod resource;

use axum::{Router, routing::get, routing::post};

use crate::state::AppState;

/// Build FHIR routes
pub fn fhir_routes() -> Router<AppState> {
    Router::new()
        .route("/metadata", get(metadata::get))
        .route(
            "/{resource_type}",
            get(resource::search).post(resource::create),
        )
        .route("/{resource_type}/_search", post(resource::search_post))
        .route(
            "/{resource_type}/{id}",
            get(resource::read)
                .put(resource::update)
                .patch(resource::patch)
                .delete(resource::delete),
        )
        .route("/{resource_type}/{id}/_history", get(resource::history))
        .route(
            "/{resource_type}/{id}/_history/{vid}",
            get(resource::vread),
        )
}
