//! Shared application state

use std::sync::Arc;

use deadpool_postgres::Pool;
use ehr_core::VersionStore;

use crate::resources::ResourceRegistry;

/// State handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub versions: Arc<dyn VersionStore>,
    pub registry: Arc<ResourceRegistry>,
    /// Public FHIR base URL, no trailing slash
    pub base_url: String,
}
