//! Generic FHIR resource handlers
//!
//! One handler set serves every registered resource type. Writes go through
//! the version ledger, reads of a single resource come from the ledger and
//! searches run against the per-type search tables.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use ehr_core::search::sort_clause;
use ehr_core::version::parse_etag;
use ehr_core::{
    Bundle, BundleEntry, FhirError, Paging, PatchDialect, ResourceKey, SearchPage, SearchRequest,
    VersionId, VersionRecord, apply_patch, build_search,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::db::ResourceRepository;
use crate::error::AppError;
use crate::resources::ResourceDefinition;
use crate::state::AppState;

const DEFAULT_SORT: &str = "last_updated DESC, id";

fn definition<'a>(
    state: &'a AppState,
    resource_type: &str,
) -> Result<&'a ResourceDefinition, AppError> {
    state.registry.get(resource_type).ok_or_else(|| {
        AppError::Fhir(FhirError::NotFound(format!(
            "Unknown resource type '{}'",
            resource_type
        )))
    })
}

/// Parse a request body as a resource of the given type
fn parse_resource(body: &[u8], resource_type: &str) -> Result<JsonValue, FhirError> {
    let resource: JsonValue = serde_json::from_slice(body)
        .map_err(|e| FhirError::Invalid(format!("body is not JSON: {}", e)))?;

    match resource.get("resourceType").and_then(JsonValue::as_str) {
        Some(t) if t == resource_type => Ok(resource),
        Some(other) => Err(FhirError::Invalid(format!(
            "expected resourceType '{}', got '{}'",
            resource_type, other
        ))),
        None if resource.is_object() => Err(FhirError::Invalid(
            "missing required field resourceType".to_string(),
        )),
        None => Err(FhirError::Invalid(
            "body must be a JSON object".to_string(),
        )),
    }
}

/// Version named by `If-Match`, if the header is present
fn if_match(headers: &HeaderMap) -> Result<Option<VersionId>, AppError> {
    let Some(value) = headers.get(header::IF_MATCH) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(parse_etag)
        .map(Some)
        .ok_or_else(|| AppError::BadRequest("Malformed If-Match header".to_string()))
}

fn header_value(value: String) -> Result<HeaderValue, AppError> {
    HeaderValue::try_from(value).map_err(|e| AppError::Internal(format!("Invalid header: {}", e)))
}

/// Response carrying a resource version with its ETag and Last-Modified
fn version_response(
    status: StatusCode,
    record: &VersionRecord,
    location: Option<String>,
) -> Result<Response, AppError> {
    let resource = record
        .resource()
        .ok_or_else(|| AppError::Fhir(FhirError::Gone(record.key.to_string())))?;

    let mut headers = HeaderMap::new();
    headers.insert(header::ETAG, header_value(record.etag())?);
    headers.insert(header::LAST_MODIFIED, header_value(record.last_modified())?);
    if let Some(location) = location {
        headers.insert(header::LOCATION, header_value(location)?);
    }

    Ok((status, headers, Json(resource)).into_response())
}

/// POST /fhir/{type} - Create a resource with a server-assigned id
pub async fn create(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    definition(&state, &resource_type)?;
    let mut resource = parse_resource(&body, &resource_type)?;

    let key = ResourceKey::new(resource_type, Uuid::new_v4().to_string());
    if let Some(obj) = resource.as_object_mut() {
        obj.insert("id".to_string(), JsonValue::String(key.id.clone()));
    }

    let version = state.versions.record_create(&key, resource).await?;
    let record = state.versions.get_version(&key, version).await?;
    tracing::info!(resource = %key, "Resource created");

    let location = format!("{}/{}/_history/{}", state.base_url, key, version);
    version_response(StatusCode::CREATED, &record, Some(location))
}

/// GET /fhir/{type}/{id} - Read the current version
pub async fn read(
    State(state): State<AppState>,
    Path((resource_type, id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    definition(&state, &resource_type)?;
    let key = ResourceKey::new(resource_type, id);
    let record = state.versions.get_current(&key).await?;
    version_response(StatusCode::OK, &record, None)
}

/// Expected version for a write: `If-Match` when given, else the current version
async fn expected_version(
    state: &AppState,
    key: &ResourceKey,
    headers: &HeaderMap,
) -> Result<VersionId, AppError> {
    match if_match(headers)? {
        Some(version) => Ok(version),
        None => Ok(state.versions.get_current(key).await?.version_id),
    }
}

/// PUT /fhir/{type}/{id} - Replace a resource
pub async fn update(
    State(state): State<AppState>,
    Path((resource_type, id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    definition(&state, &resource_type)?;
    let mut resource = parse_resource(&body, &resource_type)?;

    match resource.get("id").and_then(JsonValue::as_str) {
        Some(body_id) if body_id != id => {
            return Err(FhirError::Invalid(format!(
                "body id '{}' does not match URL id '{}'",
                body_id, id
            ))
            .into());
        }
        _ => {}
    }

    let key = ResourceKey::new(resource_type, id);
    if let Some(obj) = resource.as_object_mut() {
        obj.insert("id".to_string(), JsonValue::String(key.id.clone()));
    }

    let expected = expected_version(&state, &key, &headers).await?;
    let version = state.versions.record_update(&key, expected, resource).await?;
    let record = state.versions.get_version(&key, version).await?;
    tracing::info!(resource = %key, version, "Resource updated");

    version_response(StatusCode::OK, &record, None)
}

/// PATCH /fhir/{type}/{id} - JSON Patch or JSON Merge Patch
pub async fn patch(
    State(state): State<AppState>,
    Path((resource_type, id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    definition(&state, &resource_type)?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let dialect = PatchDialect::from_content_type(content_type).ok_or_else(|| {
        AppError::UnsupportedMediaType(format!(
            "Unsupported patch content type '{}'; use application/json-patch+json or application/merge-patch+json",
            content_type
        ))
    })?;

    let document: JsonValue = serde_json::from_slice(&body)
        .map_err(|e| FhirError::malformed_patch(None, format!("Invalid JSON: {}", e)))?;

    let key = ResourceKey::new(resource_type, id);
    let current = state.versions.get_current(&key).await?;
    let expected = if_match(&headers)?.unwrap_or(current.version_id);
    let base = current
        .resource()
        .ok_or_else(|| FhirError::Gone(key.to_string()))?;

    let patched = apply_patch(&base, dialect, &document).inspect_err(|err| {
        if err.is_patch_semantic() {
            tracing::info!(
                resource = %key,
                error = %err,
                "Patch does not apply to current version"
            );
        }
    })?;
    for field in ["resourceType", "id"] {
        if patched.get(field) != base.get(field) {
            return Err(FhirError::type_mismatch(
                None,
                format!("Patch may not change '{}'", field),
            )
            .into());
        }
    }

    let version = state.versions.record_update(&key, expected, patched).await?;
    let record = state.versions.get_version(&key, version).await?;
    tracing::info!(resource = %key, version, dialect = dialect.content_type(), "Resource patched");

    version_response(StatusCode::OK, &record, None)
}

/// DELETE /fhir/{type}/{id} - Record a tombstone
pub async fn delete(
    State(state): State<AppState>,
    Path((resource_type, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    definition(&state, &resource_type)?;
    let key = ResourceKey::new(resource_type, id);

    let expected = match if_match(&headers)? {
        Some(version) => version,
        None => match state.versions.get_current(&key).await {
            Ok(current) => current.version_id,
            Err(FhirError::Gone(_)) => return Ok(StatusCode::NO_CONTENT),
            Err(e) => return Err(e.into()),
        },
    };

    match state.versions.record_delete(&key, expected).await {
        Ok(version) => {
            tracing::info!(resource = %key, version, "Resource deleted");
            Ok(StatusCode::NO_CONTENT)
        }
        // A tombstone already ends the history
        Err(FhirError::VersionConflict { current: None, .. })
            if matches!(
                state.versions.get_current(&key).await,
                Err(FhirError::Gone(_))
            ) =>
        {
            Ok(StatusCode::NO_CONTENT)
        }
        Err(e) => Err(e.into()),
    }
}

/// GET /fhir/{type}/{id}/_history - Version history, newest first
pub async fn history(
    State(state): State<AppState>,
    Path((resource_type, id)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Result<Json<Bundle>, AppError> {
    definition(&state, &resource_type)?;
    let key = ResourceKey::new(resource_type, id);

    let mut records = state.versions.list_history(&key).await?;
    if records.is_empty() {
        return Err(FhirError::NotFound(key.to_string()).into());
    }

    let total = records.len() as u64;
    let request = SearchRequest::from_query(query.as_deref().unwrap_or(""));
    if request.get("_count").is_some() {
        let paging = Paging::from_request(&request)?;
        records.truncate(paging.limit as usize);
    }

    Ok(Json(Bundle::history(&records, total, &state.base_url)))
}

/// GET /fhir/{type}/{id}/_history/{vid} - Read one version
pub async fn vread(
    State(state): State<AppState>,
    Path((resource_type, id, vid)): Path<(String, String, String)>,
) -> Result<Response, AppError> {
    definition(&state, &resource_type)?;
    let key = ResourceKey::new(resource_type, id);

    let version: VersionId = vid
        .parse()
        .ok()
        .filter(|v| *v >= 1)
        .ok_or_else(|| FhirError::NotFound(format!("{}/_history/{}", key, vid)))?;

    let record = state.versions.get_version(&key, version).await?;
    version_response(StatusCode::OK, &record, None)
}

/// GET /fhir/{type} - Search
pub async fn search(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Json<Bundle>, AppError> {
    let request = SearchRequest::from_query(query.as_deref().unwrap_or(""));
    run_search(&state, &resource_type, request).await
}

/// POST /fhir/{type}/_search - Search with form-encoded parameters
pub async fn search_post(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Json<Bundle>, AppError> {
    let form = std::str::from_utf8(&body)
        .map_err(|_| AppError::BadRequest("Search body must be UTF-8".to_string()))?;

    let mut request = SearchRequest::from_query(query.as_deref().unwrap_or(""));
    request.extend(SearchRequest::from_query(form));
    run_search(&state, &resource_type, request).await
}

async fn run_search(
    state: &AppState,
    resource_type: &str,
    request: SearchRequest,
) -> Result<Json<Bundle>, AppError> {
    let definition = definition(state, resource_type)?;
    let config = definition.search_config();
    let paging = Paging::from_request(&request)?;
    let order_by = sort_clause(&request, &config, DEFAULT_SORT);

    let query = build_search(
        definition.table,
        &["resource"],
        &request,
        &config,
        &order_by,
    )?;
    let (total, resources) = ResourceRepository::new(state.pool.clone())
        .search(&query, paging)
        .await?;

    tracing::debug!(resource_type, total, returned = resources.len(), "Search executed");

    let type_url = format!("{}/{}", state.base_url, resource_type);
    let entries = resources
        .into_iter()
        .map(|resource| {
            let full_url = resource
                .get("id")
                .and_then(JsonValue::as_str)
                .map(|id| format!("{}/{}", type_url, id));
            BundleEntry::new(full_url, resource)
        })
        .collect();

    let page = SearchPage {
        base_url: type_url,
        query_string: request.to_query_string(),
        limit: paging.limit,
        offset: paging.offset,
        total,
    };
    Ok(Json(Bundle::searchset_with_links(entries, &page)))
}
