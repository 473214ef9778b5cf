//! Resource version history and optimistic concurrency.
//!
//! Every write to a resource appends an immutable [`VersionRecord`] to a
//! per-resource ledger. Version ids run 1..N without gaps; a delete appends
//! a tombstone rather than erasing anything.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::FhirError;

pub type VersionId = u32;

/// (resource type, logical id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceKey {
    pub resource_type: String,
    pub id: String,
}

impl ResourceKey {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.id)
    }
}

/// The write that produced a version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionAction {
    Create,
    Update,
    Delete,
}

impl VersionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionAction::Create => "create",
            VersionAction::Update => "update",
            VersionAction::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(VersionAction::Create),
            "update" => Some(VersionAction::Update),
            "delete" => Some(VersionAction::Delete),
            _ => None,
        }
    }

    /// HTTP method of the interaction, as reported in history bundles
    pub fn http_method(&self) -> &'static str {
        match self {
            VersionAction::Create => "POST",
            VersionAction::Update => "PUT",
            VersionAction::Delete => "DELETE",
        }
    }
}

/// One immutable entry of a resource's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    pub key: ResourceKey,
    pub version_id: VersionId,
    pub action: VersionAction,
    /// FHIR representation at this version; `None` for delete tombstones
    pub snapshot: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl VersionRecord {
    pub fn is_tombstone(&self) -> bool {
        self.action == VersionAction::Delete
    }

    /// Weak ETag, `W/"n"`
    pub fn etag(&self) -> String {
        format!("W/\"{}\"", self.version_id)
    }

    /// HTTP-date for the Last-Modified header
    pub fn last_modified(&self) -> String {
        self.timestamp.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
    }

    /// FHIR instant for `meta.lastUpdated`
    pub fn last_updated(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// The snapshot with `id`, `meta.versionId` and `meta.lastUpdated` filled in.
    pub fn resource(&self) -> Option<Value> {
        let mut resource = self.snapshot.clone()?;
        if let Some(obj) = resource.as_object_mut() {
            obj.insert("id".to_string(), Value::String(self.key.id.clone()));
            let meta = obj.entry("meta").or_insert_with(|| json!({}));
            if let Some(meta) = meta.as_object_mut() {
                meta.insert(
                    "versionId".to_string(),
                    Value::String(self.version_id.to_string()),
                );
                meta.insert(
                    "lastUpdated".to_string(),
                    Value::String(self.last_updated()),
                );
            }
        }
        Some(resource)
    }
}

/// Parse an `If-Match` / ETag value (`W/"3"`, `"3"` or `3`) into a version id.
pub fn parse_etag(value: &str) -> Option<VersionId> {
    let value = value.trim();
    let value = value.strip_prefix("W/").unwrap_or(value);
    let value = value.trim_matches('"');
    value.parse().ok().filter(|v| *v >= 1)
}

/// Append-only ledger of resource versions.
///
/// Implementations must make the check-then-append of every write atomic
/// per key: a write that fails appends nothing, and of several concurrent
/// writers supplying the same expected version at most one succeeds.
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Record version 1 of a new resource.
    ///
    /// Fails with `AlreadyExists` if the key has any history, deleted or not.
    async fn record_create(
        &self,
        key: &ResourceKey,
        snapshot: Value,
    ) -> Result<VersionId, FhirError>;

    /// Record a new version if `expected` is still the current version.
    async fn record_update(
        &self,
        key: &ResourceKey,
        expected: VersionId,
        snapshot: Value,
    ) -> Result<VersionId, FhirError>;

    /// Record a delete tombstone if `expected` is still the current version.
    async fn record_delete(
        &self,
        key: &ResourceKey,
        expected: VersionId,
    ) -> Result<VersionId, FhirError>;

    /// Read one version (vread). Tombstones read as `Gone`.
    async fn get_version(
        &self,
        key: &ResourceKey,
        version: VersionId,
    ) -> Result<VersionRecord, FhirError>;

    /// Latest version. `Gone` if the resource has been deleted.
    async fn get_current(&self, key: &ResourceKey) -> Result<VersionRecord, FhirError>;

    /// Full history, newest first. Empty for unknown keys.
    async fn list_history(&self, key: &ResourceKey) -> Result<Vec<VersionRecord>, FhirError>;
}

/// Check an expected version against the latest record of a key.
///
/// Shared by the ledger implementations so both apply the same rules.
pub fn check_expected(
    key: &ResourceKey,
    latest: Option<(VersionId, VersionAction)>,
    expected: VersionId,
) -> Result<VersionId, FhirError> {
    match latest {
        None => Err(FhirError::NotFound(key.to_string())),
        Some((_, VersionAction::Delete)) => Err(FhirError::VersionConflict {
            key: key.to_string(),
            expected,
            current: None,
        }),
        Some((version, _)) if version != expected => Err(FhirError::VersionConflict {
            key: key.to_string(),
            expected,
            current: Some(version),
        }),
        Some((version, _)) => Ok(version + 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(action: VersionAction, snapshot: Option<Value>) -> VersionRecord {
        VersionRecord {
            key: ResourceKey::new("Condition", "c1"),
            version_id: 3,
            action,
            snapshot,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap(),
        }
    }

    #[test]
    fn resource_is_stamped_with_meta() {
        let r = record(
            VersionAction::Update,
            Some(json!({"resourceType": "Condition", "meta": {"source": "x"}})),
        );
        let resource = r.resource().unwrap();

        assert_eq!(resource["id"], "c1");
        assert_eq!(resource["meta"]["versionId"], "3");
        assert_eq!(resource["meta"]["lastUpdated"], "2024-03-05T14:07:09.000Z");
        assert_eq!(resource["meta"]["source"], "x");
        assert_eq!(r.etag(), "W/\"3\"");
        assert_eq!(r.last_modified(), "Tue, 05 Mar 2024 14:07:09 GMT");
    }

    #[test]
    fn tombstones_have_no_resource() {
        let r = record(VersionAction::Delete, None);
        assert!(r.is_tombstone());
        assert!(r.resource().is_none());
    }

    #[test]
    fn etag_parsing() {
        assert_eq!(parse_etag("W/\"3\""), Some(3));
        assert_eq!(parse_etag("\"12\""), Some(12));
        assert_eq!(parse_etag(" 7 "), Some(7));
        assert_eq!(parse_etag("W/\"0\""), None);
        assert_eq!(parse_etag("*"), None);
    }

    #[test]
    fn expected_version_rules() {
        let key = ResourceKey::new("Flag", "f1");
        assert_eq!(
            check_expected(&key, None, 1),
            Err(FhirError::NotFound("Flag/f1".into()))
        );
        assert_eq!(
            check_expected(&key, Some((2, VersionAction::Update)), 2),
            Ok(3)
        );
        assert!(matches!(
            check_expected(&key, Some((2, VersionAction::Update)), 1),
            Err(FhirError::VersionConflict {
                current: Some(2),
                ..
            })
        ));
        assert!(matches!(
            check_expected(&key, Some((2, VersionAction::Delete)), 2),
            Err(FhirError::VersionConflict { current: None, .. })
        ));
    }
}
