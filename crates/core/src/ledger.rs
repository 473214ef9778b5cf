//! In-memory version ledger

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::FhirError;
use crate::version::{
    ResourceKey, VersionAction, VersionId, VersionRecord, VersionStore, check_expected,
};

type History = Arc<RwLock<Vec<Arc<VersionRecord>>>>;

/// [`VersionStore`] kept in process memory.
///
/// Each key owns its own lock, so writers on different resources never
/// contend. Records are shared as `Arc`s and never mutated once appended.
#[derive(Debug, Default)]
pub struct InMemoryVersionStore {
    ledgers: DashMap<ResourceKey, History>,
}

impl InMemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records across all keys
    pub fn len(&self) -> usize {
        self.ledgers.iter().map(|entry| entry.value().read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn history(&self, key: &ResourceKey) -> Option<History> {
        self.ledgers.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn append(
        &self,
        key: &ResourceKey,
        expected: VersionId,
        action: VersionAction,
        snapshot: Option<Value>,
    ) -> Result<VersionId, FhirError> {
        let history = self
            .history(key)
            .ok_or_else(|| FhirError::NotFound(key.to_string()))?;

        let mut records = history.write();
        let latest = records.last().map(|r| (r.version_id, r.action));
        let next = check_expected(key, latest, expected)?;

        records.push(Arc::new(VersionRecord {
            key: key.clone(),
            version_id: next,
            action,
            snapshot,
            timestamp: Utc::now(),
        }));

        tracing::debug!(
            resource = %key,
            version = next,
            action = action.as_str(),
            "Version recorded"
        );
        Ok(next)
    }
}

#[async_trait]
impl VersionStore for InMemoryVersionStore {
    async fn record_create(
        &self,
        key: &ResourceKey,
        snapshot: Value,
    ) -> Result<VersionId, FhirError> {
        match self.ledgers.entry(key.clone()) {
            Entry::Occupied(_) => Err(FhirError::AlreadyExists(key.to_string())),
            Entry::Vacant(slot) => {
                let record = VersionRecord {
                    key: key.clone(),
                    version_id: 1,
                    action: VersionAction::Create,
                    snapshot: Some(snapshot),
                    timestamp: Utc::now(),
                };
                slot.insert(Arc::new(RwLock::new(vec![Arc::new(record)])));
                tracing::debug!(resource = %key, version = 1, "Version recorded");
                Ok(1)
            }
        }
    }

    async fn record_update(
        &self,
        key: &ResourceKey,
        expected: VersionId,
        snapshot: Value,
    ) -> Result<VersionId, FhirError> {
        self.append(key, expected, VersionAction::Update, Some(snapshot))
    }

    async fn record_delete(
        &self,
        key: &ResourceKey,
        expected: VersionId,
    ) -> Result<VersionId, FhirError> {
        self.append(key, expected, VersionAction::Delete, None)
    }

    async fn get_version(
        &self,
        key: &ResourceKey,
        version: VersionId,
    ) -> Result<VersionRecord, FhirError> {
        let not_found = || FhirError::NotFound(format!("{}/_history/{}", key, version));
        let history = self.history(key).ok_or_else(not_found)?;

        // Version ids are contiguous from 1, so the id is the position
        let record = {
            let records = history.read();
            let index = (version as usize).checked_sub(1).ok_or_else(not_found)?;
            records.get(index).cloned().ok_or_else(not_found)?
        };

        if record.is_tombstone() {
            return Err(FhirError::Gone(format!("{}/_history/{}", key, version)));
        }
        Ok(VersionRecord::clone(&record))
    }

    async fn get_current(&self, key: &ResourceKey) -> Result<VersionRecord, FhirError> {
        let history = self
            .history(key)
            .ok_or_else(|| FhirError::NotFound(key.to_string()))?;
        let latest = history
            .read()
            .last()
            .cloned()
            .ok_or_else(|| FhirError::NotFound(key.to_string()))?;

        if latest.is_tombstone() {
            return Err(FhirError::Gone(key.to_string()));
        }
        Ok(VersionRecord::clone(&latest))
    }

    async fn list_history(&self, key: &ResourceKey) -> Result<Vec<VersionRecord>, FhirError> {
        let Some(history) = self.history(key) else {
            return Ok(Vec::new());
        };
        let records: Vec<Arc<VersionRecord>> = history.read().clone();
        Ok(records
            .iter()
            .rev()
            .map(|record| VersionRecord::clone(record))
            .collect())
    }
}
