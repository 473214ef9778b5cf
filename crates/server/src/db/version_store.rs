//! Postgres-backed version ledger.
//!
//! Every write runs in one transaction that serializes on a per-key advisory
//! lock, checks the expected version against the latest ledger row, appends
//! the new row and refreshes the resource's search projection. The primary
//! key on `(resource_type, resource_id, version_id)` rejects any append that
//! slips past the lock.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use ehr_core::version::check_expected;
use ehr_core::{FhirError, ResourceKey, VersionAction, VersionId, VersionRecord, VersionStore};
use serde_json::Value;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Row, Transaction};

use crate::resources::{ColumnValue, ResourceRegistry};

const LATEST_SQL: &str = "SELECT version_id, action FROM resource_versions \
     WHERE resource_type = $1 AND resource_id = $2 \
     ORDER BY version_id DESC LIMIT 1";

const INSERT_SQL: &str = "INSERT INTO resource_versions \
     (resource_type, resource_id, version_id, action, snapshot, recorded_at) \
     VALUES ($1, $2, $3, $4, $5, $6)";

const RECORD_COLUMNS: &str = "version_id, action, snapshot, recorded_at";

type BoxedParam = Box<dyn ToSql + Sync + Send>;

pub struct PostgresVersionStore {
    pool: Pool,
    registry: Arc<ResourceRegistry>,
    timeout: Duration,
}

impl PostgresVersionStore {
    pub fn new(pool: Pool, registry: Arc<ResourceRegistry>, timeout: Duration) -> Self {
        Self {
            pool,
            registry,
            timeout,
        }
    }

    /// Run a ledger call under the configured deadline.
    ///
    /// On expiry the future is dropped, which drops any open transaction
    /// and rolls it back.
    async fn with_deadline<T>(
        &self,
        operation: &'static str,
        key: &ResourceKey,
        fut: impl Future<Output = Result<T, FhirError>>,
    ) -> Result<T, FhirError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    resource = %key,
                    operation,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Ledger call timed out"
                );
                Err(FhirError::Cancelled(format!(
                    "{} of {} exceeded {} ms",
                    operation,
                    key,
                    self.timeout.as_millis()
                )))
            }
        }
    }

    /// Append one row. `expected == None` is a create.
    async fn append(
        &self,
        key: &ResourceKey,
        expected: Option<VersionId>,
        action: VersionAction,
        snapshot: Option<Value>,
    ) -> Result<VersionId, FhirError> {
        let mut client = self.pool.get().await.map_err(unavailable)?;
        let tx = client.transaction().await.map_err(unavailable)?;

        tx.execute(
            "SELECT pg_advisory_xact_lock(hashtext($1))",
            &[&key.to_string()],
        )
        .await
        .map_err(unavailable)?;

        let latest = tx
            .query_opt(LATEST_SQL, &[&key.resource_type, &key.id])
            .await
            .map_err(unavailable)?
            .map(|row| latest_version(&row))
            .transpose()?;

        let next = match expected {
            None if latest.is_some() => return Err(FhirError::AlreadyExists(key.to_string())),
            None => 1,
            Some(expected) => check_expected(key, latest, expected)?,
        };

        let record = VersionRecord {
            key: key.clone(),
            version_id: next,
            action,
            snapshot,
            timestamp: Utc::now(),
        };

        tx.execute(
            INSERT_SQL,
            &[
                &key.resource_type,
                &key.id,
                &(next as i32),
                &action.as_str(),
                &record.snapshot,
                &record.timestamp,
            ],
        )
        .await
        .map_err(|err| {
            if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                match expected {
                    None => FhirError::AlreadyExists(key.to_string()),
                    Some(expected) => FhirError::VersionConflict {
                        key: key.to_string(),
                        expected,
                        current: None,
                    },
                }
            } else {
                unavailable(err)
            }
        })?;

        self.project(&tx, &record).await?;
        tx.commit().await.map_err(unavailable)?;

        tracing::debug!(
            resource = %key,
            version = next,
            action = action.as_str(),
            "Version recorded"
        );
        Ok(next)
    }

    /// Refresh the search row for the record's resource type, if it has one
    async fn project(&self, tx: &Transaction<'_>, record: &VersionRecord) -> Result<(), FhirError> {
        let Some(definition) = self.registry.get(&record.key.resource_type) else {
            return Ok(());
        };

        let Some(resource) = record.resource() else {
            let sql = format!("DELETE FROM {} WHERE id = $1", definition.table);
            tx.execute(&sql, &[&record.key.id])
                .await
                .map_err(unavailable)?;
            return Ok(());
        };

        let mut params: Vec<BoxedParam> = Vec::new();
        params.push(Box::new(record.key.id.clone()));
        params.push(Box::new(record.version_id as i32));
        params.push(Box::new(record.timestamp));
        let columns = definition.project(&resource);
        params.push(Box::new(resource));
        for value in columns {
            let param: BoxedParam = match value {
                ColumnValue::Text(text) => Box::new(text),
                ColumnValue::Timestamp(instant) => Box::new(instant),
            };
            params.push(param);
        }

        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        tx.execute(&definition.upsert_sql(), &refs)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn fetch(
        &self,
        key: &ResourceKey,
        version: Option<VersionId>,
    ) -> Result<Option<VersionRecord>, FhirError> {
        let client = self.pool.get().await.map_err(unavailable)?;
        let row = match version {
            Some(version) => {
                let sql = format!(
                    "SELECT {} FROM resource_versions \
                     WHERE resource_type = $1 AND resource_id = $2 AND version_id = $3",
                    RECORD_COLUMNS
                );
                client
                    .query_opt(&sql, &[&key.resource_type, &key.id, &(version as i32)])
                    .await
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM resource_versions \
                     WHERE resource_type = $1 AND resource_id = $2 \
                     ORDER BY version_id DESC LIMIT 1",
                    RECORD_COLUMNS
                );
                client.query_opt(&sql, &[&key.resource_type, &key.id]).await
            }
        }
        .map_err(unavailable)?;

        row.map(|row| to_record(key, &row)).transpose()
    }
}

#[async_trait]
impl VersionStore for PostgresVersionStore {
    async fn record_create(
        &self,
        key: &ResourceKey,
        snapshot: Value,
    ) -> Result<VersionId, FhirError> {
        self.with_deadline(
            "create",
            key,
            self.append(key, None, VersionAction::Create, Some(snapshot)),
        )
        .await
    }

    async fn record_update(
        &self,
        key: &ResourceKey,
        expected: VersionId,
        snapshot: Value,
    ) -> Result<VersionId, FhirError> {
        self.with_deadline(
            "update",
            key,
            self.append(key, Some(expected), VersionAction::Update, Some(snapshot)),
        )
        .await
    }

    async fn record_delete(
        &self,
        key: &ResourceKey,
        expected: VersionId,
    ) -> Result<VersionId, FhirError> {
        self.with_deadline(
            "delete",
            key,
            self.append(key, Some(expected), VersionAction::Delete, None),
        )
        .await
    }

    async fn get_version(
        &self,
        key: &ResourceKey,
        version: VersionId,
    ) -> Result<VersionRecord, FhirError> {
        let record = self
            .with_deadline("vread", key, self.fetch(key, Some(version)))
            .await?
            .ok_or_else(|| FhirError::NotFound(format!("{}/_history/{}", key, version)))?;

        if record.is_tombstone() {
            return Err(FhirError::Gone(format!("{}/_history/{}", key, version)));
        }
        Ok(record)
    }

    async fn get_current(&self, key: &ResourceKey) -> Result<VersionRecord, FhirError> {
        let record = self
            .with_deadline("read", key, self.fetch(key, None))
            .await?
            .ok_or_else(|| FhirError::NotFound(key.to_string()))?;

        if record.is_tombstone() {
            return Err(FhirError::Gone(key.to_string()));
        }
        Ok(record)
    }

    async fn list_history(&self, key: &ResourceKey) -> Result<Vec<VersionRecord>, FhirError> {
        self.with_deadline("history", key, async {
            let client = self.pool.get().await.map_err(unavailable)?;
            let sql = format!(
                "SELECT {} FROM resource_versions \
                 WHERE resource_type = $1 AND resource_id = $2 \
                 ORDER BY version_id DESC",
                RECORD_COLUMNS
            );
            client
                .query(&sql, &[&key.resource_type, &key.id])
                .await
                .map_err(unavailable)?
                .iter()
                .map(|row| to_record(key, row))
                .collect()
        })
        .await
    }
}

fn unavailable(err: impl std::fmt::Display) -> FhirError {
    FhirError::StorageUnavailable(err.to_string())
}

fn version_column(row: &Row) -> Result<VersionId, FhirError> {
    let version: i32 = row.try_get("version_id").map_err(unavailable)?;
    VersionId::try_from(version).map_err(unavailable)
}

fn action_column(row: &Row) -> Result<VersionAction, FhirError> {
    let action: &str = row.try_get("action").map_err(unavailable)?;
    VersionAction::parse(action)
        .ok_or_else(|| FhirError::StorageUnavailable(format!("unknown ledger action '{}'", action)))
}

fn latest_version(row: &Row) -> Result<(VersionId, VersionAction), FhirError> {
    Ok((version_column(row)?, action_column(row)?))
}

fn to_record(key: &ResourceKey, row: &Row) -> Result<VersionRecord, FhirError> {
    let snapshot: Option<Value> = row.try_get("snapshot").map_err(unavailable)?;
    let timestamp: DateTime<Utc> = row.try_get("recorded_at").map_err(unavailable)?;
    Ok(VersionRecord {
        key: key.clone(),
        version_id: version_column(row)?,
        action: action_column(row)?,
        snapshot,
        timestamp,
    })
}
