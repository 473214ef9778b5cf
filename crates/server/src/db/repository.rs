use deadpool_postgres::Pool;
use ehr_core::{BuiltQuery, Paging, SqlParam};
use serde_json::Value as JsonValue;
use tokio_postgres::IsolationLevel;
use tokio_postgres::types::ToSql;

use crate::error::AppError;

/// Read side over the per-type search tables
#[derive(Clone)]
pub struct ResourceRepository {
    pool: Pool,
}

impl ResourceRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Run a built search: total match count plus one page of resources.
    ///
    /// Both statements share a repeatable-read snapshot so the total agrees
    /// with the page.
    pub async fn search(
        &self,
        query: &BuiltQuery,
        paging: Paging,
    ) -> Result<(u64, Vec<JsonValue>), AppError> {
        let mut client = self.pool.get().await?;
        let tx = client
            .build_transaction()
            .isolation_level(IsolationLevel::RepeatableRead)
            .read_only(true)
            .start()
            .await?;

        let count_args = to_sql(&query.count_args);
        let row = tx.query_one(&query.count_sql, &refs(&count_args)).await?;
        let total: i64 = row.try_get(0)?;

        let data_args = to_sql(&query.data_args(paging.limit, paging.offset));
        let rows = tx.query(&query.data_sql, &refs(&data_args)).await?;
        let resources = rows
            .iter()
            .map(|row| row.try_get::<_, JsonValue>("resource"))
            .collect::<Result<Vec<_>, _>>()?;

        tx.commit().await?;
        Ok((total.max(0) as u64, resources))
    }
}

type BoxedParam = Box<dyn ToSql + Sync + Send>;

fn to_sql(args: &[SqlParam]) -> Vec<BoxedParam> {
    args.iter()
        .map(|arg| -> BoxedParam {
            match arg {
                SqlParam::Text(text) => Box::new(text.clone()),
                SqlParam::Integer(n) => Box::new(*n),
                SqlParam::Timestamp(instant) => Box::new(*instant),
            }
        })
        .collect()
}

fn refs(params: &[BoxedParam]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect()
}
