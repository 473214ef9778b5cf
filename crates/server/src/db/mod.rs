mod repository;
mod version_store;

pub use repository::ResourceRepository;
pub use version_store::PostgresVersionStore;

use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::NoTls;

use crate::error::AppError;
use crate::resources::ResourceRegistry;

const SCHEMA: &str = include_str!("schema.sql");

/// Create a connection pool from a database URL
pub async fn create_pool(database_url: &str) -> Result<Pool, deadpool_postgres::CreatePoolError> {
    let mut cfg = Config::new();
    cfg.url = Some(database_url.to_string());
    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
}

/// Create the version ledger and one search table per registered resource type
pub async fn migrate(pool: &Pool, registry: &ResourceRegistry) -> Result<(), AppError> {
    let client = pool.get().await?;
    client.batch_execute(SCHEMA).await?;

    for definition in registry.definitions() {
        client.batch_execute(&definition.create_table_sql()).await?;
        tracing::debug!(table = definition.table, "Search table ready");
    }

    tracing::info!("Database schema up to date");
    Ok(())
}
