//! ehr-server: FHIR R4 HTTP server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ehr_server::config::Config;
use ehr_server::db::{self, PostgresVersionStore};
use ehr_server::resources::ResourceRegistry;
use ehr_server::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = Config::from_env();
    let registry = Arc::new(ResourceRegistry::clinical());

    let pool = db::create_pool(&config.database_url).await?;
    db::migrate(&pool, &registry)
        .await
        .map_err(|e| format!("Schema migration failed: {:?}", e))?;

    let versions = Arc::new(PostgresVersionStore::new(
        pool.clone(),
        Arc::clone(&registry),
        config.storage_timeout,
    ));

    tracing::info!(
        resource_types = registry.definitions().len(),
        rate_limit_rps = config.rate_limit_rps,
        storage_timeout_ms = config.storage_timeout.as_millis() as u64,
        base_url = %config.base_url,
        "Configuration loaded"
    );

    let state = AppState {
        pool,
        versions,
        registry,
        base_url: config.base_url.clone(),
    };
    let app = ehr_server::build_app(state, &config);

    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Starting EHR FHIR server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
