//! identity_server: standalone REST server for identity reconciliation.
//!
//! Reads config from env vars (a `.env` file is honoured):
//!   PORT / BIND_HOST: listen address (default: 0.0.0.0:3000)
//!   IDENTITY_STORE: `memory` or `postgres` (default: postgres if DATABASE_URL is set)
//!   DATABASE_URL: Postgres connection string
//!   DATABASE_POOL_SIZE: max pool connections (default: 10)
//!   IDENTITY_TX_ISOLATION: read_committed (default) | repeatable_read | serializable;
//!     the stricter levels answer 409 when overlapping requests collide
//!   IDENTITY_INIT_SCHEMA: create the contacts table on startup (default: true)

use std::sync::Arc;

use anyhow::Context;
use identity_core::{ContactStore, IdentityReconciler, MemoryContactStore};
use identity_postgres::{connect, PgContactStore};
use identity_server::{build_router, ServerConfig, StoreBackend};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,identity_server=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env().context("invalid server configuration")?;
    let store = open_store(&config.store).await?;
    let reconciler = Arc::new(IdentityReconciler::new(store));
    let app = build_router(reconciler);

    let bind_addr = config.bind_addr();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind to {bind_addr}"))?;
    tracing::info!("identity_server listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("identity_server stopped");
    Ok(())
}

async fn open_store(backend: &StoreBackend) -> anyhow::Result<Arc<dyn ContactStore>> {
    match backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory contact store; contacts are lost on restart");
            Ok(Arc::new(MemoryContactStore::new()))
        }
        StoreBackend::Postgres {
            database,
            isolation,
            init_schema,
        } => {
            let pool = connect(database)
                .await
                .context("failed to connect to database")?;
            let store = PgContactStore::new(pool).with_isolation(*isolation);
            if *init_schema {
                store
                    .initialize_schema()
                    .await
                    .context("failed to initialize contacts schema")?;
            }
            tracing::info!(isolation = %isolation, "Using Postgres contact store");
            Ok(Arc::new(store))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
