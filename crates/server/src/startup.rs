use std::{net::SocketAddr, sync::Arc};

use axum::Router;
use configs::AppConfig;
use migration::MigratorTrait;
use service::storage::repo::seaorm::SeaOrmChunkStore;
use service::FileStorage;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::errors::StartupError;
use crate::routes::{self, ServerState};

pub fn build_cors() -> CorsLayer {
    CorsLayer::very_permissive()
}

fn bind_addr(cfg: &AppConfig) -> Result<SocketAddr, StartupError> {
    format!("{}:{}", cfg.server.host, cfg.server.port)
        .parse()
        .map_err(|e| StartupError::InvalidConfig(format!("bind address: {e}")))
}

/// Connect the database, apply migrations and wire the Postgres-backed storage.
pub async fn build_app(cfg: &AppConfig, shutdown: CancellationToken) -> Result<Router, StartupError> {
    let db = models::db::connect_with_config(&cfg.database).await?;
    migration::Migrator::up(&db, None)
        .await
        .map_err(|e| StartupError::Runtime(format!("migrations failed: {e}")))?;

    let storage = Arc::new(FileStorage::new(Arc::new(SeaOrmChunkStore::new(db))));
    Ok(routes::build_router(ServerState::new(storage, shutdown), build_cors()))
}

/// Public entry: build the app and serve until `shutdown` is cancelled.
pub async fn run(cfg: AppConfig, shutdown: CancellationToken) -> Result<(), StartupError> {
    let addr = bind_addr(&cfg)?;
    let app = build_app(&cfg, shutdown.clone()).await?;

    info!(%addr, "starting file storage server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| StartupError::Runtime(format!("bind {addr}: {e}")))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| StartupError::Runtime(format!("serve: {e}")))?;
    Ok(())
}
