use anyhow::Context;
use axum::{
    http::{header, HeaderValue},
    routing::get,
    Router,
};
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer, services::ServeDir, set_header::SetResponseHeaderLayer, trace::TraceLayer,
};
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod db;
pub mod error;
pub mod extract;
mod models;
pub mod routes;
pub mod storage;

use config::{Config, StorageBackend};
use storage::{MemStorage, PgStorage, Storage};

/// Shared by every handler. The storage handle is the only way handlers
/// reach data.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub uploads_dir: PathBuf,
}

impl AppState {
    pub fn new(storage: Arc<dyn Storage>, uploads_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage,
            uploads_dir: uploads_dir.into(),
        }
    }
}

async fn health_check() -> &'static str {
    "ok"
}

pub fn build_router(state: AppState) -> Router {
    // ServeDir answers Range requests itself, which the player needs to seek
    let uploads = ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCEPT_RANGES,
            HeaderValue::from_static("bytes"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static("public, max-age=86400"),
        ))
        .service(ServeDir::new(&state.uploads_dir));

    Router::new()
        .route("/health", get(health_check))
        .merge(routes::api_routes())
        .nest_service("/uploads", uploads)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let storage: Arc<dyn Storage> = match config.storage {
        StorageBackend::Postgres => {
            let pool = db::init_db(&config.database_url, config.max_connections)
                .await
                .context("failed to initialize database")?;
            tracing::info!("database initialized");
            Arc::new(PgStorage::new(pool))
        }
        StorageBackend::Memory => {
            tracing::warn!("using in-memory storage, nothing will survive a restart");
            Arc::new(MemStorage::new())
        }
    };

    tokio::fs::create_dir_all(&config.uploads_dir)
        .await
        .with_context(|| format!("failed to create {}", config.uploads_dir.display()))?;

    let app = build_router(AppState::new(storage, config.uploads_dir.clone()));

    tracing::info!("listening on {}", config.bind);
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    axum::serve(listener, app).await?;

    Ok(())
}
