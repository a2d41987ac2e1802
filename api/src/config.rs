use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackend {
    /// Postgres through sqlx, the production setup.
    Postgres,
    /// Process-local tables; nothing survives a restart.
    Memory,
}

/// Server configuration. Every flag can also come from the environment
/// (and therefore from a `.env` file).
#[derive(Debug, Clone, Parser)]
#[command(name = "tunestream-api", about = "Music catalog and library API")]
pub struct Config {
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:5000")]
    pub bind: SocketAddr,

    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgresql://localhost/tunestream"
    )]
    pub database_url: String,

    #[arg(long, env = "STORAGE_BACKEND", value_enum, default_value = "postgres")]
    pub storage: StorageBackend,

    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 20)]
    pub max_connections: u32,

    #[arg(long, env = "UPLOADS_DIR", default_value = "./uploads")]
    pub uploads_dir: PathBuf,

    #[arg(
        long,
        env = "RUST_LOG",
        default_value = "tunestream_api=debug,tower_http=debug"
    )]
    pub log_filter: String,
}
