//! Recomputes every denormalized counter (playlist song counts, song like
//! and play counts, follower counts) from the rows they summarize.

use anyhow::Context;
use clap::Parser;
use tunestream_api::{
    db,
    storage::{PgStorage, Storage},
};

#[derive(Debug, Parser)]
#[command(name = "recount", about = "Repair drifted counters in the catalog database")]
struct Args {
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgresql://localhost/tunestream"
    )]
    database_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter("recount=info,tunestream_api=info")
        .init();

    let args = Args::parse();

    let pool = db::init_db(&args.database_url, 2)
        .await
        .context("Failed to initialize database")?;
    tracing::info!("Database connection established.");

    let storage = PgStorage::new(pool);
    let repaired = storage
        .recount_counters()
        .await
        .context("Failed to recount counters")?;

    if repaired == 0 {
        tracing::info!("All counters already match their rows.");
    } else {
        tracing::info!("Repaired {} counter values.", repaired);
    }

    Ok(())
}
