use clap::Parser;
use tunestream_api::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::parse();
    tunestream_api::run(config).await
}
