//! refbase - scholarly PDF ingestion and retrieval system.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "refbase=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    refbase::cli::run().await
}
