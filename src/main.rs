use anyhow::Context;
use graphcore::http::HttpServer;
use graphcore::{Config, QueryEngine};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Config file from the first argument, else GRAPHCORE_CONFIG
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("GRAPHCORE_CONFIG").ok())
        .map(PathBuf::from);
    let config = Config::load(path.as_deref()).context("loading configuration")?;

    info!("Graphcore v{}", graphcore::version());
    let engine = QueryEngine::open(config.engine.clone()).context("opening storage")?;
    let engine = Arc::new(engine);

    let server = HttpServer::new(Arc::clone(&engine), config.server);
    tokio::select! {
        result = server.start() => result.context("HTTP server failed")?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    engine.storage().flush().context("flushing storage")?;
    Ok(())
}
