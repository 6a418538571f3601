//! OxIdP server entry point.

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

use oxidp_server::{Adapters, ServerConfig, build, serve};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is a development convenience; absence is fine.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::var("OXIDP_CONFIG")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            let default = PathBuf::from("oxidp.toml");
            default.exists().then_some(default)
        });

    let config = ServerConfig::load(config_path.as_deref())?;
    let bind = config.bind.clone();
    let runtime = build(config, Adapters::default()).await?;
    serve(&bind, runtime).await
}
