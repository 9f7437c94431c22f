//! ironworks - authoritative server for a deterministic 2D factory world

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use ironworks_server::{Server, ServerConfig, DEFAULT_CONFIG_PATH};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "ironworks", version, about = "Authoritative factory-world server")]
struct Args {
    /// Path to the server config (TOML)
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Listen address, overriding the config file
    #[arg(long)]
    bind: Option<String>,

    /// World seed for a new world, overriding the config file
    #[arg(long)]
    seed: Option<u64>,

    /// Save directory, overriding the config file
    #[arg(long)]
    save_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG overrides the default level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting ironworks v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let mut config = ServerConfig::load_from_path(&args.config);
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(save_dir) = args.save_dir {
        config.save_dir = save_dir;
    }
    let config = config.sanitized();

    let server = Server::bind(config).await?;
    server
        .run(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for ctrl-c: {err}");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("Server stopped");
    Ok(())
}
