//! OMM Metadata Manager daemon
//!
//! Opens the namespace database, runs startup recovery, keeps the gauge
//! snapshot and trash sweep going in the background and serves `/metrics`
//! and `/health` until Ctrl-C.

mod http;

use anyhow::{Context, Result};
use clap::Parser;
use omm_common::OmConfig;
use omm_common::config::LoggingConfig;
use omm_core::{LocalBlockAllocator, OzoneManager};
use omm_store::RedbKvStore;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "omm-server")]
#[command(about = "OMM Metadata Manager")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/omm/om.toml")]
    config: PathBuf,

    /// Directory holding the metadata database
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Listen address for /metrics and /health
    #[arg(long)]
    metrics_listen: Option<String>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| logging.level.as_str().into());
    let registry = tracing_subscriber::registry().with(filter);
    if logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Command-line flags win over the file and environment
fn apply_overrides(config: &mut OmConfig, args: &Args) -> Result<()> {
    if let Some(dir) = &args.data_dir {
        config.node.data_dir.clone_from(dir);
    }
    if let Some(listen) = &args.metrics_listen {
        config.network.metrics_listen = listen
            .parse::<SocketAddr>()
            .map_err(|e| anyhow::anyhow!("Invalid listen address {}: {}", listen, e))?;
    }
    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = OmConfig::load(Some(args.config.as_path()))
        .with_context(|| format!("loading {}", args.config.display()))?;
    apply_overrides(&mut config, &args)?;
    init_tracing(&config.logging);

    info!("Starting OMM metadata manager '{}'", config.node.name);

    std::fs::create_dir_all(&config.node.data_dir)
        .with_context(|| format!("creating {}", config.node.data_dir.display()))?;
    let db_path = config.db_path();
    let kv = Arc::new(RedbKvStore::open(&db_path)?);
    info!("Opened metadata database at {}", db_path.display());

    let allocator = Arc::new(
        LocalBlockAllocator::new(config.block.size_bytes)
            .with_max_blocks_per_request(config.block.max_blocks_per_request()),
    );
    let om = Arc::new(OzoneManager::open(config.clone(), kv, allocator)?);
    om.start_background()?;

    let addr = config.network.metrics_listen;
    info!("Serving /metrics and /health on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, http::router(Arc::clone(&om)).into_make_service())
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
        })
        .await?;

    om.shutdown();
    info!("Metadata manager shut down gracefully");

    Ok(())
}
