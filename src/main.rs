//! Roundhouse server binary

use clap::Parser;
use roundhouse::{
    api::{server::shutdown_signal, RoundhouseServer},
    config::ConfigLoader,
    errors::{ConfigurationError, RoundhouseResult},
    fairness::FairnessEngine,
    factory::RoundhouseFactory,
    RoundhouseConfig,
};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "roundhouse")]
#[command(about = "Provably fair crash and roulette round server")]
#[command(version)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Short phases, in-memory archive and two dev tokens
    #[arg(long)]
    dev: bool,

    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Directory of the RocksDB round archive
    #[arg(short, long)]
    data_dir: Option<String>,

    /// Keep the archive in memory only
    #[arg(long)]
    memory_store: bool,
}

#[tokio::main]
async fn main() -> RoundhouseResult<()> {
    let cli = Cli::parse();

    let mut config = if cli.dev {
        RoundhouseConfig::development()
    } else {
        let mut loader = ConfigLoader::new();
        if let Some(path) = &cli.config {
            loader = loader.with_path(path);
        }
        loader.load()?
    };

    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }
    if cli.memory_store {
        config.storage.in_memory = true;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.monitoring.log_filter.clone().into()),
        )
        .init();

    config.validate().map_err(ConfigurationError::from)?;

    info!("🚀 Starting Roundhouse v{}", env!("CARGO_PKG_VERSION"));
    if config.storage.in_memory {
        warn!("⚠️  Round archive is in memory, history is lost on restart");
    }

    let runtime = RoundhouseFactory::build(&config, FairnessEngine::os())?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let drivers = runtime.spawn_drivers(&shutdown_rx);

    let server = RoundhouseServer::new(config.server.clone(), runtime.state.clone());
    let served = server.run_until(shutdown_signal()).await;

    let _ = shutdown_tx.send(true);
    for driver in drivers {
        if let Err(e) = driver.await {
            warn!("Round driver ended abnormally: {}", e);
        }
    }

    info!("👋 Roundhouse stopped");
    served
}
