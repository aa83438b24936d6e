// Mantion safety monitor daemon

use anyhow::Context;
use clap::Parser;
use mantion_core::MonitorConfig;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "mantion-server")]
#[command(about = "Camera human-presence safety monitor", long_about = None)]
struct Args {
    /// Configuration file (JSON or TOML); defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dashboard bind address, overriding the configuration
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => MonitorConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => MonitorConfig::default(),
    };
    config.apply_env();
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    config.validate().context("invalid configuration")?;

    mantion_server::init_logging(&config.logging)?;
    info!("Starting Mantion safety monitor v{}", env!("CARGO_PKG_VERSION"));

    mantion_server::run(config).await
}
