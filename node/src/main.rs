// Kolibri node entry point

mod config;
mod keys;
mod service;

use clap::Parser;
use config::{Cli, NodeConfig};
use service::KolibriNode;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = NodeConfig::resolve(&cli)?;
    info!(node_id = %config.node_id, data_dir = %config.data_dir.display(), "starting node");

    let node = KolibriNode::new(config)?;
    node.start();

    // Service loop: drain outbound frames until the process is killed
    loop {
        node.pump_once(1000);
    }
}
