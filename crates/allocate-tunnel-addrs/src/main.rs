//! allocate-tunnel-addrs — sets or clears this node's tunnel addresses.
//!
//! Runs once and exits: for IPIP and VXLAN it assigns an address from an
//! encapsulation-enabled pool, keeps a still-valid one, or releases one that
//! is no longer needed. A non-zero exit status means at least one mode
//! could not be reconciled.
//!
//! # Usage
//!
//! ```text
//! NODENAME=worker-1 allocate-tunnel-addrs --config /etc/tunnel-ipam/config.toml
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use tunnel_core::TunnelConfig;
use tunnel_ipam::Driver;
use tunnel_state::StateStore;

#[derive(Parser)]
#[command(name = "allocate-tunnel-addrs", about = "Reconcile IPIP and VXLAN tunnel addresses")]
struct Cli {
    /// Configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Name of the node to reconcile.
    #[arg(long, env = "NODENAME")]
    nodename: Option<String>,

    /// Datastore path, overriding the configuration file.
    #[arg(long)]
    datastore: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Logs go to stdout so collectors don't read them as errors.
    tracing_subscriber::fmt()
        .with_writer(std::io::stdout)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,allocate_tunnel_addrs=debug,tunnel_ipam=debug"
                    .parse()
                    .unwrap()
            }),
        )
        .init();

    let cli = Cli::parse();
    run(cli).await
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => TunnelConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => TunnelConfig::default(),
    };
    if let Some(path) = cli.datastore {
        config.datastore.path = path;
    }

    let node_name = cli
        .nodename
        .or(config.node_name.clone())
        .filter(|name| !name.is_empty())
        .context("NODENAME environment is not set")?;

    let store = StateStore::open(&config.datastore.path).with_context(|| {
        format!("failed to open datastore {}", config.datastore.path.display())
    })?;

    info!(
        node = %node_name,
        max_attempts = config.retry.max_attempts,
        backoff_ms = config.retry.backoff_ms,
        "reconciling tunnel addresses"
    );

    let report = Driver::from_store(store, &node_name, config.retry)
        .run()
        .await?;

    for (mode, outcome) in &report.outcomes {
        info!(%mode, ?outcome, "tunnel address reconciled");
    }
    Ok(())
}
