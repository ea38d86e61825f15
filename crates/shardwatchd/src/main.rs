//! shardwatchd — the shardwatch daemon.
//!
//! Single binary that assembles the monitor:
//! - DHT adapter (gateway client, or a recorded dump)
//! - Reachability prober
//! - Updater loop publishing snapshots
//! - Read API + metrics + frontend bundle
//!
//! # Usage
//!
//! ```text
//! shardwatchd --config shardwatch.toml --port 5000
//! shardwatchd --config shardwatch.toml --dht-fixture dht-dump.json --log-format json
//! ```

mod daemon;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use shardwatch_core::MonitorConfig;

const DEFAULT_LOG_FILTER: &str = "info,shardwatch=debug,shardwatchd=debug";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "shardwatchd", about = "Health monitor for a swarm of model-shard servers")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, short, default_value = "shardwatch.toml")]
    config: PathBuf,

    /// Address to serve on, overriding `listen` from the config.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Port to serve on, keeping the configured host.
    #[arg(long)]
    port: Option<u16>,

    /// Log output format.
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Read DHT records from a JSON dump instead of the configured gateways.
    #[arg(long)]
    dht_fixture: Option<PathBuf>,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut config = MonitorConfig::from_file(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(port) = cli.port {
        config.listen.set_port(port);
    }

    daemon::run(config, cli.dht_fixture).await
}
