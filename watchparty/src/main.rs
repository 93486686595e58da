mod server;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, Instrument};

use watchparty_api::SyncService;
use watchparty_cluster::SessionHub;
use watchparty_core::{
    bootstrap::load_config,
    logging,
    service::{SessionStore, TracingObserver},
    Config,
};

use server::WatchPartyServer;

#[derive(Parser, Debug)]
#[command(name = "watchparty")]
#[command(about = "Watch-together session sync server", long_about = None)]
struct Args {
    /// Path to a YAML/TOML config file
    #[arg(long, short, env = "WATCHPARTY_CONFIG_PATH")]
    config: Option<String>,

    /// Node ID used in logs (auto-generated from hostname if not provided)
    #[arg(long, env = "WATCHPARTY_NODE_ID")]
    node_id: Option<String>,
}

/// Generate a unique node ID for this server instance
fn generate_node_id() -> String {
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    format!("{hostname}-{}", nanoid::nanoid!(6))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load and validate configuration
    let config = load_config(args.config.as_deref())?;

    // 2. Initialize logging; everything after runs inside the node span
    logging::init_logging(&config.logging)?;
    let node_id = args.node_id.unwrap_or_else(generate_node_id);
    run(config).instrument(logging::node_span(&node_id)).await
}

async fn run(config: Config) -> Result<()> {
    info!("WatchParty server starting...");

    // 3. Session engine: store, hub and activity observer
    let sync_service = SyncService::new(
        SessionStore::new(),
        SessionHub::new(),
        Arc::new(TracingObserver),
    );
    info!(
        idle_eviction_secs = config.session.idle_eviction_secs,
        seek_debounce_ms = config.sync.seek_debounce_ms,
        drift_tolerance_secs = config.sync.drift_tolerance_secs,
        "Session engine initialized"
    );

    // 4. Serve until shutdown
    WatchPartyServer::new(config, sync_service).start().await
}
