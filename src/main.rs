use std::sync::Arc;

use clap::Parser;
use hpc_scheduler_core::bridge::http::HttpBridge;
use hpc_scheduler_core::bridge::memory::MemoryBridge;
use hpc_scheduler_core::bridge::Bridge;
use hpc_scheduler_core::domain::ids::{NodeId, NodeName};
use hpc_scheduler_core::domain::resource::Resource;
use hpc_scheduler_core::domain::resource_set::ResourceSet;
use hpc_scheduler_core::{logger, Config, Fleet, Scheduler};

/// Process entry point for the scheduling core. The XML-RPC transport that
/// would actually expose `Scheduler`'s operations to client utilities is
/// out of scope for this crate; this binary only wires up the fleet,
/// starts the refresh loop, and runs until interrupted.
#[derive(Parser, Debug)]
#[command(name = "hpc-scheduler-core")]
struct Args {
    /// Path to a TOML configuration file (see SPEC_FULL.md §6.4). When
    /// absent, configuration is built from environment variables and
    /// documented defaults alone.
    #[arg(long)]
    config: Option<String>,

    /// Base URL of the placement-service bridge. Ignored when
    /// `simulation_mode` is set (a deterministic in-memory bridge is used
    /// instead).
    #[arg(long, default_value = "http://localhost:9001")]
    bridge_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger::init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env(),
    };

    log::info!("starting with config: {:?}", config);

    let bridge: Arc<dyn Bridge> = if config.simulation_mode {
        log::info!("simulation_mode set: using the in-memory bridge");
        Arc::new(MemoryBridge::new(Vec::new()))
    } else {
        log::info!("wiring the HTTP bridge at {}", args.bridge_url);
        Arc::new(HttpBridge::new(args.bridge_url.clone()))
    };

    let fleet = build_fleet(&config)?;

    let inventory = bridge.fetch_inventory(true).await?;
    log::info!("bridge reports {} nodes at startup", inventory.nodes.len());

    let scheduler = Scheduler::new(fleet, bridge, config);
    let refresh_handle = scheduler.spawn_refresh_loop();

    log::info!("scheduling core ready; waiting for shutdown signal");
    tokio::signal::ctrl_c().await?;

    log::info!("shutdown requested");
    refresh_handle.shutdown();

    Ok(())
}

/// Builds the initial `ResourceSet` from `config.hostfile`, matching the
/// node ids to their position in the file. Nodes added this way start
/// `idle` and managed; the first refresh tick reconciles true status from
/// the bridge.
fn build_fleet(config: &Config) -> anyhow::Result<Fleet> {
    let mut resources = ResourceSet::new();

    for (i, name) in config.load_hostfile()?.into_iter().enumerate() {
        resources.add(Resource::new(NodeName::new(name), NodeId(i as i64), true));
    }

    Ok(Fleet::new(resources))
}
