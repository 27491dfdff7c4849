use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use tinyraft::cluster::{
    ClusterConfig, ELECTION_TIMEOUT_JITTER, HEARTBEAT_INTERVAL, MAX_ENTRIES_PER_BATCH,
    MIN_ELECTION_TIMEOUT,
};
use tinyraft::driver::{self, Clock};
use tinyraft::replica::ReplicaConfig;
use tinyraft::rng::SystemRandom;
use tinyraft::state_machine::KvStateMachine;
use tinyraft::storage::{state_file_path, FileStorage};
use tinyraft::transport::{TcpTransport, Transport};
use tinyraft::Replica;

/// Runs one replica of the cluster.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// This replica's node id (must appear in the cluster config).
    #[arg(long)]
    id: String,

    /// Cluster config: one `node-id=host:port` line per member.
    #[arg(long, default_value = "servers.conf")]
    cluster: PathBuf,

    /// Directory the durable `<id>.raftstate` file is written under.
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    #[arg(long, default_value_t = MIN_ELECTION_TIMEOUT)]
    min_election_timeout: f64,

    #[arg(long, default_value_t = ELECTION_TIMEOUT_JITTER)]
    election_timeout_jitter: f64,

    #[arg(long, default_value_t = HEARTBEAT_INTERVAL)]
    heartbeat_interval: f64,

    #[arg(long, default_value_t = MAX_ENTRIES_PER_BATCH)]
    max_entries_per_batch: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let cluster = ClusterConfig::from_path(&args.cluster)
        .with_context(|| format!("loading cluster config {}", args.cluster.display()))?;
    let peers = cluster.peers_of(&args.id);

    let config = ReplicaConfig {
        min_election_timeout: args.min_election_timeout,
        election_timeout_jitter: args.election_timeout_jitter,
        heartbeat_interval: args.heartbeat_interval,
        max_entries_per_batch: args.max_entries_per_batch,
    };

    let clock = Clock::new();
    let storage = FileStorage::new(state_file_path(&args.data_dir, &args.id));
    let replica = Replica::new(
        args.id.clone(),
        peers,
        clock.now(),
        config,
        Box::new(SystemRandom),
        Box::new(storage),
    )
    .with_context(|| format!("loading persisted state for {}", args.id))?;

    info!("starting replica {} (cluster config {})", args.id, args.cluster.display());
    let transport: Arc<dyn Transport> =
        Arc::new(TcpTransport::bind(args.id.clone(), cluster).await?);
    let state_machine = KvStateMachine::new();

    if let Err(e) = driver::run(replica, transport, state_machine, clock, Duration::from_millis(10)).await
    {
        error!("replica halted: {e}");
        std::process::exit(1);
    }
    Ok(())
}
