use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use tinyraft::cluster::ClusterConfig;
use tinyraft::message::{Message, MessageBody};
use tinyraft::state_machine::KvStateMachine;
use tinyraft::storage::{state_file_path, FileStorage, Storage};
use tinyraft::Entry;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(800);
const REPLY_TIMEOUT: Duration = Duration::from_secs(3);

/// Client for the replicated key-value store.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Cluster config: one `node-id=host:port` line per member.
    #[arg(long, default_value = "servers.conf")]
    cluster: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit `SET key value`, trying every cluster member until the leader accepts it.
    Set { key: String, value: String },
    /// Read a key directly out of one replica's persisted log. Not
    /// linearizable: it reflects whatever that replica has durably written,
    /// committed or not (linearizable reads are an explicit non-goal).
    Get {
        key: String,
        /// Which replica's state file to read.
        #[arg(long)]
        id: String,
        #[arg(long, default_value = ".")]
        data_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Set { key, value } => handle_set(&cli.cluster, &key, &value).await,
        Commands::Get { key, id, data_dir } => handle_get(&id, &data_dir, &key),
    }
}

async fn handle_set(cluster_path: &Path, key: &str, value: &str) -> Result<()> {
    let cluster = ClusterConfig::from_path(cluster_path)
        .with_context(|| format!("loading cluster config {}", cluster_path.display()))?;
    let cmd = format!("SET {key} {value}");

    for id in cluster.node_ids() {
        let addr = cluster.addr(&id).expect("addr came from node_ids of the same config");
        match try_set(addr, &id, &cmd).await {
            Ok(cmd_id) => {
                println!("committed at index {cmd_id} via {id}");
                return Ok(());
            }
            Err(e) => {
                eprintln!("{id} did not accept the command ({e}), trying the next server");
            }
        }
    }

    bail!("no server in the cluster accepted the command");
}

/// Opens a fresh connection to `addr`, sends one `ClientSet`, and waits for
/// the `ClientSetSucceeded` reply on the same socket. A connect failure or
/// reply timeout means `addr` probably isn't the leader right now.
async fn try_set(addr: SocketAddr, to: &str, cmd: &str) -> Result<u64> {
    let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .context("connect timed out")??;

    let msg = Message::new("raftctl", to, MessageBody::ClientSet { cmd: cmd.to_string() });
    let bytes = serde_json::to_vec(&msg)?;
    stream.write_u32(bytes.len() as u32).await?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;

    let reply = tokio::time::timeout(REPLY_TIMEOUT, async {
        let len = stream.read_u32().await?;
        let mut buf = vec![0u8; len as usize];
        stream.read_exact(&mut buf).await?;
        serde_json::from_slice::<Message>(&buf).map_err(anyhow::Error::from)
    })
    .await
    .context("timed out waiting for a reply (probably not the leader)")??;

    match reply.body {
        MessageBody::ClientSetSucceeded { cmd_id } => Ok(cmd_id),
        other => bail!("unexpected reply: {other:?}"),
    }
}

fn handle_get(id: &str, data_dir: &Path, key: &str) -> Result<()> {
    let path = state_file_path(data_dir, id);
    let storage = FileStorage::new(&path);
    let state = storage
        .load()
        .with_context(|| format!("reading {}", path.display()))?;

    let mut state_machine = KvStateMachine::new();
    if let Some(state) = state {
        let applied: Vec<(u64, Entry)> = state
            .log
            .into_iter()
            .enumerate()
            .map(|(i, entry)| ((i + 1) as u64, entry))
            .collect();
        state_machine.apply_all(&applied);
    }

    match state_machine.get(key) {
        Some(value) => println!("{value}"),
        None => println!("(nil)"),
    }
    Ok(())
}
