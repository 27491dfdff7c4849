//! The `Transport` collaborator: a `dispatch(msg)` sink and a
//! `poll_inbox() -> Vec<msg>` source (§4.6). `TcpTransport` realizes it over
//! length-prefixed (`u32` big-endian + `serde_json`) TCP connections, the
//! same framing the teacher crate's raft RPC client/listener code uses.
//! `MemoryTransport` wires a set of replicas directly together in-process,
//! for deterministic cluster tests with no sockets involved.
//!
//! Inter-replica traffic rides one long-lived connection per peer.
//! `raftctl` instead opens a one-shot connection per `ClientSet` and waits
//! for a reply on that same socket, mirroring the teacher crate's
//! connect-send-read-response client style; `ephemeral_waiters` is how an
//! inbound `ClientSet`'s eventual `ClientSetSucceeded` finds its way back
//! to the connection that sent it, since the client isn't a cluster member
//! with an address of its own.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

use crate::cluster::ClusterConfig;
use crate::message::{Message, MessageBody, NodeId};

pub trait Transport: Send + Sync {
    /// Best-effort, fire-and-forget send. Failures are logged and dropped;
    /// the core relies on heartbeats/retries for eventual delivery (§7).
    fn dispatch(&self, msg: Message);

    /// Drains whatever has arrived on this replica's inbox since the last
    /// poll. Never blocks.
    fn poll_inbox(&self) -> Vec<Message>;
}

async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Message> {
    let len = stream.read_u32().await?;
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    serde_json::from_slice(&buf).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

async fn write_frame(stream: &mut TcpStream, msg: &Message) -> std::io::Result<()> {
    let bytes = serde_json::to_vec(msg)?;
    stream.write_u32(bytes.len() as u32).await?;
    stream.write_all(&bytes).await?;
    stream.flush().await
}

type WaiterMap = Arc<Mutex<HashMap<NodeId, oneshot::Sender<Message>>>>;

/// One long-lived outbound connection per peer, reconnecting lazily the
/// next time a send fails, plus one inbound listener feeding a shared inbox
/// channel.
pub struct TcpTransport {
    cluster: ClusterConfig,
    peer_senders: Mutex<HashMap<NodeId, mpsc::UnboundedSender<Message>>>,
    inbox_rx: Mutex<mpsc::UnboundedReceiver<Message>>,
    ephemeral_waiters: WaiterMap,
}

impl TcpTransport {
    /// Binds the inbound listener for `id` at the address `cluster` has on
    /// file for it, and returns a transport ready to dispatch to peers.
    pub async fn bind(id: NodeId, cluster: ClusterConfig) -> anyhow::Result<Self> {
        let addr = cluster
            .addr(&id)
            .ok_or_else(|| anyhow::anyhow!("no address configured for {id}"))?;
        let listener = TcpListener::bind(addr).await?;
        info!("transport for {id} listening on {addr}");

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let ephemeral_waiters: WaiterMap = Arc::new(Mutex::new(HashMap::new()));
        tokio::spawn(accept_loop(listener, inbox_tx, ephemeral_waiters.clone()));

        Ok(Self {
            cluster,
            peer_senders: Mutex::new(HashMap::new()),
            inbox_rx: Mutex::new(inbox_rx),
            ephemeral_waiters,
        })
    }

    fn sender_for(&self, peer: &NodeId) -> Option<mpsc::UnboundedSender<Message>> {
        let mut senders = self.peer_senders.lock().unwrap();
        if let Some(tx) = senders.get(peer) {
            return Some(tx.clone());
        }
        let addr = self.cluster.addr(peer)?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(peer_writer(peer.clone(), addr, rx));
        senders.insert(peer.clone(), tx.clone());
        Some(tx)
    }
}

impl Transport for TcpTransport {
    fn dispatch(&self, msg: Message) {
        if let Some(waiter) = self.ephemeral_waiters.lock().unwrap().remove(&msg.to) {
            let _ = waiter.send(msg);
            return;
        }

        match self.sender_for(&msg.to) {
            Some(tx) => {
                if tx.send(msg).is_err() {
                    // The writer task died; drop the stale sender so the
                    // next dispatch reconnects.
                    self.peer_senders.lock().unwrap().remove(&msg.to);
                }
            }
            None => warn!("dispatch: no known address for peer"),
        }
    }

    fn poll_inbox(&self) -> Vec<Message> {
        let mut rx = self.inbox_rx.lock().unwrap();
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }
}

async fn accept_loop(
    listener: TcpListener,
    inbox_tx: mpsc::UnboundedSender<Message>,
    ephemeral_waiters: WaiterMap,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                let inbox_tx = inbox_tx.clone();
                let ephemeral_waiters = ephemeral_waiters.clone();
                tokio::spawn(handle_inbound(stream, peer_addr, inbox_tx, ephemeral_waiters));
            }
            Err(e) => warn!("accept failed: {e}"),
        }
    }
}

const CLIENT_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

async fn handle_inbound(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    inbox_tx: mpsc::UnboundedSender<Message>,
    ephemeral_waiters: WaiterMap,
) {
    loop {
        let msg = match read_frame(&mut stream).await {
            Ok(msg) => msg,
            Err(e) => {
                warn!("connection from {peer_addr} closed: {e}");
                return;
            }
        };

        let is_client_set = matches!(msg.body, MessageBody::ClientSet { .. });
        let reply_key = msg.from.clone();

        if is_client_set {
            let (tx, rx) = oneshot::channel();
            ephemeral_waiters.lock().unwrap().insert(reply_key.clone(), tx);

            if inbox_tx.send(msg).is_err() {
                return;
            }

            match tokio::time::timeout(CLIENT_REPLY_TIMEOUT, rx).await {
                Ok(Ok(reply)) => {
                    if write_frame(&mut stream, &reply).await.is_err() {
                        return;
                    }
                }
                _ => {
                    ephemeral_waiters.lock().unwrap().remove(&reply_key);
                    return;
                }
            }
            // A client connection sends exactly one request and disconnects.
            return;
        }

        if inbox_tx.send(msg).is_err() {
            return;
        }
    }
}

/// Owns the single outbound connection to one peer. Reconnects on the next
/// queued message after any write/connect failure.
async fn peer_writer(peer: NodeId, addr: SocketAddr, mut rx: mpsc::UnboundedReceiver<Message>) {
    let mut conn: Option<TcpStream> = None;
    while let Some(msg) = rx.recv().await {
        if conn.is_none() {
            conn = TcpStream::connect(addr).await.ok();
            if conn.is_none() {
                warn!("failed to connect to {peer} at {addr}");
                continue;
            }
        }
        if let Some(stream) = conn.as_mut() {
            if let Err(e) = write_frame(stream, &msg).await {
                warn!("send to {peer} failed, will reconnect: {e}");
                conn = None;
            }
        }
    }
}

/// An in-process transport wiring a fixed set of replicas directly
/// together, for deterministic multi-replica tests (§8, S3/S4) that should
/// not depend on the network.
pub struct MemoryTransport {
    peers: HashMap<NodeId, mpsc::UnboundedSender<Message>>,
    inbox_rx: Mutex<mpsc::UnboundedReceiver<Message>>,
}

impl MemoryTransport {
    /// Builds one `MemoryTransport` per id, each already wired to every
    /// other member's inbox.
    pub fn cluster(ids: &[NodeId]) -> HashMap<NodeId, MemoryTransport> {
        let mut txs = HashMap::new();
        let mut rxs = HashMap::new();
        for id in ids {
            let (tx, rx) = mpsc::unbounded_channel();
            txs.insert(id.clone(), tx);
            rxs.insert(id.clone(), rx);
        }
        ids.iter()
            .map(|id| {
                let transport = MemoryTransport {
                    peers: txs.clone(),
                    inbox_rx: Mutex::new(rxs.remove(id).unwrap()),
                };
                (id.clone(), transport)
            })
            .collect()
    }
}

impl Transport for MemoryTransport {
    fn dispatch(&self, msg: Message) {
        if let Some(tx) = self.peers.get(&msg.to) {
            let _ = tx.send(msg);
        }
    }

    fn poll_inbox(&self) -> Vec<Message> {
        let mut rx = self.inbox_rx.lock().unwrap();
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }
}
