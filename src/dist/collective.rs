// Collective primitives
// Barrier synchronization across the process group

use anyhow::{Context, Result};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Mutex;
use std::time::Duration;

use super::process::ProcessIdentity;

const BARRIER: u8 = b'B';
const CONNECT_ATTEMPTS: u32 = 60;
const CONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// Synchronization primitive shared by every rank of a process group
///
/// `barrier` is a hard synchronization point: no rank returns from it until
/// every rank has entered it. `shutdown` runs once after the run completes
/// and releases whatever the backend holds.
pub trait Collective: Send + Sync {
    fn world_size(&self) -> usize;

    fn barrier(&self) -> Result<()>;

    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Single-process collective: every operation is a no-op
pub struct NoopCollective;

impl Collective for NoopCollective {
    fn world_size(&self) -> usize {
        1
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }
}

/// Rendezvous endpoint, read once at startup alongside the topology
pub fn master_endpoint_from_env() -> String {
    let addr = std::env::var("MASTER_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("MASTER_PORT").unwrap_or_else(|_| "29500".to_string());
    format!("{}:{}", addr, port)
}

enum Role {
    /// Rank 0 holds one stream per non-zero rank
    Root { peers: Mutex<Vec<TcpStream>> },
    /// Every other rank holds a single stream to rank 0
    Leaf { root: Mutex<TcpStream> },
}

/// TCP barrier backend
///
/// Rank 0 listens on the master endpoint and accepts one connection per
/// non-zero rank; a barrier is one byte to the root and one byte back.
/// Gradient synchronization and weight gathering stay inside the model
/// provider; this backend only orders control flow.
pub struct TcpCollective {
    world_size: usize,
    role: Role,
}

impl TcpCollective {
    /// Establish the rendezvous for this rank
    pub fn connect(identity: &ProcessIdentity, endpoint: &str) -> Result<Self> {
        let role = if identity.is_main() {
            let listener = TcpListener::bind(endpoint)
                .with_context(|| format!("Failed to bind rendezvous endpoint {}", endpoint))?;
            let mut peers = Vec::with_capacity(identity.world_size - 1);
            for _ in 1..identity.world_size {
                let (mut stream, addr) = listener
                    .accept()
                    .context("Failed to accept a peer connection")?;
                let mut rank_buf = [0u8; 4];
                stream
                    .read_exact(&mut rank_buf)
                    .context("Peer hung up during rendezvous handshake")?;
                let peer_rank = u32::from_be_bytes(rank_buf);
                tracing::debug!(peer_rank, peer_addr = %addr, "Accepted peer");
                stream.set_nodelay(true)?;
                peers.push(stream);
            }
            Role::Root {
                peers: Mutex::new(peers),
            }
        } else {
            let mut stream = connect_with_retry(endpoint)?;
            stream
                .write_all(&(identity.rank as u32).to_be_bytes())
                .context("Failed to send rank during rendezvous handshake")?;
            stream.set_nodelay(true)?;
            Role::Leaf {
                root: Mutex::new(stream),
            }
        };

        tracing::info!(
            rank = identity.rank,
            world_size = identity.world_size,
            endpoint,
            "Process group rendezvous complete"
        );

        Ok(Self {
            world_size: identity.world_size,
            role,
        })
    }
}

fn connect_with_retry(endpoint: &str) -> Result<TcpStream> {
    let mut last_err = None;
    for _ in 0..CONNECT_ATTEMPTS {
        match TcpStream::connect(endpoint) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                last_err = Some(e);
                std::thread::sleep(CONNECT_BACKOFF);
            }
        }
    }
    Err(last_err.unwrap()).with_context(|| {
        format!(
            "Could not reach the rendezvous endpoint {} after {} attempts",
            endpoint, CONNECT_ATTEMPTS
        )
    })
}

impl Collective for TcpCollective {
    fn world_size(&self) -> usize {
        self.world_size
    }

    fn barrier(&self) -> Result<()> {
        match &self.role {
            Role::Root { peers } => {
                let mut peers = peers.lock().expect("collective lock poisoned");
                let mut byte = [0u8; 1];
                for stream in peers.iter_mut() {
                    stream
                        .read_exact(&mut byte)
                        .context("A peer dropped out of the barrier")?;
                }
                for stream in peers.iter_mut() {
                    stream
                        .write_all(&[BARRIER])
                        .context("Failed to release a peer from the barrier")?;
                }
            }
            Role::Leaf { root } => {
                let mut root = root.lock().expect("collective lock poisoned");
                root.write_all(&[BARRIER])
                    .context("Rank 0 is unreachable at the barrier")?;
                let mut byte = [0u8; 1];
                root.read_exact(&mut byte)
                    .context("Rank 0 dropped out of the barrier")?;
            }
        }
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        // Final synchronization so every rank agrees the run is complete
        // before connections drop.
        self.barrier()
    }
}
