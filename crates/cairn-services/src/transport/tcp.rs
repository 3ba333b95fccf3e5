//! TCP transport.
//!
//! Each endpoint owns a listener on `host:0` and is addressed as
//! `tcp://host:port`. On the socket a frame is three length-prefixed byte
//! strings (u32 big-endian length, then bytes): sender address, header,
//! payload. Outbound connections are opened on first use and cached per
//! target until the peer hangs up; inbound connections are read by tasks
//! owned by the endpoint and torn down with it.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};

use cairn_core::wire::{Address, Frame, MAX_FRAME_LEN};

use super::{Endpoint, Transport, TransportError};

const SCHEME: &str = "tcp://";

/// Mints endpoints listening on one interface address.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    host: String,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    pub fn localhost() -> Self {
        Self::new("127.0.0.1")
    }
}

fn socket_addr(address: &Address) -> Result<SocketAddr, TransportError> {
    address
        .as_str()
        .strip_prefix(SCHEME)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| TransportError::InvalidAddress(address.clone()))
}

fn start(listener: TcpListener) -> Result<TcpEndpoint, TransportError> {
    let local = listener.local_addr().map_err(|source| TransportError::Io {
        address: Address::new(SCHEME),
        source,
    })?;
    let address = Address::new(format!("{SCHEME}{local}"));
    let (inbox_tx, inbox) = mpsc::unbounded_channel();
    let acceptor = tokio::spawn(accept_loop(listener, address.clone(), inbox_tx));

    tracing::debug!(%address, "tcp endpoint listening");
    Ok(TcpEndpoint {
        address,
        inbox,
        connections: Arc::new(Mutex::new(HashMap::new())),
        next_connection: AtomicU64::new(0),
        acceptor,
    })
}

#[async_trait]
impl Transport for TcpTransport {
    async fn bind(&self) -> Result<Box<dyn Endpoint>, TransportError> {
        let listener = TcpListener::bind((self.host.as_str(), 0))
            .await
            .map_err(|source| TransportError::Io {
                address: Address::new(format!("{SCHEME}{}:0", self.host)),
                source,
            })?;
        Ok(Box::new(start(listener)?))
    }

    async fn bind_at(&self, address: &Address) -> Result<Box<dyn Endpoint>, TransportError> {
        let socket = socket_addr(address)?;
        let listener = TcpListener::bind(socket).await.map_err(|source| {
            if source.kind() == io::ErrorKind::AddrInUse {
                TransportError::AddressInUse(address.clone())
            } else {
                TransportError::Io {
                    address: address.clone(),
                    source,
                }
            }
        })?;
        Ok(Box::new(start(listener)?))
    }
}

/// Write half of a connection we opened, tagged so a stale watcher never
/// evicts its replacement.
struct Outbound {
    id: u64,
    writer: OwnedWriteHalf,
}

type Connections = Arc<Mutex<HashMap<Address, Outbound>>>;

pub struct TcpEndpoint {
    address: Address,
    inbox: mpsc::UnboundedReceiver<Frame>,
    connections: Connections,
    next_connection: AtomicU64,
    acceptor: JoinHandle<()>,
}

impl Drop for TcpEndpoint {
    fn drop(&mut self) {
        // Dropping the acceptor's JoinSet aborts every connection reader too.
        self.acceptor.abort();
    }
}

#[async_trait]
impl Endpoint for TcpEndpoint {
    fn address(&self) -> &Address {
        &self.address
    }

    async fn send(&self, target: &Address, header: Bytes, payload: Bytes) -> Result<(), TransportError> {
        let wire = encode_frame(&self.address, &header, &payload)?;
        let mut connections = self.connections.lock().await;

        if let Some(outbound) = connections.get_mut(target) {
            match outbound.writer.write_all(&wire).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::debug!(%target, error = %e, "cached connection failed, reconnecting");
                    connections.remove(target);
                }
            }
        }

        let socket = socket_addr(target)?;
        let stream = TcpStream::connect(socket).await.map_err(|e| {
            tracing::debug!(%target, error = %e, "connect failed");
            TransportError::Unreachable(target.clone())
        })?;
        let _ = stream.set_nodelay(true);
        let (reader, mut writer) = stream.into_split();
        writer
            .write_all(&wire)
            .await
            .map_err(|source| TransportError::Io {
                address: target.clone(),
                source,
            })?;

        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        connections.insert(target.clone(), Outbound { id, writer });
        tokio::spawn(watch_outbound(
            reader,
            target.clone(),
            id,
            Arc::downgrade(&self.connections),
        ));
        Ok(())
    }

    async fn recv(&mut self) -> Result<Frame, TransportError> {
        self.inbox
            .recv()
            .await
            .ok_or_else(|| TransportError::Closed(self.address.clone()))
    }
}

// ── Socket loops ─────────────────────────────────────────────────────────────

async fn accept_loop(listener: TcpListener, address: Address, inbox: mpsc::UnboundedSender<Frame>) {
    let mut readers = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(a) => a,
                    Err(e) => {
                        tracing::warn!(%address, error = %e, "accept failed");
                        continue;
                    }
                };
                tracing::trace!(%address, %peer, "inbound connection");
                readers.spawn(read_connection(stream, inbox.clone()));
            }

            Some(finished) = readers.join_next(), if !readers.is_empty() => {
                if let Ok(Err(e)) = finished {
                    tracing::debug!(%address, error = %e, "inbound connection dropped");
                }
            }
        }
    }
}

/// Peers never write back on a connection we opened, so EOF or an error
/// here means the peer is gone and its cached writer is dead.
async fn watch_outbound(
    mut reader: OwnedReadHalf,
    target: Address,
    id: u64,
    connections: Weak<Mutex<HashMap<Address, Outbound>>>,
) {
    let mut scratch = [0u8; 64];
    while let Ok(n) = reader.read(&mut scratch).await {
        if n == 0 {
            break;
        }
    }

    let Some(connections) = connections.upgrade() else {
        return;
    };
    let mut connections = connections.lock().await;
    if connections.get(&target).is_some_and(|c| c.id == id) {
        connections.remove(&target);
        tracing::trace!(%target, "outbound connection closed by peer");
    }
}

async fn read_connection(mut stream: TcpStream, inbox: mpsc::UnboundedSender<Frame>) -> io::Result<()> {
    loop {
        let sender = match read_part(&mut stream).await {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        };
        let header = read_part(&mut stream).await?;
        let payload = read_part(&mut stream).await?;

        let frame = Frame {
            address: Address::new(String::from_utf8_lossy(&sender).into_owned()),
            header,
            payload,
        };
        if inbox.send(frame).is_err() {
            // Endpoint is gone.
            return Ok(());
        }
    }
}

async fn read_part<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Bytes> {
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame part of {len} bytes exceeds limit"),
        ));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

fn encode_frame(sender: &Address, header: &[u8], payload: &[u8]) -> Result<Bytes, TransportError> {
    let parts = [sender.as_str().as_bytes(), header, payload];
    let total: usize = parts.iter().map(|p| 4 + p.len()).sum();
    let mut buf = BytesMut::with_capacity(total);
    for part in parts {
        if part.len() > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge(part.len()));
        }
        buf.put_u32(part.len() as u32);
        buf.put_slice(part);
    }
    Ok(buf.freeze())
}
