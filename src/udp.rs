//! # UDP Transport Provisioning
//!
//! A single UDP socket serves many peers, so a shared demultiplexing task
//! routes each incoming packet by sender address into the matching
//! connection's inbound byte queue. The core never sees the routing step,
//! only an already-routed queue per connection.
//!
//! Datagrams carry no transport-level liveness signal. Connection open and
//! close are a convention between the endpoints: two reserved raw frames,
//! exchanged outside the message codec. Any other first packet from an
//! unknown peer also opens a connection. There is deliberately no timeout
//! logic here; applications that want dead-peer detection layer it on top.

use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::codec::MAX_DATAGRAM_SIZE;
use crate::connection::Connection;
use crate::endpoint::Endpoint;
use crate::error::Result;

/// Reserved control frames. JSON message bodies can never start with '@',
/// so these cannot collide with encoded messages.
const CONNECT_FRAME: &[u8] = b"@connect";
const DISCONNECT_FRAME: &[u8] = b"@disconnect";

/// Server side of a UDP session: one socket, one connection per peer address.
pub struct UdpServer<T> {
    endpoint: Arc<Endpoint<T>>,
    address: String,
}

impl<T> UdpServer<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::new("Server"),
            address: address.into(),
        }
    }

    pub fn endpoint(&self) -> &Arc<Endpoint<T>> {
        &self.endpoint
    }

    pub fn set_on_connected<F>(&self, callback: F)
    where
        F: Fn(&Arc<Connection<T>>) + Send + Sync + 'static,
    {
        self.endpoint.set_on_connected(callback);
    }

    pub fn set_on_disconnected<F>(&self, callback: F)
    where
        F: Fn(&Arc<Connection<T>>) + Send + Sync + 'static,
    {
        self.endpoint.set_on_disconnected(callback);
    }

    pub async fn broadcast(&self, message: T)
    where
        T: Clone,
    {
        self.endpoint.broadcast(message).await;
    }

    pub async fn connections(&self) -> Vec<Arc<Connection<T>>> {
        self.endpoint.connections().await
    }

    /// Bind the socket and start the demultiplexing task.
    ///
    /// Returns the actual bound address, so callers may pass port 0 and
    /// discover the ephemeral port.
    pub async fn start(&self) -> Result<SocketAddr> {
        let socket = Arc::new(UdpSocket::bind(&self.address).await?);
        let local_addr = socket.local_addr()?;

        info!("📡 Server listening on {} (UDP)", local_addr);

        let endpoint = Arc::clone(&self.endpoint);
        tokio::spawn(demux_loop(socket, endpoint));

        Ok(local_addr)
    }
}

/// Route incoming packets to per-peer inbound queues, opening a connection
/// on first contact with an unknown peer.
async fn demux_loop<T>(socket: Arc<UdpSocket>, endpoint: Arc<Endpoint<T>>)
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let mut peers: HashMap<SocketAddr, mpsc::UnboundedSender<Vec<u8>>> = HashMap::new();
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let (len, addr) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                error!("❌ Datagram receive error: {}", e);
                continue;
            }
        };
        let data = &buf[..len];

        if data == DISCONNECT_FRAME {
            if peers.remove(&addr).is_some() {
                debug!("Peer {} sent disconnect frame", addr);
                if let Some(connection) = connection_for(&endpoint, addr).await {
                    connection.terminate_remote();
                }
            }
            continue;
        }

        // Known live peer: hand the raw bytes to its connection.
        if let Some(inbound) = peers.get(&addr) {
            if !inbound.is_closed() {
                if data != CONNECT_FRAME {
                    let _ = inbound.send(data.to_vec());
                }
                continue;
            }
        }

        // Unknown peer, or a stale entry whose connection already closed:
        // first contact opens a fresh connection.
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        if data != CONNECT_FRAME {
            let _ = inbound_tx.send(data.to_vec());
        }
        peers.insert(addr, inbound_tx);

        Arc::clone(&endpoint)
            .open_datagram_connection(Arc::clone(&socket), addr, inbound_rx)
            .await;
    }
}

async fn connection_for<T>(
    endpoint: &Arc<Endpoint<T>>,
    addr: SocketAddr,
) -> Option<Arc<Connection<T>>>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    endpoint
        .connections()
        .await
        .into_iter()
        .find(|c| c.peer_addr() == addr)
}

/// Client side of a UDP session: an ephemeral socket talking to one server.
pub struct UdpClient<T> {
    endpoint: Arc<Endpoint<T>>,
    server_address: String,
    /// Set once connect() succeeds; used by disconnect().
    socket: Mutex<Option<(Arc<UdpSocket>, SocketAddr)>>,
}

impl<T> UdpClient<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(server_address: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::new("Client"),
            server_address: server_address.into(),
            socket: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &Arc<Endpoint<T>> {
        &self.endpoint
    }

    pub fn set_on_connected<F>(&self, callback: F)
    where
        F: Fn(&Arc<Connection<T>>) + Send + Sync + 'static,
    {
        self.endpoint.set_on_connected(callback);
    }

    pub fn set_on_disconnected<F>(&self, callback: F)
    where
        F: Fn(&Arc<Connection<T>>) + Send + Sync + 'static,
    {
        self.endpoint.set_on_disconnected(callback);
    }

    /// Announce ourselves to the server and open the connection.
    pub async fn connect(&self) -> Result<Arc<Connection<T>>> {
        let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);

        let server_addr = tokio::net::lookup_host(&self.server_address)
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("no address found for {}", self.server_address),
                )
            })?;

        socket.send_to(CONNECT_FRAME, server_addr).await?;

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(client_recv_loop(
            Arc::clone(&socket),
            server_addr,
            inbound_tx,
        ));

        let connection = Arc::clone(&self.endpoint)
            .open_datagram_connection(Arc::clone(&socket), server_addr, inbound_rx)
            .await;

        *self.socket.lock().unwrap() = Some((Arc::clone(&socket), server_addr));

        info!("🤝 Client connected to {} (UDP)", server_addr);

        Ok(connection)
    }

    /// Tell the server we are leaving, then close the connection locally.
    pub async fn disconnect(&self) -> Result<()> {
        let socket = self.socket.lock().unwrap().clone();
        if let Some((socket, server_addr)) = socket {
            socket.send_to(DISCONNECT_FRAME, server_addr).await?;
        }

        for connection in self.endpoint.connections().await {
            connection.terminate();
        }

        Ok(())
    }
}

/// Feed server packets into the single connection's inbound queue. Exits on
/// a disconnect frame (dropping the queue, which closes the connection) or
/// once the connection itself is gone.
async fn client_recv_loop(
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    inbound: mpsc::UnboundedSender<Vec<u8>>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let (len, addr) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!("⚠️  Datagram receive error: {}", e);
                continue;
            }
        };

        // Stray packet from somewhere other than our server.
        if addr != server_addr {
            continue;
        }

        let data = &buf[..len];
        if data == DISCONNECT_FRAME {
            debug!("Server sent disconnect frame");
            break;
        }
        if data == CONNECT_FRAME {
            continue;
        }

        if inbound.send(data.to_vec()).is_err() {
            break;
        }
    }
}
