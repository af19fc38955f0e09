//! # TCP Transport Provisioning
//!
//! Thin wrappers that own the listen/accept and connect mechanics and hand
//! live streams to an [`Endpoint`]. Nagle's algorithm is disabled on every
//! stream before it is bound to a connection.

use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

use crate::connection::Connection;
use crate::endpoint::Endpoint;
use crate::error::Result;

/// Server side of a TCP session: accepts any number of clients.
pub struct TcpServer<T> {
    endpoint: Arc<Endpoint<T>>,
    address: String,
}

impl<T> TcpServer<T>
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

    /// Bind the listener and start accepting in a background task.
    ///
    /// Returns the actual bound address, so callers may pass port 0 and
    /// discover the ephemeral port.
    pub async fn start(&self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(&self.address).await?;
        let local_addr = listener.local_addr()?;

        info!("📡 Server listening on {}", local_addr);

        let endpoint = Arc::clone(&self.endpoint);
        tokio::spawn(accept_loop(listener, endpoint));

        Ok(local_addr)
    }
}

async fn accept_loop<T>(listener: TcpListener, endpoint: Arc<Endpoint<T>>)
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("Server accepted connection from {}", addr);

                if let Err(e) = stream.set_nodelay(true) {
                    warn!("⚠️  Failed to disable Nagle's algorithm for {}: {}", addr, e);
                }

                if let Err(e) = Arc::clone(&endpoint).open_stream_connection(stream).await {
                    error!("❌ Failed to open connection from {}: {}", addr, e);
                }
            }
            Err(e) => error!("❌ Accept error: {}", e),
        }
    }
}

/// Client side of a TCP session: at most one connection to a server.
pub struct TcpClient<T> {
    endpoint: Arc<Endpoint<T>>,
    address: String,
}

impl<T> TcpClient<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::new("Client"),
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

    /// Connect to the server and open the connection.
    pub async fn connect(&self) -> Result<Arc<Connection<T>>> {
        let stream = TcpStream::connect(&self.address).await?;
        stream.set_nodelay(true)?;

        info!("🤝 Client connected to {}", self.address);

        Arc::clone(&self.endpoint).open_stream_connection(stream).await
    }
}
