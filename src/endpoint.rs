//! # Endpoint
//!
//! One side of a networking session (client or server), owning the set of
//! active connections and the lifecycle callbacks. For every connection the
//! endpoint spawns exactly one sending task and one receiving task; both run
//! until the connection reaches its terminal state and are never restarted.
//!
//! Transport provisioning is not this module's job: callers hand it an
//! already-connected TCP stream or an already-routed datagram queue (see
//! [`crate::tcp`] and [`crate::udp`] for the bundled wrappers).

use log::{debug, error, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{mpsc, RwLock};

use crate::codec;
use crate::connection::Connection;
use crate::error::{NetError, Result};

type ConnectionCallback<T> = Arc<dyn Fn(&Arc<Connection<T>>) + Send + Sync>;

/// A single endpoint of a networking session, i.e. client or server.
pub struct Endpoint<T> {
    /// Diagnostic label carried in every log line ("Server", "Client", ...).
    name: String,
    connections: RwLock<Vec<Arc<Connection<T>>>>,
    on_connected: Mutex<ConnectionCallback<T>>,
    on_disconnected: Mutex<ConnectionCallback<T>>,
    next_connection_id: AtomicU32,
}

impl<T> Endpoint<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            connections: RwLock::new(Vec::new()),
            on_connected: Mutex::new(Arc::new(|_| {})),
            on_disconnected: Mutex::new(Arc::new(|_| {})),
            next_connection_id: AtomicU32::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The given callback is called when a new connection with another
    /// endpoint has been established. Message listeners should be added
    /// within the callback: messages that arrive while the callback runs are
    /// then guaranteed to be observed, in order. It is also safe to call
    /// `send` or `broadcast` from within the callback.
    pub fn set_on_connected<F>(&self, callback: F)
    where
        F: Fn(&Arc<Connection<T>>) + Send + Sync + 'static,
    {
        *self.on_connected.lock().unwrap() = Arc::new(callback);
    }

    /// The given callback is called exactly once per connection, after its
    /// receiving task has permanently stopped — regardless of which side
    /// initiated the closure.
    pub fn set_on_disconnected<F>(&self, callback: F)
    where
        F: Fn(&Arc<Connection<T>>) + Send + Sync + 'static,
    {
        *self.on_disconnected.lock().unwrap() = Arc::new(callback);
    }

    /// Snapshot of the active connections, in open order (for clients, max
    /// size is 1). Connections opened after this call returns are not
    /// reflected.
    pub async fn connections(&self) -> Vec<Arc<Connection<T>>> {
        self.connections.read().await.clone()
    }

    /// Send the given message to all currently active connections.
    ///
    /// Iterates a stable snapshot: connections closing mid-broadcast are
    /// skipped harmlessly, and connections opened afterwards do not receive
    /// the message.
    pub async fn broadcast(&self, message: T)
    where
        T: Clone,
    {
        let snapshot = self.connections.read().await.clone();
        for connection in &snapshot {
            connection.send(message.clone());
        }
    }

    /// Bind a freshly accepted (or connected) TCP stream to a new connection
    /// and spawn its sending and receiving tasks.
    pub async fn open_stream_connection(
        self: Arc<Self>,
        stream: TcpStream,
    ) -> Result<Arc<Connection<T>>> {
        let peer_addr = stream.peer_addr()?;
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1;

        debug!(
            "{} opening new connection ({}) from {}",
            self.name, id, peer_addr
        );

        let (reader, writer) = stream.into_split();
        let connection = Arc::new(Connection::new(id, peer_addr));

        self.on_connection_opened(&connection).await;

        tokio::spawn(stream_send_loop(
            Arc::clone(&self),
            Arc::clone(&connection),
            writer,
        ));
        tokio::spawn(stream_recv_loop(
            Arc::clone(&self),
            Arc::clone(&connection),
            reader,
        ));

        Ok(connection)
    }

    /// Bind a demultiplexed datagram peer to a new connection and spawn its
    /// sending and receiving tasks.
    ///
    /// `inbound` must already carry only this peer's raw packets; routing by
    /// peer address happens upstream (see [`crate::udp`]).
    pub async fn open_datagram_connection(
        self: Arc<Self>,
        socket: Arc<UdpSocket>,
        peer_addr: SocketAddr,
        inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Arc<Connection<T>> {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1;

        debug!(
            "{} opening datagram connection ({}) to {}",
            self.name, id, peer_addr
        );

        let connection = Arc::new(Connection::new(id, peer_addr));

        self.on_connection_opened(&connection).await;

        tokio::spawn(datagram_send_loop(
            Arc::clone(&self),
            Arc::clone(&connection),
            socket,
        ));
        tokio::spawn(datagram_recv_loop(
            Arc::clone(&self),
            Arc::clone(&connection),
            inbound,
        ));

        connection
    }

    async fn on_connection_opened(&self, connection: &Arc<Connection<T>>) {
        self.connections.write().await.push(Arc::clone(connection));

        debug!(
            "{} successfully opened connection ({})",
            self.name,
            connection.id()
        );

        let callback = Arc::clone(&*self.on_connected.lock().unwrap());
        callback(connection);
    }

    /// Runs exactly once per connection, from its receiving task's exit path.
    async fn on_connection_closed(&self, connection: &Arc<Connection<T>>) {
        connection.mark_closed();

        self.connections
            .write()
            .await
            .retain(|c| c.id() != connection.id());

        debug!("{} connection ({}) was closed", self.name, connection.id());

        let callback = Arc::clone(&*self.on_disconnected.lock().unwrap());
        callback(connection);
    }
}

/// Drain the outbound queue onto the stream, one frame per message.
///
/// On write failure the loop is left; resolving the connection state is the
/// receive path's job. Dropping the write half on exit shuts down our side
/// of the stream, so a local close reaches the peer as a clean end-of-stream.
async fn stream_send_loop<T>(
    endpoint: Arc<Endpoint<T>>,
    connection: Arc<Connection<T>>,
    mut writer: OwnedWriteHalf,
) where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let Some(mut outbound) = connection.take_outbound_rx() else {
        return;
    };
    let mut shutdown = connection.subscribe_shutdown();

    while connection.is_connected() {
        tokio::select! {
            _ = shutdown.changed() => break,
            next = outbound.recv() => {
                let Some(message) = next else { break };

                if let Err(e) = codec::write_stream_message(&mut writer, &message).await {
                    error!(
                        "{} connection ({}) failed to write message: {}",
                        endpoint.name,
                        connection.id(),
                        e
                    );
                    break;
                }
            }
        }
    }
}

/// Decode messages off the stream and fan them out, splitting transport
/// failures three ways: clean remote close, abrupt disconnect, protocol
/// error. Invokes the endpoint's closed hook exactly once on exit.
async fn stream_recv_loop<T>(
    endpoint: Arc<Endpoint<T>>,
    connection: Arc<Connection<T>>,
    mut reader: OwnedReadHalf,
) where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let mut shutdown = connection.subscribe_shutdown();

    while connection.is_connected() {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = codec::read_stream_message::<T, _>(&mut reader) => match result {
                Ok(message) => connection.notify_message_received(message),
                Err(NetError::EndOfStream) => {
                    debug!(
                        "{} connection ({}) was correctly closed from remote endpoint",
                        endpoint.name,
                        connection.id()
                    );
                    connection.terminate_remote();
                }
                Err(NetError::Disconnected(reason)) => {
                    // A socket error after a local terminate is a symptom of
                    // our own teardown, not a new failure.
                    if !connection.is_closed_locally() {
                        debug!(
                            "{} connection ({}) was unexpectedly disconnected: {}",
                            endpoint.name,
                            connection.id(),
                            reason
                        );
                        connection.terminate_remote();
                    }
                }
                Err(e) => {
                    warn!(
                        "{} connection ({}) had an error during receive: {}",
                        endpoint.name,
                        connection.id(),
                        e
                    );
                    connection.terminate_remote();
                }
            }
        }
    }

    endpoint.on_connection_closed(&connection).await;
}

/// Drain the outbound queue into fire-and-forget datagrams.
async fn datagram_send_loop<T>(
    endpoint: Arc<Endpoint<T>>,
    connection: Arc<Connection<T>>,
    socket: Arc<UdpSocket>,
) where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let Some(mut outbound) = connection.take_outbound_rx() else {
        return;
    };
    let mut shutdown = connection.subscribe_shutdown();

    while connection.is_connected() {
        tokio::select! {
            _ = shutdown.changed() => break,
            next = outbound.recv() => {
                let Some(message) = next else { break };

                let bytes = match codec::encode_datagram(&message) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(
                            "{} connection ({}) failed to encode datagram: {}",
                            endpoint.name,
                            connection.id(),
                            e
                        );
                        continue;
                    }
                };

                if let Err(e) = socket.send_to(&bytes, connection.peer_addr()).await {
                    error!(
                        "{} connection ({}) failed to send datagram: {}",
                        endpoint.name,
                        connection.id(),
                        e
                    );
                    break;
                }
            }
        }
    }
}

/// Drain the per-connection inbound byte queue, decoding one message per
/// packet. A malformed packet is discarded alone; there is no end-of-stream
/// on datagrams, so the loop ends only via terminate or a closed queue.
async fn datagram_recv_loop<T>(
    endpoint: Arc<Endpoint<T>>,
    connection: Arc<Connection<T>>,
    mut inbound: mpsc::UnboundedReceiver<Vec<u8>>,
) where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let mut shutdown = connection.subscribe_shutdown();

    while connection.is_connected() {
        tokio::select! {
            _ = shutdown.changed() => break,
            next = inbound.recv() => match next {
                Some(bytes) => match codec::decode_datagram::<T>(&bytes) {
                    Ok(message) => connection.notify_message_received(message),
                    Err(e) => {
                        warn!(
                            "{} connection ({}) discarding malformed datagram: {}",
                            endpoint.name,
                            connection.id(),
                            e
                        );
                    }
                },
                None => {
                    debug!(
                        "{} connection ({}) inbound queue was closed",
                        endpoint.name,
                        connection.id()
                    );
                    connection.terminate_remote();
                }
            }
        }
    }

    endpoint.on_connection_closed(&connection).await;
}
