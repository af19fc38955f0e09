//! # Connection
//!
//! One logical bidirectional channel to a single peer, backed by either a
//! stream or a datagram transport. A connection owns its outbound message
//! queue and fans incoming messages out to registered listeners; the actual
//! I/O is driven by the pair of tasks its [`Endpoint`](crate::Endpoint)
//! spawned for it.

use log::debug;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Mutex;
use tokio::sync::{mpsc, watch};

type MessageListener<T> = Box<dyn Fn(&Connection<T>, &T) + Send + Sync>;

const STATE_OPEN: u8 = 0;
const STATE_CLOSING_LOCAL: u8 = 1;
const STATE_CLOSING_REMOTE: u8 = 2;
const STATE_CLOSED: u8 = 3;

/// Lifecycle of a [`Connection`].
///
/// `Open` is initial, `Closed` is terminal. The two closing states record
/// which side initiated the shutdown while the background tasks wind down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    ClosingLocal,
    ClosingRemote,
    Closed,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            STATE_OPEN => ConnectionState::Open,
            STATE_CLOSING_LOCAL => ConnectionState::ClosingLocal,
            STATE_CLOSING_REMOTE => ConnectionState::ClosingRemote,
            _ => ConnectionState::Closed,
        }
    }
}

/// A live peer-to-peer channel carrying messages of type `T`.
pub struct Connection<T> {
    id: u32,
    peer_addr: SocketAddr,
    state: AtomicU8,
    closed_locally: AtomicBool,
    outbound_tx: mpsc::UnboundedSender<T>,
    /// Taken exactly once by the sending task at spawn time.
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<T>>>,
    listeners: Mutex<Vec<MessageListener<T>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl<T> Connection<T> {
    pub(crate) fn new(id: u32, peer_addr: SocketAddr) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            id,
            peer_addr,
            state: AtomicU8::new(STATE_OPEN),
            closed_locally: AtomicBool::new(false),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            listeners: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    /// Identifier unique within this connection's endpoint.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Address of the remote peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True only while the connection is fully open.
    pub fn is_connected(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_OPEN
    }

    /// True if the local side initiated the close. Used to tell a socket
    /// error caused by our own teardown apart from a genuine remote failure.
    pub fn is_closed_locally(&self) -> bool {
        self.closed_locally.load(Ordering::Acquire)
    }

    /// Enqueue a message for delivery to the peer.
    ///
    /// Never blocks and never fails. If the sending task has already exited
    /// the message is silently dropped; delivery is best-effort once a close
    /// is underway.
    pub fn send(&self, message: T) {
        if self.outbound_tx.send(message).is_err() {
            debug!(
                "connection ({}) dropped an outgoing message, sending task has stopped",
                self.id
            );
        }
    }

    /// Register a listener for incoming messages.
    ///
    /// Listeners are invoked in registration order, synchronously on the
    /// receiving task. Register inside the endpoint's connected callback to
    /// be guaranteed to observe every message on this connection. Listener
    /// code must not block for long: it stalls subsequent delivery for this
    /// connection (and only this connection).
    pub fn on_message<F>(&self, listener: F)
    where
        F: Fn(&Connection<T>, &T) + Send + Sync + 'static,
    {
        self.listeners.lock().unwrap().push(Box::new(listener));
    }

    /// Deliver a received message to all listeners, in registration order.
    /// Invoked only by this connection's receiving task.
    pub(crate) fn notify_message_received(&self, message: T) {
        let listeners = self.listeners.lock().unwrap();
        for listener in listeners.iter() {
            listener(self, &message);
        }
    }

    /// Close this connection from the local side.
    ///
    /// Idempotent and safe to call from any task, including concurrently
    /// with a remote-initiated close. Both background tasks are woken so
    /// they can exit their loops; the disconnected callback fires once the
    /// receiving task has stopped.
    pub fn terminate(&self) {
        self.close(true);
    }

    /// Close observed from the remote side (clean EOF, abrupt disconnect, or
    /// a closed inbound queue).
    pub(crate) fn terminate_remote(&self) {
        self.close(false);
    }

    fn close(&self, local: bool) {
        let target = if local {
            STATE_CLOSING_LOCAL
        } else {
            STATE_CLOSING_REMOTE
        };

        if self
            .state
            .compare_exchange(STATE_OPEN, target, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            && local
        {
            self.closed_locally.store(true, Ordering::Release);
        }

        // Wake both tasks regardless of who won the transition.
        self.shutdown_tx.send_replace(true);
    }

    /// Final transition, once the receiving task has stopped.
    pub(crate) fn mark_closed(&self) {
        self.state.store(STATE_CLOSED, Ordering::Release);
    }

    pub(crate) fn take_outbound_rx(&self) -> Option<mpsc::UnboundedReceiver<T>> {
        self.outbound_rx.lock().unwrap().take()
    }

    pub(crate) fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }
}

impl<T> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}
