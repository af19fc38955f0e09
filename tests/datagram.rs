//! End-to-end tests for the UDP transport: demultiplexing by peer address,
//! packet-scoped decode failures, and the connect/disconnect convention.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use peerlink::codec::encode_datagram;
use peerlink::{Endpoint, UdpClient, UdpServer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Note {
    seq: u32,
    text: String,
}

fn note(seq: u32, text: &str) -> Note {
    Note {
        seq,
        text: text.to_string(),
    }
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn wait_for_connection_count<T>(endpoint: &Arc<Endpoint<T>>, count: usize)
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    timeout(Duration::from_secs(5), async {
        while endpoint.connections().await.len() != count {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection count not reached in time");
}

#[tokio::test]
async fn round_trip_with_echo() {
    let server = UdpServer::<Note>::new("127.0.0.1:0");

    let (tx, mut rx) = mpsc::unbounded_channel();
    server.set_on_connected(move |connection| {
        let tx = tx.clone();
        connection.on_message(move |conn, message| {
            let _ = tx.send(message.clone());
            conn.send(note(message.seq + 100, "echo"));
        });
    });

    let addr = server.start().await.unwrap();

    let client = UdpClient::<Note>::new(addr.to_string());
    let (echo_tx, mut echo_rx) = mpsc::unbounded_channel();
    client.set_on_connected(move |connection| {
        let echo_tx = echo_tx.clone();
        connection.on_message(move |_, message| {
            let _ = echo_tx.send(message.clone());
        });
    });

    let connection = client.connect().await.unwrap();
    connection.send(note(1, "ping"));

    assert_eq!(recv(&mut rx).await, note(1, "ping"));
    assert_eq!(recv(&mut echo_rx).await, note(101, "echo"));
}

#[tokio::test]
async fn malformed_packet_only_drops_that_packet() {
    let server = UdpServer::<Note>::new("127.0.0.1:0");

    let (tx, mut rx) = mpsc::unbounded_channel();
    server.set_on_connected(move |connection| {
        let tx = tx.clone();
        connection.on_message(move |_, message| {
            let _ = tx.send(message.clone());
        });
    });

    let disconnects = Arc::new(AtomicUsize::new(0));
    {
        let counter = Arc::clone(&disconnects);
        server.set_on_disconnected(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }

    let addr = server.start().await.unwrap();

    let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    raw.send_to(&encode_datagram(&note(1, "good")).unwrap(), addr)
        .await
        .unwrap();
    raw.send_to(b"\x00\x01 definitely not json", addr)
        .await
        .unwrap();
    raw.send_to(&encode_datagram(&note(2, "also good")).unwrap(), addr)
        .await
        .unwrap();

    assert_eq!(recv(&mut rx).await, note(1, "good"));
    assert_eq!(recv(&mut rx).await, note(2, "also good"));

    // One peer, one connection, still alive.
    assert_eq!(server.connections().await.len(), 1);
    assert_eq!(disconnects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn disconnect_frame_closes_the_connection() {
    let server = UdpServer::<Note>::new("127.0.0.1:0");

    let server_disconnects = Arc::new(AtomicUsize::new(0));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    {
        let counter = Arc::clone(&server_disconnects);
        server.set_on_disconnected(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = done_tx.send(());
        });
    }

    let addr = server.start().await.unwrap();

    let client = UdpClient::<Note>::new(addr.to_string());
    let client_disconnects = Arc::new(AtomicUsize::new(0));
    {
        let counter = Arc::clone(&client_disconnects);
        client.set_on_disconnected(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }

    let connection = client.connect().await.unwrap();
    wait_for_connection_count(server.endpoint(), 1).await;

    client.disconnect().await.unwrap();

    recv(&mut done_rx).await;
    sleep(Duration::from_millis(200)).await;

    assert_eq!(server_disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(client_disconnects.load(Ordering::SeqCst), 1);
    assert!(server.connections().await.is_empty());
    assert!(!connection.is_connected());
    assert!(connection.is_closed_locally());
}

#[tokio::test]
async fn peer_can_reconnect_after_disconnect() {
    let server = UdpServer::<Note>::new("127.0.0.1:0");

    let connects = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();
    {
        let counter = Arc::clone(&connects);
        server.set_on_connected(move |connection| {
            counter.fetch_add(1, Ordering::SeqCst);

            let tx = tx.clone();
            connection.on_message(move |_, message| {
                let _ = tx.send(message.clone());
            });
        });
    }

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    server.set_on_disconnected(move |_| {
        let _ = done_tx.send(());
    });

    let addr = server.start().await.unwrap();

    // Same source address throughout: first contact opens, the disconnect
    // frame closes, the next packet opens a fresh connection.
    let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    raw.send_to(&encode_datagram(&note(1, "hello")).unwrap(), addr)
        .await
        .unwrap();
    assert_eq!(recv(&mut rx).await, note(1, "hello"));

    raw.send_to(b"@disconnect", addr).await.unwrap();
    recv(&mut done_rx).await;
    assert!(server.connections().await.is_empty());

    raw.send_to(&encode_datagram(&note(2, "back again")).unwrap(), addr)
        .await
        .unwrap();
    assert_eq!(recv(&mut rx).await, note(2, "back again"));

    assert_eq!(connects.load(Ordering::SeqCst), 2);
    assert_eq!(server.connections().await.len(), 1);
}
