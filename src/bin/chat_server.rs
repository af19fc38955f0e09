//! # Chat Server Binary
//!
//! Relay server for the line-based chat demo: every message received from
//! one client is broadcast to all connected clients.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin chat_server -- --config config/chat.toml
//! ```

use clap::Parser;
use env_logger::Builder;
use log::{info, LevelFilter};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;

use peerlink::config::{load_config, NetConfig, Transport};
use peerlink::{Endpoint, TcpServer, UdpServer};

/// One line of chat, tagged with the sender's display name.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    from: String,
    text: String,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the network configuration file (TOML format)
    #[arg(short, long, default_value = "config/chat.toml")]
    config: String,
}

fn init_logger() {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(LevelFilter::Info)
        .init();
}

/// Relay every received message to all connected clients.
fn install_relay(endpoint: &Arc<Endpoint<ChatMessage>>) {
    let relay = Arc::clone(endpoint);
    endpoint.set_on_connected(move |connection| {
        info!(
            "🔗 Connection ({}) joined from {}",
            connection.id(),
            connection.peer_addr()
        );

        let relay = Arc::clone(&relay);
        connection.on_message(move |_, message| {
            info!("[{}] {}", message.from, message.text);

            let relay = Arc::clone(&relay);
            let message = message.clone();
            tokio::spawn(async move {
                relay.broadcast(message).await;
            });
        });
    });

    endpoint.set_on_disconnected(|connection| {
        info!("🔌 Connection ({}) left", connection.id());
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let args = Args::parse();
    let config: NetConfig = load_config(&args.config)?;

    match config.transport {
        Transport::Tcp => {
            let server = TcpServer::<ChatMessage>::new(config.address.clone());
            install_relay(server.endpoint());
            server.start().await?;
        }
        Transport::Udp => {
            let server = UdpServer::<ChatMessage>::new(config.address.clone());
            install_relay(server.endpoint());
            server.start().await?;
        }
    }

    // The accept/demux task carries the work from here on.
    std::future::pending::<()>().await;

    Ok(())
}
