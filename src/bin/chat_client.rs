//! # Chat Client Binary
//!
//! Reads lines from stdin and sends them to the chat server; prints lines
//! relayed from other clients. Type `/quit` to leave.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin chat_client -- --config config/chat.toml --name alice
//! ```

use clap::Parser;
use env_logger::Builder;
use log::{info, LevelFilter};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use peerlink::config::{load_config, NetConfig, Transport};
use peerlink::{Connection, Endpoint, TcpClient, UdpClient};

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

    /// Display name used for outgoing messages
    #[arg(short, long, default_value = "anon")]
    name: String,
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

/// Print everything the server relays from other participants.
fn install_printer(endpoint: &Arc<Endpoint<ChatMessage>>, my_name: &str) {
    let my_name = my_name.to_string();
    endpoint.set_on_connected(move |connection| {
        let my_name = my_name.clone();
        connection.on_message(move |_, message| {
            if message.from != my_name {
                println!("[{}] {}", message.from, message.text);
            }
        });
    });

    endpoint.set_on_disconnected(|_| {
        info!("🔌 Disconnected from server");
    });
}

/// Forward stdin lines to the server until EOF or `/quit`.
async fn chat_loop(connection: &Arc<Connection<ChatMessage>>, name: &str) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let text = line.trim().to_string();
        if text.is_empty() {
            continue;
        }
        if text == "/quit" {
            break;
        }

        connection.send(ChatMessage {
            from: name.to_string(),
            text,
        });
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let args = Args::parse();
    let config: NetConfig = load_config(&args.config)?;

    match config.transport {
        Transport::Tcp => {
            let client = TcpClient::<ChatMessage>::new(config.address.clone());
            install_printer(client.endpoint(), &args.name);

            let connection = client.connect().await?;
            chat_loop(&connection, &args.name).await?;
            connection.terminate();
        }
        Transport::Udp => {
            let client = UdpClient::<ChatMessage>::new(config.address.clone());
            install_printer(client.endpoint(), &args.name);

            let connection = client.connect().await?;
            chat_loop(&connection, &args.name).await?;
            client.disconnect().await?;
        }
    }

    Ok(())
}
