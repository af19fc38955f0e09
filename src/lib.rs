//! # peerlink
//!
//! A typed message networking layer for client/server applications. One
//! [`Endpoint`] per side owns the active [`Connection`]s; each connection
//! exchanges messages of a single serde-serializable type over TCP or UDP,
//! with a dedicated sending task and receiving task per connection.

pub mod codec;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod tcp;
pub mod udp;

pub use connection::{Connection, ConnectionState};
pub use endpoint::Endpoint;
pub use error::{NetError, Result};
pub use tcp::{TcpClient, TcpServer};
pub use udp::{UdpClient, UdpServer};
