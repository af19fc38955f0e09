//! # Configuration Utilities
//!
//! TOML-backed configuration for the demo binaries.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;

/// Load a TOML configuration file and deserialize it into the specified type.
pub fn load_config<T>(path: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)?;
    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Which transport a session runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    Udp,
}

/// Network settings shared by the chat server and client binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetConfig {
    /// Address the server binds, and the client connects to
    /// (e.g. "127.0.0.1:7777").
    pub address: String,
    /// Transport to run the session over.
    pub transport: Transport,
}
