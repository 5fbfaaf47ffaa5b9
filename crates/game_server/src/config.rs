//! Server configuration.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use uuid::Uuid;

/// A level advertised in the approval hail's join list. The live player count
/// is filled in when the hail is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelSummary {
    pub name: String,
    /// Stable per-level identifier; generated when absent from the config.
    #[serde(default = "Uuid::new_v4")]
    pub uuid: Uuid,
    #[serde(default)]
    pub rating: f64,
}

/// Configuration for the game server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address for the connection-oriented (client) channel.
    pub bind_address: SocketAddr,
    /// Address for the connectionless channel shared with the auth server.
    pub datagram_bind_address: SocketAddr,
    /// The auth server's datagram endpoint. Only datagrams whose sender
    /// address equals this endpoint are trusted.
    pub auth_endpoint: SocketAddr,
    /// Server identity sent in the approval hail.
    pub server_name: String,
    pub description: String,
    pub intro: String,
    /// Levels advertised in the approval hail.
    pub levels: Vec<LevelSummary>,
    /// Directory scanned for plugins.
    pub plugin_directory: PathBuf,
    /// Bind one accept loop per CPU core with SO_REUSEPORT.
    pub use_reuse_port: bool,
    /// Pending logins older than this are denied and evicted.
    pub pending_session_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 52000)),
            datagram_bind_address: SocketAddr::from(([0, 0, 0, 0], 52001)),
            auth_endpoint: SocketAddr::from(([127, 0, 0, 1], 51000)),
            server_name: "Quarry Server".to_string(),
            description: "A Quarry game server".to_string(),
            intro: "Welcome!".to_string(),
            levels: Vec::new(),
            plugin_directory: PathBuf::from("plugins"),
            use_reuse_port: false,
            pending_session_timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let config = ServerConfig::default();
        assert_eq!(config.pending_session_timeout_secs, 30);
        assert!(!config.use_reuse_port);
        assert_eq!(config.plugin_directory, PathBuf::from("plugins"));
    }
}
