//! Configuration management for the Quarry game server launcher.
//!
//! Loads, validates and converts server settings from a TOML file. A missing
//! config file is not an error: a default one is written in its place so the
//! operator has something concrete to edit.

use game_server::{LevelSummary, ServerConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

fn default_pending_session_timeout() -> u64 {
    30
}

/// Application configuration loaded from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration settings
    pub server: ServerSettings,
    /// Auth server settings
    pub auth: AuthSettings,
    /// Plugin configuration settings
    pub plugins: PluginSettings,
    /// Logging configuration settings
    pub logging: LoggingSettings,
}

/// Server-specific configuration settings.
///
/// Controls the two network bindings, the advertised identity and the level
/// list sent to clients in the approval hail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Address for the client connection channel (e.g., "0.0.0.0:52000")
    pub bind_address: String,
    /// Address for the datagram channel shared with the auth server
    pub datagram_bind_address: String,
    /// Server name advertised to clients
    pub server_name: String,
    /// Short description advertised to clients
    #[serde(default)]
    pub description: String,
    /// Intro text shown to players on join
    #[serde(default)]
    pub intro: String,
    /// Levels advertised in the approval hail
    #[serde(default)]
    pub levels: Vec<LevelSummary>,
    /// Whether to use SO_REUSEPORT for multi-threaded accept loops (Linux only)
    #[serde(default)]
    pub use_reuse_port: bool,
    /// Seconds before an unanswered login attempt is denied and evicted
    #[serde(default = "default_pending_session_timeout")]
    pub pending_session_timeout_secs: u64,
}

/// Auth server settings.
///
/// The game server trusts exactly one datagram endpoint for session verdicts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// The auth server's datagram endpoint (e.g., "127.0.0.1:51000")
    pub endpoint: String,
}

/// Plugin system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSettings {
    /// Directory path where plugin files are located
    pub directory: String,
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_address: "0.0.0.0:52000".to_string(),
                datagram_bind_address: "0.0.0.0:52001".to_string(),
                server_name: "Quarry Server".to_string(),
                description: "A Quarry game server".to_string(),
                intro: "Welcome!".to_string(),
                levels: Vec::new(),
                use_reuse_port: false,
                pending_session_timeout_secs: 30,
            },
            auth: AuthSettings {
                endpoint: "127.0.0.1:51000".to_string(),
            },
            plugins: PluginSettings {
                directory: "plugins".to_string(),
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes a default configuration file at the
    /// given path and returns the defaults.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Converts the application configuration into the game server's config.
    pub fn to_server_config(&self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        Ok(ServerConfig {
            bind_address: self.server.bind_address.parse()?,
            datagram_bind_address: self.server.datagram_bind_address.parse()?,
            auth_endpoint: self.auth.endpoint.parse()?,
            server_name: self.server.server_name.clone(),
            description: self.server.description.clone(),
            intro: self.server.intro.clone(),
            levels: self.server.levels.clone(),
            plugin_directory: PathBuf::from(&self.plugins.directory),
            use_reuse_port: self.server.use_reuse_port,
            pending_session_timeout_secs: self.server.pending_session_timeout_secs,
        })
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        for (label, addr) in [
            ("bind address", &self.server.bind_address),
            ("datagram bind address", &self.server.datagram_bind_address),
            ("auth endpoint", &self.auth.endpoint),
        ] {
            if addr.parse::<std::net::SocketAddr>().is_err() {
                return Err(format!("Invalid {label}: {addr}"));
            }
        }

        if self.server.server_name.trim().is_empty() {
            return Err("Server name cannot be empty".to_string());
        }

        if self.server.pending_session_timeout_secs == 0 {
            return Err("Pending session timeout must be at least one second".to_string());
        }

        if self.plugins.directory.is_empty() {
            return Err("Plugin directory cannot be empty".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}
