//! Command-line interface for the Quarry game server launcher.
//!
//! Argument parsing is done with `clap`; every option here overrides the
//! corresponding setting from the configuration file.

use clap::{Arg, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for plugin directory
    pub plugin_dir: Option<PathBuf>,
    /// Optional override for the client-facing bind address
    pub bind_address: Option<String>,
    /// Optional override for the auth server endpoint
    pub auth_endpoint: Option<String>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

impl CliArgs {
    /// Parses command line arguments using clap.
    ///
    /// All arguments have defaults or are optional, so parsing only fails on
    /// malformed input, in which case clap prints usage and exits.
    pub fn parse() -> Self {
        let matches = Command::new("Quarry Game Server")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Multiplayer world-building game server with a plugin architecture")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("config.toml"),
            )
            .arg(
                Arg::new("plugins")
                    .short('p')
                    .long("plugins")
                    .value_name("DIR")
                    .help("Plugin directory path"),
            )
            .arg(
                Arg::new("bind")
                    .short('b')
                    .long("bind")
                    .value_name("ADDRESS")
                    .help("Client bind address (e.g., 0.0.0.0:52000)"),
            )
            .arg(
                Arg::new("auth")
                    .short('a')
                    .long("auth")
                    .value_name("ADDRESS")
                    .help("Auth server endpoint (e.g., 127.0.0.1:51000)"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(clap::ArgAction::SetTrue),
            )
            .get_matches();

        Self {
            config_path: PathBuf::from(
                matches
                    .get_one::<String>("config")
                    .expect("default config path is always set"),
            ),
            plugin_dir: matches.get_one::<String>("plugins").map(PathBuf::from),
            bind_address: matches.get_one::<String>("bind").cloned(),
            auth_endpoint: matches.get_one::<String>("auth").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}
