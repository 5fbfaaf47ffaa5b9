//! Quarry game server launcher.
//!
//! Parses the CLI, loads the TOML configuration, wires up logging and runs
//! the game server until a termination signal arrives.

mod cli;
mod config;
mod console;
mod signals;

use cli::CliArgs;
use config::{AppConfig, LoggingSettings};
use game_server::GameServer;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the logging system from the `[logging]` config section.
///
/// `RUST_LOG` takes precedence over the configured level when set.
fn setup_logging(config: &LoggingSettings) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));
    let registry = tracing_subscriber::registry().with(filter);

    if config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .init();
    }

    info!("🔧 Logging initialized with level: {}", config.level);
    Ok(())
}

/// The launcher application: configuration plus the server it drives.
pub struct Application {
    config: AppConfig,
    server: Arc<GameServer>,
}

impl Application {
    /// Loads configuration, applies CLI overrides and builds the server.
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(plugin_dir) = args.plugin_dir {
            config.plugins.directory = plugin_dir.to_string_lossy().to_string();
        }
        if let Some(bind_address) = args.bind_address {
            config.server.bind_address = bind_address;
        }
        if let Some(auth_endpoint) = args.auth_endpoint {
            config.auth.endpoint = auth_endpoint;
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {}", e).into());
        }

        setup_logging(&config.logging)?;

        let server_config = config.to_server_config()?;
        let server = Arc::new(GameServer::new(server_config));

        info!("🚀 Quarry Game Server v{}", env!("CARGO_PKG_VERSION"));
        info!(
            "📂 Config: {} | Plugins: {}",
            args.config_path.display(),
            config.plugins.directory
        );

        Ok(Self { config, server })
    }

    /// Runs the server until a shutdown signal arrives.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("📋 Configuration Summary:");
        info!("  🌐 Client bind address: {}", self.config.server.bind_address);
        info!(
            "  📡 Datagram bind address: {}",
            self.config.server.datagram_bind_address
        );
        info!("  🔑 Auth endpoint: {}", self.config.auth.endpoint);
        info!("  🔌 Plugin directory: {}", self.config.plugins.directory);
        info!(
            "  ⏰ Pending session timeout: {}s",
            self.config.server.pending_session_timeout_secs
        );
        info!("  🗺️ Levels advertised: {}", self.config.server.levels.len());

        let server_handle = {
            let server = self.server.clone();
            tokio::spawn(async move {
                match server.start().await {
                    Ok(()) => info!("✅ Server completed successfully"),
                    Err(e) => {
                        error!("❌ Server error: {}", e);
                        std::process::exit(1);
                    }
                }
            })
        };

        // Periodic health line so an idle log still shows the server alive.
        let monitoring_handle = {
            let server = self.server.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));
                let mut last_events_emitted = 0u64;
                loop {
                    interval.tick().await;
                    let stats = server.get_stats().await;
                    let events_this_period =
                        stats.events.events_emitted.saturating_sub(last_events_emitted);
                    last_events_emitted = stats.events.events_emitted;
                    info!(
                        "📊 System Health - {} events/min | {} player(s) | {} pending login(s) | {} plugin(s)",
                        events_this_period,
                        stats.player_count,
                        stats.pending_sessions,
                        stats.plugin_count
                    );
                }
            })
        };

        info!("✅ Quarry Server is now running!");
        info!(
            "🎮 Ready to accept connections on {}",
            self.config.server.bind_address
        );
        info!("🛑 Press Ctrl+C or type 'exit' to gracefully shutdown");

        tokio::select! {
            result = signals::wait_for_shutdown_signal() => {
                result?;
                info!("🛑 Shutdown signal received, initiating graceful shutdown...");
            }
            _ = console::run_console(self.server.clone()) => {
                info!("🛑 Console exit requested, initiating graceful shutdown...");
            }
        }

        monitoring_handle.abort();
        self.server.shutdown();

        // start() runs the cleanup path; give it a bounded window to finish.
        match tokio::time::timeout(Duration::from_secs(10), server_handle).await {
            Ok(_) => {}
            Err(_) => warn!("Server cleanup did not finish in time"),
        }

        let final_stats = self.server.get_stats().await;
        info!("📊 Final Statistics:");
        info!(
            "  - Total events processed: {}",
            final_stats.events.events_emitted
        );
        info!("  - Handlers registered: {}", final_stats.events.total_handlers);

        info!("👋 Quarry Game Server shutdown complete");
        Ok(())
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start application: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
