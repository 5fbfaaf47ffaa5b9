//! Interactive operator console on stdin.
//!
//! Accepts `help`, `stats` and `exit`. `exit` triggers the same graceful
//! shutdown path as Ctrl+C.

use game_server::GameServer;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

/// What the console loop should do after a command.
#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleAction {
    Continue,
    Exit,
}

/// Reads operator commands from stdin until `exit` is entered.
///
/// When stdin is closed (for example under a process supervisor) the loop
/// parks forever so the signal handler stays the only shutdown trigger.
pub async fn run_console(server: Arc<GameServer>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if handle_command(&line, &server).await == ConsoleAction::Exit {
                    return;
                }
            }
            Ok(None) => {
                std::future::pending::<()>().await;
            }
            Err(e) => {
                warn!("Console input error, disabling console: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Executes a single console command.
pub async fn handle_command(line: &str, server: &Arc<GameServer>) -> ConsoleAction {
    match line.trim().to_lowercase().as_str() {
        "" => ConsoleAction::Continue,
        "help" => {
            println!("Available commands:");
            println!("  help   - show this help");
            println!("  stats  - show server statistics");
            println!("  exit   - gracefully shut the server down");
            ConsoleAction::Continue
        }
        "stats" => {
            let stats = server.get_stats().await;
            println!("Server statistics:");
            println!("  players connected:  {}", stats.player_count);
            println!("  pending logins:     {}", stats.pending_sessions);
            println!("  plugins loaded:     {}", stats.plugin_count);
            println!("  handlers registered: {}", stats.events.total_handlers);
            println!("  events emitted:     {}", stats.events.events_emitted);
            println!("  handlers skipped:   {}", stats.events.handlers_skipped);
            ConsoleAction::Continue
        }
        "exit" | "quit" => ConsoleAction::Exit,
        other => {
            println!("Unknown command '{}'. Type 'help' for a list.", other);
            ConsoleAction::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use game_server::ServerConfig;

    fn test_server() -> Arc<GameServer> {
        Arc::new(GameServer::new(ServerConfig::default()))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn exit_and_quit_stop_the_loop() {
        let server = test_server();
        assert_eq!(handle_command("exit", &server).await, ConsoleAction::Exit);
        assert_eq!(handle_command("  QUIT  ", &server).await, ConsoleAction::Exit);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn other_commands_keep_the_loop_running() {
        let server = test_server();
        assert_eq!(handle_command("help", &server).await, ConsoleAction::Continue);
        assert_eq!(handle_command("stats", &server).await, ConsoleAction::Continue);
        assert_eq!(handle_command("", &server).await, ConsoleAction::Continue);
        assert_eq!(handle_command("bogus", &server).await, ConsoleAction::Continue);
    }
}
