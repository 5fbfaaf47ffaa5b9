//! Test client: walks the full login/session/join flow against running auth
//! and game servers.

use clap::Parser;
use game_client::AuthClient;
use std::net::SocketAddr;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Quarry handshake test client", long_about = None)]
struct Args {
    /// Auth server datagram endpoint
    #[arg(long, default_value = "127.0.0.1:51000")]
    auth: SocketAddr,

    /// Game server connection endpoint
    #[arg(long, default_value = "127.0.0.1:52000")]
    server: SocketAddr,

    /// Username to log in with
    #[arg(short, long, default_value = "TestPlayer")]
    username: String,

    /// Password to log in with
    #[arg(short, long, default_value = "password")]
    password: String,
}

#[tokio::main]
async fn main() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    if let Err(e) = run(&args).await {
        error!("Test run failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    info!("Logging in to {} as {}", args.auth, args.username);
    let mut client = AuthClient::new(args.auth).await?;
    client.login(&args.username, &args.password).await?;

    info!("Requesting session with {}", args.server);
    client
        .request_session(&args.server.ip().to_string(), args.server.port())
        .await?;

    let game = client.join(args.server).await?;
    let init = game.init();
    info!("Connected to '{}': {}", init.server_name, init.intro);
    info!(
        "{} player(s) online, {} level(s) advertised",
        init.online_count,
        init.levels.len()
    );
    for level in &init.levels {
        info!("  level '{}' ({} online)", level.name, level.online);
    }

    game.disconnect().await?;
    info!("Disconnected cleanly");
    Ok(())
}
