//! Per-connection handshake handling, message routing and the auth datagram
//! listener.
//!
//! Each accepted connection runs on its own task: read the identity hail,
//! announce the login on the bus, park in the pending-session table until the
//! auth server's verdict arrives, then either deny or promote to a roster
//! player and route inbound frames through the bus.

use crate::config::ServerConfig;
use crate::connection::{ConnectionManager, Player};
use crate::error::ServerError;
use crate::session::{PendingSession, PendingSessionTable, SessionVerdict};
use quarry_event_system::{
    current_timestamp, DisconnectReason, EventSystem, PlayerConnectedEvent,
    PlayerDisconnectedEvent, PlayerId, RawClientMessageEvent, UserLoginRequestedEvent,
};
use quarry_net::{DatagramChannel, FramedConnection};
use quarry_protocol::{
    Init, LevelInfo, Message, MessageBody, MessageContext, PublicKey,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Everything a connection task needs, shared across all of them.
pub(crate) struct ServerShared {
    pub config: ServerConfig,
    pub events: Arc<EventSystem>,
    pub connections: Arc<ConnectionManager>,
    pub sessions: Arc<PendingSessionTable>,
    pub datagram: DatagramChannel,
}

/// Drives one client connection from hail to disconnect.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    shared: Arc<ServerShared>,
) -> Result<(), ServerError> {
    let mut conn = FramedConnection::from_accepted(stream, addr);
    let hail = conn.read_hail().await?;

    let key = match Message::decode(&hail, MessageContext::Client) {
        Ok(Message {
            body: MessageBody::PublicKey(key),
            ..
        }) => key,
        Ok(other) => {
            warn!("Unexpected {} hail from {}", other.kind(), addr);
            conn.deny("expected a public key hail").await?;
            return Ok(());
        }
        Err(e) => {
            warn!("Malformed hail from {}: {}", addr, e);
            conn.deny("malformed hail").await?;
            return Ok(());
        }
    };

    let player_id = PlayerId::from(key.uuid);
    let flow = shared
        .events
        .emit_core(
            "user_login_requested",
            &UserLoginRequestedEvent {
                player_id,
                username: key.username.clone(),
                remote_addr: addr.to_string(),
                timestamp: current_timestamp(),
            },
        )
        .await?;
    if flow.is_cancelled() {
        // The reserved-initial handler cancels duplicates; plugins may cancel
        // for their own reasons.
        let reason = if shared.connections.contains(player_id) {
            "already connected"
        } else {
            "login refused"
        };
        conn.deny(reason).await?;
        return Ok(());
    }

    let (verdict_tx, verdict_rx) = oneshot::channel();
    let pending = PendingSession {
        username: key.username.clone(),
        public_key: key.public_key.clone(),
        remote_addr: addr,
        created_at: Instant::now(),
        verdict_tx,
    };
    if let Some(superseded) = shared.sessions.put(key.uuid, pending).await {
        info!(
            "Login for {} supersedes a pending session from {}",
            key.uuid, superseded.remote_addr
        );
        let _ = superseded.verdict_tx.send(SessionVerdict::Denied(
            "superseded by a newer login request".to_string(),
        ));
    }

    let mut forward = Message::new(MessageBody::PublicKey(key.clone()));
    let bytes = forward.encode(MessageContext::Server)?;
    if let Err(e) = shared
        .datagram
        .send_to(&bytes, shared.config.auth_endpoint)
        .await
    {
        shared.sessions.take_if_present(key.uuid).await;
        let _ = conn.deny("auth server unreachable").await;
        return Err(e.into());
    }
    debug!("Forwarded public key for {} to auth server", key.uuid);

    // The background sweep is the timeout authority; a dropped sender means
    // the entry was evicted without a verdict.
    let verdict = verdict_rx
        .await
        .unwrap_or_else(|_| SessionVerdict::Denied("authentication timed out".to_string()));

    match verdict {
        SessionVerdict::Denied(reason) => {
            info!("🚫 Denied {} from {}: {}", key.username, addr, reason);
            conn.deny(&reason).await?;
            Ok(())
        }
        SessionVerdict::Approved => run_player_session(conn, key, addr, shared).await,
    }
}

/// Promotes an approved connection to a roster player and routes its frames
/// until disconnect.
async fn run_player_session(
    mut conn: FramedConnection,
    key: PublicKey,
    addr: SocketAddr,
    shared: Arc<ServerShared>,
) -> Result<(), ServerError> {
    let player_id = PlayerId::from(key.uuid);
    let (sender_tx, mut sender_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let player = Player::new(player_id, key.username.clone(), addr, sender_tx);
    if !shared.connections.insert(player) {
        // The identity connected elsewhere while this login was pending.
        conn.deny("already connected").await?;
        return Ok(());
    }

    let online_count = shared.connections.count() as u32;
    let levels = shared
        .config
        .levels
        .iter()
        .map(|level| LevelInfo {
            name: level.name.clone(),
            uuid: level.uuid,
            online: online_count,
            rating: level.rating,
        })
        .collect();
    let mut init = Message::new(MessageBody::Init(Init {
        server_name: shared.config.server_name.clone(),
        description: shared.config.description.clone(),
        intro: shared.config.intro.clone(),
        online_count,
        levels,
    }));
    let approval = match init.encode(MessageContext::Server) {
        Ok(bytes) => bytes,
        Err(e) => {
            shared.connections.remove(player_id);
            return Err(e.into());
        }
    };
    if let Err(e) = conn.approve(&approval).await {
        shared.connections.remove(player_id);
        return Err(e.into());
    }
    info!("✅ Approved session for {} ({})", key.username, player_id);

    shared
        .events
        .emit_core(
            "player_connected",
            &PlayerConnectedEvent {
                player_id,
                username: key.username.clone(),
                remote_addr: addr.to_string(),
                timestamp: current_timestamp(),
            },
        )
        .await?;

    let (mut read_half, mut write_half) = conn.into_split();
    let writer = tokio::spawn(async move {
        while let Some(frame) = sender_rx.recv().await {
            if write_half.write_frame(&frame).await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let reason = loop {
        match read_half.read_frame().await {
            Ok(Some(frame)) => match Message::decode(&frame, MessageContext::Client) {
                Ok(message) => {
                    let kind = message.kind();
                    let event = RawClientMessageEvent {
                        player_id,
                        message_kind: kind.name().to_string(),
                        data: frame,
                        timestamp: current_timestamp(),
                    };
                    if let Err(e) = shared.events.emit_client("raw", kind.name(), &event).await {
                        error!("Failed to route {} message from {}: {}", kind, player_id, e);
                    }
                }
                // Protocol violations are logged, not fatal to the process.
                Err(e) => warn!("Protocol violation from {}: {}", player_id, e),
            },
            Ok(None) => break DisconnectReason::ClientDisconnect,
            Err(e) => break DisconnectReason::Error(e.to_string()),
        }
    };

    shared.connections.remove(player_id);
    writer.abort();
    shared
        .events
        .emit_core(
            "player_disconnected",
            &PlayerDisconnectedEvent {
                player_id,
                username: key.username,
                reason,
                timestamp: current_timestamp(),
            },
        )
        .await?;
    Ok(())
}

/// Receives auth-server datagrams and resolves pending sessions.
///
/// Sender-address equality against the configured auth endpoint is the only
/// authentication of the auth server; datagrams from anywhere else are
/// dropped with a warning.
pub(crate) async fn run_auth_listener(
    shared: Arc<ServerShared>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            result = shared.datagram.recv_from() => {
                match result {
                    Ok((payload, from)) => {
                        if from != shared.config.auth_endpoint {
                            warn!("Dropping datagram from unexpected sender {}", from);
                            continue;
                        }
                        handle_auth_datagram(&shared, &payload).await;
                    }
                    Err(e) => {
                        error!("Auth channel receive failed: {}", e);
                        break;
                    }
                }
            }
        }
    }
}

async fn handle_auth_datagram(shared: &ServerShared, payload: &[u8]) {
    match Message::decode(payload, MessageContext::Server) {
        Ok(Message {
            body: MessageBody::ValidSession(verdict),
            ..
        }) => match shared.sessions.take_if_present(verdict.uuid).await {
            Some(pending) => {
                let outcome = if verdict.valid {
                    SessionVerdict::Approved
                } else {
                    SessionVerdict::Denied("session could not be validated".to_string())
                };
                debug!(
                    "Auth verdict for {} ({}): valid={}",
                    pending.username, verdict.uuid, verdict.valid
                );
                let _ = pending.verdict_tx.send(outcome);
            }
            None => {
                info!(
                    "Verdict for unknown or expired session {}, dropping",
                    verdict.uuid
                );
            }
        },
        Ok(other) => warn!("Unexpected {} message from auth server", other.kind()),
        Err(e) => warn!("Malformed datagram from auth server: {}", e),
    }
}
