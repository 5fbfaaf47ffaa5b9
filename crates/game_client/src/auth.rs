//! Client-side auth state machine.
//!
//! A client walks three states, in order:
//!
//! 1. `Unauthenticated`: credentials not yet accepted;
//! 2. `Authenticated`: the auth server issued an identity token;
//! 3. `PendingSessionRequest`: a session with a target game server was
//!    requested; the next step is the TCP hail.
//!
//! Failed logins stay in `Unauthenticated` with the reason surfaced. A denied
//! join falls back to `Authenticated` so the client can request a session
//! with another server. The identity token never outlives this state machine
//! or the [`GameConnection`](crate::GameConnection) it is handed to.

use crate::connection::GameConnection;
use crate::error::ClientError;
use quarry_net::{DatagramChannel, FramedConnection, NetError};
use quarry_protocol::{
    AuthLogin, Message, MessageBody, MessageContext, PublicKey, Session, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The identity token issued at login. Owned by the auth client or the game
/// connection and dropped when the session ends; it is never stored anywhere
/// else.
#[derive(Debug, Clone)]
pub struct Identity {
    pub username: String,
    pub uuid: Uuid,
    pub public_key: String,
    pub private_key: String,
}

enum AuthState {
    Unauthenticated,
    Authenticated(Identity),
    PendingSessionRequest(Identity),
}

impl AuthState {
    fn name(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticated(_) => "authenticated",
            Self::PendingSessionRequest(_) => "pending session request",
        }
    }
}

/// Client endpoint of the connectionless auth channel.
pub struct AuthClient {
    datagram: DatagramChannel,
    auth_endpoint: SocketAddr,
    response_timeout: Duration,
    state: AuthState,
}

impl AuthClient {
    /// Binds a local datagram endpoint for talking to the auth server.
    pub async fn new(auth_endpoint: SocketAddr) -> Result<Self, ClientError> {
        let bind = if auth_endpoint.is_ipv4() {
            SocketAddr::from((std::net::Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, 0))
        };
        Ok(Self {
            datagram: DatagramChannel::bind(bind).await?,
            auth_endpoint,
            response_timeout: Duration::from_secs(10),
            state: AuthState::Unauthenticated,
        })
    }

    pub fn set_response_timeout(&mut self, response_timeout: Duration) {
        self.response_timeout = response_timeout;
    }

    /// The identity issued at login, while one is held.
    pub fn identity(&self) -> Option<&Identity> {
        match &self.state {
            AuthState::Unauthenticated => None,
            AuthState::Authenticated(identity) => Some(identity),
            AuthState::PendingSessionRequest(identity) => Some(identity),
        }
    }

    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    /// Sends credentials to the auth server and waits for the verdict.
    ///
    /// On success the issued identity is held and the client becomes
    /// authenticated. A rejected login surfaces the server's reason and
    /// leaves the state unchanged, so the call can simply be retried.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), ClientError> {
        if !matches!(self.state, AuthState::Unauthenticated) {
            return Err(ClientError::InvalidState(format!(
                "login while {}",
                self.state.name()
            )));
        }

        let mut request = Message::new(MessageBody::AuthLogin(AuthLogin {
            version: PROTOCOL_VERSION,
            username: username.to_string(),
            password: password.to_string(),
        }));
        self.datagram
            .send_to(&request.encode(MessageContext::Client)?, self.auth_endpoint)
            .await?;

        loop {
            let message = self.recv_from_auth().await?;
            match message.body {
                MessageBody::AuthInit(init) => {
                    info!("🔑 Logged in as {} ({})", init.username, init.uuid);
                    self.state = AuthState::Authenticated(Identity {
                        username: init.username,
                        uuid: init.uuid,
                        public_key: init.public_key,
                        private_key: init.private_key,
                    });
                    return Ok(());
                }
                MessageBody::FailedLogin(failed) => {
                    return Err(ClientError::LoginFailed(failed.reason));
                }
                // The auth server may interleave plugin downloads; they do
                // not resolve the login.
                MessageBody::PluginDownload(download) => {
                    debug!("Plugin offered during login: {}", download.mod_name);
                }
                other => return Err(ClientError::UnexpectedMessage(other.kind().name())),
            }
        }
    }

    /// Asks the auth server to arrange a session with a target game server.
    ///
    /// The auth server pushes its verdict to the game server directly; the
    /// client's next step is [`join`](Self::join).
    pub async fn request_session(
        &mut self,
        target_host: &str,
        target_port: u16,
    ) -> Result<(), ClientError> {
        let identity = match std::mem::replace(&mut self.state, AuthState::Unauthenticated) {
            AuthState::Authenticated(identity) => identity,
            other => {
                let name = other.name();
                self.state = other;
                return Err(ClientError::InvalidState(format!(
                    "session request while {name}"
                )));
            }
        };

        let mut request = Message::new(MessageBody::Session(Session {
            username: identity.username.clone(),
            uuid: identity.uuid,
            private_key: identity.private_key.clone(),
            target_host: target_host.to_string(),
            target_port,
        }));
        let bytes = request.encode(MessageContext::Client)?;
        if let Err(e) = self.datagram.send_to(&bytes, self.auth_endpoint).await {
            self.state = AuthState::Authenticated(identity);
            return Err(e.into());
        }

        debug!(
            "Requested session with {}:{} for {}",
            target_host, target_port, identity.uuid
        );
        self.state = AuthState::PendingSessionRequest(identity);
        Ok(())
    }

    /// Hails the game server with the public half of the identity token.
    ///
    /// Approval hands the identity to the returned [`GameConnection`]. A
    /// denial keeps the identity here and falls back to authenticated, so
    /// the client can request a session elsewhere.
    pub async fn join(&mut self, server_addr: SocketAddr) -> Result<GameConnection, ClientError> {
        let identity = match std::mem::replace(&mut self.state, AuthState::Unauthenticated) {
            AuthState::PendingSessionRequest(identity) => identity,
            other => {
                let name = other.name();
                self.state = other;
                return Err(ClientError::InvalidState(format!("join while {name}")));
            }
        };

        let mut hail = Message::new(MessageBody::PublicKey(PublicKey {
            username: identity.username.clone(),
            uuid: identity.uuid,
            public_key: identity.public_key.clone(),
        }));
        let hail_bytes = match hail.encode(MessageContext::Client) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.state = AuthState::Authenticated(identity);
                return Err(e.into());
            }
        };

        match FramedConnection::connect_with_hail(server_addr, &hail_bytes).await {
            Ok((connection, approval)) => match GameConnection::new(connection, identity, &approval)
            {
                Ok(game) => {
                    info!("🎮 Joined {} as {}", server_addr, game.identity().username);
                    Ok(game)
                }
                Err((identity, e)) => {
                    self.state = AuthState::Authenticated(identity);
                    Err(e)
                }
            },
            Err(NetError::HailDenied(reason)) => {
                warn!("Join denied by {}: {}", server_addr, reason);
                self.state = AuthState::Authenticated(identity);
                Err(ClientError::JoinDenied(reason))
            }
            Err(e) => {
                self.state = AuthState::Authenticated(identity);
                Err(e.into())
            }
        }
    }

    /// Receives the next datagram from the configured auth endpoint,
    /// dropping datagrams from any other sender.
    async fn recv_from_auth(&self) -> Result<Message, ClientError> {
        let payload = timeout(self.response_timeout, async {
            loop {
                let (payload, from) = self.datagram.recv_from().await?;
                if from != self.auth_endpoint {
                    warn!("Dropping datagram from unexpected sender {}", from);
                    continue;
                }
                return Ok::<_, ClientError>(payload);
            }
        })
        .await
        .map_err(|_| ClientError::Timeout)??;
        Ok(Message::decode(&payload, MessageContext::Server)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_protocol::{AuthInit, FailedLogin, Init};
    use std::sync::Arc;
    use tokio::net::{TcpListener, UdpSocket};

    /// Stub auth server: accepts "alice"/"secret", rejects everything else.
    async fn spawn_auth_stub() -> SocketAddr {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                let Ok(message) = Message::decode(&buf[..len], MessageContext::Client) else {
                    continue;
                };
                let reply = match message.body {
                    MessageBody::AuthLogin(login)
                        if login.username == "alice" && login.password == "secret" =>
                    {
                        MessageBody::AuthInit(AuthInit {
                            username: login.username,
                            uuid: Uuid::new_v4(),
                            private_key: "priv-key".to_string(),
                            public_key: "pub-key".to_string(),
                        })
                    }
                    MessageBody::AuthLogin(_) => MessageBody::FailedLogin(FailedLogin {
                        reason: "bad credentials".to_string(),
                    }),
                    // Session requests are acknowledged towards the game
                    // server, not the client.
                    MessageBody::Session(_) => continue,
                    _ => continue,
                };
                let bytes = Message::new(reply)
                    .encode(MessageContext::Server)
                    .unwrap();
                let _ = socket.send_to(&bytes, from).await;
            }
        });
        addr
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn successful_login_holds_the_identity() {
        let auth = spawn_auth_stub().await;
        let mut client = AuthClient::new(auth).await.unwrap();
        assert_eq!(client.state_name(), "unauthenticated");

        client.login("alice", "secret").await.unwrap();
        assert_eq!(client.state_name(), "authenticated");
        let identity = client.identity().unwrap();
        assert_eq!(identity.username, "alice");
        assert_eq!(identity.public_key, "pub-key");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_login_stays_unauthenticated_with_reason() {
        let auth = spawn_auth_stub().await;
        let mut client = AuthClient::new(auth).await.unwrap();

        let err = client.login("alice", "wrong").await.unwrap_err();
        assert!(matches!(err, ClientError::LoginFailed(reason) if reason == "bad credentials"));
        assert_eq!(client.state_name(), "unauthenticated");
        assert!(client.identity().is_none());

        // The state machine allows an immediate retry.
        client.login("alice", "secret").await.unwrap();
        assert_eq!(client.state_name(), "authenticated");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn operations_out_of_order_are_refused() {
        let auth = spawn_auth_stub().await;
        let mut client = AuthClient::new(auth).await.unwrap();

        let err = client.request_session("127.0.0.1", 52000).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidState(_)));
        let err = client.join("127.0.0.1:52000".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidState(_)));

        client.login("alice", "secret").await.unwrap();
        let err = client.login("alice", "secret").await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidState(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn join_hands_the_identity_to_the_connection() {
        let auth = spawn_auth_stub().await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let mut conn = FramedConnection::from_accepted(stream, peer);
            let hail = conn.read_hail().await.unwrap();
            let message = Message::decode(&hail, MessageContext::Client).unwrap();
            let MessageBody::PublicKey(key) = message.body else {
                panic!("expected a public key hail");
            };
            assert_eq!(key.username, "alice");

            let approval = Message::new(MessageBody::Init(Init {
                server_name: "stub".to_string(),
                description: String::new(),
                intro: "hi".to_string(),
                online_count: 1,
                levels: Vec::new(),
            }))
            .encode(MessageContext::Server)
            .unwrap();
            conn.approve(&approval).await.unwrap();
            // Hold the connection open until the client is done.
            let _ = conn.read_frame().await;
        });

        let mut client = AuthClient::new(auth).await.unwrap();
        client.login("alice", "secret").await.unwrap();
        client
            .request_session("127.0.0.1", server_addr.port())
            .await
            .unwrap();
        assert_eq!(client.state_name(), "pending session request");

        let game = client.join(server_addr).await.unwrap();
        assert_eq!(game.init().server_name, "stub");
        assert_eq!(game.identity().username, "alice");
        // The identity moved into the connection.
        assert!(client.identity().is_none());
        assert_eq!(client.state_name(), "unauthenticated");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn denied_join_falls_back_to_authenticated() {
        let auth = spawn_auth_stub().await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let mut conn = FramedConnection::from_accepted(stream, peer);
            conn.read_hail().await.unwrap();
            conn.deny("session could not be validated").await.unwrap();
        });

        let mut client = AuthClient::new(auth).await.unwrap();
        client.login("alice", "secret").await.unwrap();
        client
            .request_session("127.0.0.1", server_addr.port())
            .await
            .unwrap();

        let err = client.join(server_addr).await.unwrap_err();
        assert!(
            matches!(err, ClientError::JoinDenied(reason) if reason == "session could not be validated")
        );
        assert_eq!(client.state_name(), "authenticated");
        assert!(client.identity().is_some());
    }
}
