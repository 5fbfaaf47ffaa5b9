//! End-to-end handshake tests with an in-test stub auth peer over UDP.

use game_server::{GameServer, ServerConfig};
use quarry_net::{FramedConnection, NetError};
use quarry_protocol::{Message, MessageBody, MessageContext, PublicKey, ValidSession};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use uuid::Uuid;

/// Binds the stub auth socket, builds a server pointed at it and spawns the
/// server task. Returns the stub socket for the test to drive.
async fn start_server(
    pending_timeout_secs: u64,
) -> (Arc<GameServer>, game_server::BoundAddrs, Arc<UdpSocket>, tempfile::TempDir) {
    let auth_socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let auth_endpoint = auth_socket.local_addr().unwrap();
    let plugin_dir = tempfile::tempdir().unwrap();

    let config = ServerConfig {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        datagram_bind_address: "127.0.0.1:0".parse().unwrap(),
        auth_endpoint,
        server_name: "integration".to_string(),
        plugin_directory: plugin_dir.path().to_path_buf(),
        pending_session_timeout_secs: pending_timeout_secs,
        ..ServerConfig::default()
    };

    let server = Arc::new(GameServer::new(config));
    let runner = server.clone();
    tokio::spawn(async move {
        let _ = runner.start().await;
    });
    let addrs = server.bound_addrs().await.unwrap();
    (server, addrs, auth_socket, plugin_dir)
}

/// Auth stub: answers every forwarded public key with a verdict.
fn run_auth_stub(socket: Arc<UdpSocket>, valid: bool) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                break;
            };
            let Ok(message) = Message::decode(&buf[..len], MessageContext::Server) else {
                continue;
            };
            if let MessageBody::PublicKey(key) = message.body {
                let mut verdict = Message::new(MessageBody::ValidSession(ValidSession {
                    username: key.username,
                    uuid: key.uuid,
                    valid,
                }));
                let bytes = verdict.encode(MessageContext::Server).unwrap();
                let _ = socket.send_to(&bytes, from).await;
            }
        }
    });
}

fn hail(username: &str, uuid: Uuid) -> Vec<u8> {
    Message::new(MessageBody::PublicKey(PublicKey {
        username: username.to_string(),
        uuid,
        public_key: "pub-key".to_string(),
    }))
    .encode(MessageContext::Client)
    .unwrap()
}

async fn wait_for_player_count(server: &GameServer, expected: usize) {
    for _ in 0..100 {
        if server.get_stats().await.player_count == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "player count never reached {expected} (now {})",
        server.get_stats().await.player_count
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn approved_login_joins_exactly_once() {
    let (server, addrs, auth_socket, _plugins) = start_server(30).await;
    run_auth_stub(auth_socket, true);

    let alice = Uuid::new_v4();
    let (conn, approval) = FramedConnection::connect_with_hail(addrs.connection, &hail("alice", alice))
        .await
        .unwrap();
    let init = Message::decode(&approval, MessageContext::Server).unwrap();
    let MessageBody::Init(init) = init.body else {
        panic!("approval hail was not an init message");
    };
    assert_eq!(init.server_name, "integration");
    assert_eq!(init.online_count, 1);
    assert_eq!(server.get_stats().await.player_count, 1);

    // A second login for the same identity is denied without touching auth,
    // and alice still appears exactly once.
    let err = FramedConnection::connect_with_hail(addrs.connection, &hail("alice", alice))
        .await
        .unwrap_err();
    match err {
        NetError::HailDenied(reason) => assert_eq!(reason, "already connected"),
        other => panic!("expected denial, got {other:?}"),
    }
    assert_eq!(server.get_stats().await.player_count, 1);

    // Disconnecting frees the identity for a fresh login.
    drop(conn);
    wait_for_player_count(&server, 0).await;
    let (_conn, _approval) =
        FramedConnection::connect_with_hail(addrs.connection, &hail("alice", alice))
            .await
            .unwrap();
    wait_for_player_count(&server, 1).await;

    server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_session_is_denied() {
    let (server, addrs, auth_socket, _plugins) = start_server(30).await;
    run_auth_stub(auth_socket, false);

    let err = FramedConnection::connect_with_hail(addrs.connection, &hail("mallory", Uuid::new_v4()))
        .await
        .unwrap_err();
    match err {
        NetError::HailDenied(reason) => assert_eq!(reason, "session could not be validated"),
        other => panic!("expected denial, got {other:?}"),
    }
    assert_eq!(server.get_stats().await.player_count, 0);

    server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_auth_endpoint_denies_with_a_reason() {
    // Port zero is never a routable destination, so the public-key forward
    // fails immediately. The client must still get a denial frame instead of
    // a bare connection close.
    let plugin_dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        datagram_bind_address: "127.0.0.1:0".parse().unwrap(),
        auth_endpoint: "127.0.0.1:0".parse().unwrap(),
        server_name: "integration".to_string(),
        plugin_directory: plugin_dir.path().to_path_buf(),
        pending_session_timeout_secs: 30,
        ..ServerConfig::default()
    };
    let server = Arc::new(GameServer::new(config));
    let runner = server.clone();
    tokio::spawn(async move {
        let _ = runner.start().await;
    });
    let addrs = server.bound_addrs().await.unwrap();

    let err = FramedConnection::connect_with_hail(addrs.connection, &hail("bob", Uuid::new_v4()))
        .await
        .unwrap_err();
    match err {
        NetError::HailDenied(reason) => assert_eq!(reason, "auth server unreachable"),
        other => panic!("expected denial, got {other:?}"),
    }
    assert_eq!(server.get_stats().await.player_count, 0);
    assert_eq!(server.get_stats().await.pending_sessions, 0);

    server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn verdicts_from_unexpected_senders_are_ignored() {
    // The stub auth server stays silent; a rogue socket keeps sending valid
    // verdicts from the wrong address. The login must time out instead of
    // being approved.
    let (server, addrs, _auth_socket, _plugins) = start_server(1).await;

    let eve = Uuid::new_v4();
    let rogue = Arc::new(UdpSocket::bind("127.0.0.1:0".parse::<SocketAddr>().unwrap()).await.unwrap());
    let datagram_addr = addrs.datagram;
    let rogue_task = {
        let rogue = rogue.clone();
        tokio::spawn(async move {
            let mut verdict = Message::new(MessageBody::ValidSession(ValidSession {
                username: "eve".to_string(),
                uuid: eve,
                valid: true,
            }));
            let bytes = verdict.encode(MessageContext::Server).unwrap();
            loop {
                let _ = rogue.send_to(&bytes, datagram_addr).await;
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
    };

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        FramedConnection::connect_with_hail(addrs.connection, &hail("eve", eve)),
    )
    .await
    .expect("login neither approved nor denied within the timeout window");
    rogue_task.abort();

    match result {
        Err(NetError::HailDenied(reason)) => assert_eq!(reason, "authentication timed out"),
        other => panic!("expected timeout denial, got {other:?}"),
    }
    assert_eq!(server.get_stats().await.player_count, 0);

    server.shutdown();
}
