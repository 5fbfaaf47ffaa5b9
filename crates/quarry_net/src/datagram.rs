//! Connectionless datagram channel.
//!
//! One message per datagram, addressed by explicit `host:port`, with no
//! ordering or delivery guarantee and no connection state. Peers correlate
//! related datagrams by application-level identifiers (the session UUID), not
//! by request/response pairing.

use crate::{ChannelStatus, NetError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::net::UdpSocket;
use tracing::trace;

/// Largest payload accepted for a single datagram.
pub const MAX_DATAGRAM_LEN: usize = 64 * 1024 - 8;

/// A bound UDP endpoint shared by sender and receiver tasks.
pub struct DatagramChannel {
    socket: UdpSocket,
    status: AtomicU8,
}

impl DatagramChannel {
    /// Binds the channel. Bind failures are fatal to startup; the caller
    /// aborts rather than running without its connectionless channel.
    pub async fn bind(addr: SocketAddr) -> Result<Self, NetError> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            status: AtomicU8::new(status_to_byte(ChannelStatus::Running)),
        })
    }

    /// The locally bound address (useful when binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.socket.local_addr()?)
    }

    /// Sends one payload as a single datagram to an explicit address.
    pub async fn send_to(&self, payload: &[u8], addr: SocketAddr) -> Result<(), NetError> {
        if payload.len() > MAX_DATAGRAM_LEN {
            return Err(NetError::DatagramTooLarge(payload.len()));
        }
        self.socket.send_to(payload, addr).await?;
        trace!("sent {} byte datagram to {}", payload.len(), addr);
        Ok(())
    }

    /// Receives one datagram, returning the payload and the sender's address.
    /// The caller authenticates the sender by comparing that address against
    /// the endpoint it expects.
    pub async fn recv_from(&self) -> Result<(Vec<u8>, SocketAddr), NetError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        let (len, addr) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        Ok((buf, addr))
    }

    pub fn status(&self) -> ChannelStatus {
        byte_to_status(self.status.load(Ordering::Relaxed))
    }

    /// Marks the channel disconnected. The socket itself closes on drop.
    pub fn shutdown(&self) {
        self.status
            .store(status_to_byte(ChannelStatus::Disconnected), Ordering::Relaxed);
    }
}

fn status_to_byte(status: ChannelStatus) -> u8 {
    match status {
        ChannelStatus::Starting => 0,
        ChannelStatus::Running => 1,
        ChannelStatus::Disconnected => 2,
    }
}

fn byte_to_status(byte: u8) -> ChannelStatus {
    match byte {
        0 => ChannelStatus::Starting,
        1 => ChannelStatus::Running,
        _ => ChannelStatus::Disconnected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn datagrams_round_trip_with_sender_address() {
        let a = DatagramChannel::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let b = DatagramChannel::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr_a = a.local_addr().unwrap();
        let addr_b = b.local_addr().unwrap();

        a.send_to(b"ping", addr_b).await.unwrap();
        let (payload, from) = b.recv_from().await.unwrap();
        assert_eq!(payload, b"ping");
        assert_eq!(from, addr_a);

        b.send_to(b"pong", from).await.unwrap();
        let (payload, from) = a.recv_from().await.unwrap();
        assert_eq!(payload, b"pong");
        assert_eq!(from, addr_b);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn oversized_datagram_is_rejected() {
        let channel = DatagramChannel::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = channel.local_addr().unwrap();
        let huge = vec![0u8; MAX_DATAGRAM_LEN + 1];
        assert!(matches!(
            channel.send_to(&huge, addr).await.unwrap_err(),
            NetError::DatagramTooLarge(_)
        ));
    }
}
