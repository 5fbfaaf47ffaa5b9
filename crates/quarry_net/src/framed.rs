//! Reliable-ordered framed connection with the hail handshake.
//!
//! Frames are a u32 little-endian length prefix followed by the payload. TCP
//! preserves send order, so messages exchanged between a client and its game
//! server arrive in the order they were written.
//!
//! A connection starts with a hail: the connecting side sends one frame of
//! application data (the identity hail) and blocks until the accepting side
//! answers with an approval frame (verdict byte 1 + approval payload) or a
//! denial frame (verdict byte 0 + UTF-8 reason).

use crate::{ChannelStatus, NetError};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Upper bound on a single frame; anything larger is a protocol violation.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

const HAIL_APPROVED: u8 = 1;
const HAIL_DENIED: u8 = 0;

/// One end of a connection-oriented channel.
#[derive(Debug)]
pub struct FramedConnection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    status: ChannelStatus,
}

impl FramedConnection {
    /// Wraps an accepted stream. The connection is running but the hail has
    /// not been read yet; the server side calls [`read_hail`](Self::read_hail)
    /// next.
    pub fn from_accepted(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        Self {
            stream,
            peer_addr,
            status: ChannelStatus::Running,
        }
    }

    /// Client side: connects, sends the hail frame and waits for the verdict.
    ///
    /// Returns the running connection and the approval payload, or
    /// [`NetError::HailDenied`] with the remote reason.
    pub async fn connect_with_hail(
        addr: SocketAddr,
        hail: &[u8],
    ) -> Result<(Self, Vec<u8>), NetError> {
        let stream = TcpStream::connect(addr).await?;
        let mut connection = Self {
            stream,
            peer_addr: addr,
            status: ChannelStatus::Starting,
        };
        connection.write_frame(hail).await?;

        let response = connection
            .read_frame()
            .await?
            .ok_or(NetError::ConnectionClosed)?;
        match response.split_first() {
            Some((&HAIL_APPROVED, payload)) => {
                connection.status = ChannelStatus::Running;
                debug!("hail approved by {}", addr);
                Ok((connection, payload.to_vec()))
            }
            Some((&HAIL_DENIED, reason)) => {
                connection.status = ChannelStatus::Disconnected;
                Err(NetError::HailDenied(
                    String::from_utf8_lossy(reason).into_owned(),
                ))
            }
            Some((&other, _)) => Err(NetError::InvalidHailResponse(other)),
            None => Err(NetError::InvalidHailResponse(0xFF)),
        }
    }

    /// Server side: reads the connecting peer's hail frame.
    pub async fn read_hail(&mut self) -> Result<Vec<u8>, NetError> {
        self.read_frame().await?.ok_or(NetError::ConnectionClosed)
    }

    /// Server side: approves the pending hail with an approval payload.
    pub async fn approve(&mut self, payload: &[u8]) -> Result<(), NetError> {
        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.push(HAIL_APPROVED);
        frame.extend_from_slice(payload);
        self.write_frame(&frame).await
    }

    /// Server side: denies the pending hail with a reason and closes the
    /// connection.
    pub async fn deny(mut self, reason: &str) -> Result<(), NetError> {
        let mut frame = Vec::with_capacity(reason.len() + 1);
        frame.push(HAIL_DENIED);
        frame.extend_from_slice(reason.as_bytes());
        self.write_frame(&frame).await?;
        self.disconnect().await
    }

    /// Writes one length-prefixed frame.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<(), NetError> {
        if payload.len() > MAX_FRAME_LEN {
            return Err(NetError::FrameTooLarge {
                len: payload.len(),
                max: MAX_FRAME_LEN,
            });
        }
        self.stream
            .write_all(&(payload.len() as u32).to_le_bytes())
            .await?;
        self.stream.write_all(payload).await?;
        trace!("wrote {} byte frame to {}", payload.len(), self.peer_addr);
        Ok(())
    }

    /// Reads one whole frame. Returns `None` on a clean close at a frame
    /// boundary; a close mid-frame is [`NetError::ConnectionClosed`].
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, NetError> {
        let mut len_bytes = [0u8; 4];
        match self.stream.read_exact(&mut len_bytes).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.status = ChannelStatus::Disconnected;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_FRAME_LEN {
            return Err(NetError::FrameTooLarge {
                len,
                max: MAX_FRAME_LEN,
            });
        }

        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                self.status = ChannelStatus::Disconnected;
                NetError::ConnectionClosed
            } else {
                e.into()
            }
        })?;
        Ok(Some(payload))
    }

    /// Explicitly closes the channel. The owner is responsible for emitting
    /// the matching lifecycle event with its reason.
    pub async fn disconnect(&mut self) -> Result<(), NetError> {
        self.status = ChannelStatus::Disconnected;
        self.stream.shutdown().await?;
        Ok(())
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn status(&self) -> ChannelStatus {
        self.status
    }

    /// Splits into separately owned read and write halves for full-duplex use.
    pub fn into_split(self) -> (ReadHalf, WriteHalf) {
        let (read, write) = self.stream.into_split();
        (
            ReadHalf {
                stream: read,
                peer_addr: self.peer_addr,
            },
            WriteHalf {
                stream: write,
                peer_addr: self.peer_addr,
            },
        )
    }
}

/// Read half of a split connection.
pub struct ReadHalf {
    stream: tokio::net::tcp::OwnedReadHalf,
    peer_addr: SocketAddr,
}

impl ReadHalf {
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, NetError> {
        let mut len_bytes = [0u8; 4];
        match self.stream.read_exact(&mut len_bytes).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_FRAME_LEN {
            return Err(NetError::FrameTooLarge {
                len,
                max: MAX_FRAME_LEN,
            });
        }
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                NetError::ConnectionClosed
            } else {
                NetError::from(e)
            }
        })?;
        Ok(Some(payload))
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

/// Write half of a split connection.
pub struct WriteHalf {
    stream: tokio::net::tcp::OwnedWriteHalf,
    peer_addr: SocketAddr,
}

impl WriteHalf {
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<(), NetError> {
        if payload.len() > MAX_FRAME_LEN {
            return Err(NetError::FrameTooLarge {
                len: payload.len(),
                max: MAX_FRAME_LEN,
            });
        }
        self.stream
            .write_all(&(payload.len() as u32).to_le_bytes())
            .await?;
        self.stream.write_all(payload).await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), NetError> {
        self.stream.shutdown().await?;
        Ok(())
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test(flavor = "multi_thread")]
    async fn hail_approval_hands_over_payload() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let mut conn = FramedConnection::from_accepted(stream, peer);
            let hail = conn.read_hail().await.unwrap();
            assert_eq!(hail, b"identity");
            conn.approve(b"welcome").await.unwrap();
            conn
        });

        let (conn, payload) = FramedConnection::connect_with_hail(addr, b"identity")
            .await
            .unwrap();
        assert_eq!(payload, b"welcome");
        assert_eq!(conn.status(), ChannelStatus::Running);
        server.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn hail_denial_carries_reason() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let mut conn = FramedConnection::from_accepted(stream, peer);
            conn.read_hail().await.unwrap();
            conn.deny("already connected").await.unwrap();
        });

        let err = FramedConnection::connect_with_hail(addr, b"identity")
            .await
            .unwrap_err();
        match err {
            NetError::HailDenied(reason) => assert_eq!(reason, "already connected"),
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn frames_preserve_send_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let mut conn = FramedConnection::from_accepted(stream, peer);
            let mut received = Vec::new();
            while let Some(frame) = conn.read_frame().await.unwrap() {
                received.push(frame);
            }
            received
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut conn = FramedConnection::from_accepted(stream, addr);
        for i in 0u8..10 {
            conn.write_frame(&[i; 3]).await.unwrap();
        }
        conn.disconnect().await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(received.len(), 10);
        for (i, frame) in received.iter().enumerate() {
            assert_eq!(frame, &vec![i as u8; 3]);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn oversized_frame_is_rejected_before_write() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut conn = FramedConnection::from_accepted(stream, addr);
        let huge = vec![0u8; MAX_FRAME_LEN + 1];
        assert!(matches!(
            conn.write_frame(&huge).await.unwrap_err(),
            NetError::FrameTooLarge { .. }
        ));
    }
}
