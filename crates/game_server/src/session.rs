//! Pending-session correlation table.
//!
//! Between a client's hail and the auth server's verdict, the login lives
//! here keyed by identity UUID. Put overwrites, so an identity can never hold
//! more than one pending entry; the superseded connection is denied through
//! its verdict channel. Entries that outlive the configured timeout are
//! evicted by the server's background sweep.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

/// The outcome a waiting connection task receives for its pending login.
#[derive(Debug, PartialEq, Eq)]
pub enum SessionVerdict {
    Approved,
    Denied(String),
}

/// One login awaiting an auth-server verdict.
#[derive(Debug)]
pub struct PendingSession {
    pub username: String,
    pub public_key: String,
    pub remote_addr: SocketAddr,
    pub created_at: Instant,
    /// Resolves the connection task blocked on this login.
    pub verdict_tx: oneshot::Sender<SessionVerdict>,
}

/// Mutex-guarded map of pending logins, keyed by identity UUID.
#[derive(Default)]
pub struct PendingSessionTable {
    entries: Mutex<HashMap<Uuid, PendingSession>>,
}

impl PendingSessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a pending session, returning the superseded entry if the UUID
    /// already had one. The caller owes the old entry a denial.
    pub async fn put(&self, uuid: Uuid, session: PendingSession) -> Option<PendingSession> {
        self.entries.lock().await.insert(uuid, session)
    }

    /// Removes and returns the entry for `uuid`, if present. Absent entries
    /// are not an error; verdicts for unknown sessions are simply dropped.
    pub async fn take_if_present(&self, uuid: Uuid) -> Option<PendingSession> {
        self.entries.lock().await.remove(&uuid)
    }

    /// Removes every entry older than `max_age` and returns them so the
    /// caller can deny each one.
    pub async fn evict_older_than(&self, max_age: Duration) -> Vec<PendingSession> {
        let mut entries = self.entries.lock().await;
        let expired: Vec<Uuid> = entries
            .iter()
            .filter(|(_, s)| s.created_at.elapsed() > max_age)
            .map(|(uuid, _)| *uuid)
            .collect();
        expired
            .into_iter()
            .filter_map(|uuid| entries.remove(&uuid))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
