//! Single-viewer session registry
//!
//! The registry owns at most one [`Session`]. All mutations go through one
//! async mutex; the previous peer is closed while that lock is held, so no
//! caller can observe the old session being torn down after the new one is
//! visible.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::peer::Peer;
use super::signaling::{ConnectionState, SessionMode};

/// A viewer that owns the camera track
pub struct Session {
    client_id: String,
    peer: Arc<dyn Peer>,
    mode: SessionMode,
    created_at: Instant,
    created_wall: DateTime<Utc>,
}

impl Session {
    pub fn new(client_id: impl Into<String>, peer: Arc<dyn Peer>, mode: SessionMode) -> Self {
        Self {
            client_id: client_id.into(),
            peer,
            mode,
            created_at: Instant::now(),
            created_wall: Utc::now(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    fn info(&self, now: Instant) -> SessionInfo {
        SessionInfo {
            client_id: self.client_id.clone(),
            mode: self.mode,
            created_at: self.created_wall,
            age: now.saturating_duration_since(self.created_at),
            state: self.peer.state(),
        }
    }
}

/// Snapshot of the current session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub client_id: String,
    pub mode: SessionMode,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub age: Duration,
    pub state: ConnectionState,
}

/// Why a session was evicted, for logs
#[derive(Debug, Clone, Copy)]
enum EvictReason {
    Replaced,
    Closed,
    Idle,
    ForceReleased,
    Failed,
}

/// Holds the one viewer that currently owns the camera
#[derive(Default)]
pub struct SessionRegistry {
    slot: Mutex<Option<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close a session's peer. Errors are logged; the session is gone either way.
    async fn release(session: Session, reason: EvictReason) {
        info!(
            client_id = %session.client_id,
            ?reason,
            "Evicting session after {:?}",
            session.created_at.elapsed()
        );
        if let Err(e) = session.peer.close().await {
            warn!(client_id = %session.client_id, "Error closing peer: {}", e);
        }
    }

    /// Install a new session, closing the previous one first
    pub async fn install(&self, session: Session) -> String {
        let mut slot = self.slot.lock().await;
        if let Some(old) = slot.take() {
            Self::release(old, EvictReason::Replaced).await;
        }
        let client_id = session.client_id.clone();
        info!(client_id = %client_id, mode = %session.mode, "Session installed");
        *slot = Some(session);
        client_id
    }

    /// Evict the session if `client_id` is current.
    ///
    /// Returns `false` for a stale or unknown id, which is not an error.
    pub async fn evict(&self, client_id: &str) -> bool {
        let mut slot = self.slot.lock().await;
        match slot.take_if(|s| s.client_id == client_id) {
            Some(session) => {
                Self::release(session, EvictReason::Closed).await;
                true
            }
            None => {
                debug!(client_id = %client_id, "Ignoring close for stale session");
                false
            }
        }
    }

    /// Evict the current session if it is older than `max_age`
    pub async fn evict_if_idle(&self, max_age: Duration) -> Option<String> {
        self.evict_if_idle_at(max_age, Instant::now()).await
    }

    /// [`evict_if_idle`](Self::evict_if_idle) against an explicit clock
    pub async fn evict_if_idle_at(&self, max_age: Duration, now: Instant) -> Option<String> {
        let mut slot = self.slot.lock().await;
        let session =
            slot.take_if(|s| now.saturating_duration_since(s.created_at) > max_age)?;
        let client_id = session.client_id.clone();
        Self::release(session, EvictReason::Idle).await;
        Some(client_id)
    }

    /// Evict whoever holds the camera
    pub async fn evict_current(&self) -> Option<String> {
        let mut slot = self.slot.lock().await;
        let session = slot.take()?;
        let client_id = session.client_id.clone();
        Self::release(session, EvictReason::ForceReleased).await;
        Some(client_id)
    }

    /// Evict the current session if its peer has failed or closed
    pub async fn evict_failed(&self) -> Option<String> {
        let mut slot = self.slot.lock().await;
        let session = slot.take_if(|s| s.peer.state().is_terminal())?;
        let client_id = session.client_id.clone();
        Self::release(session, EvictReason::Failed).await;
        Some(client_id)
    }

    /// Peer of the current session, if `client_id` is current
    pub async fn peer_for(&self, client_id: &str) -> Option<Arc<dyn Peer>> {
        self.slot
            .lock()
            .await
            .as_ref()
            .filter(|s| s.client_id == client_id)
            .map(|s| s.peer.clone())
    }

    pub async fn current(&self) -> Option<SessionInfo> {
        let now = Instant::now();
        self.slot.lock().await.as_ref().map(|s| s.info(now))
    }

    pub async fn current_client_id(&self) -> Option<String> {
        self.slot.lock().await.as_ref().map(|s| s.client_id.clone())
    }
}
