//! In-memory peer transport for registry and signaling tests
//!
//! Every peer reports into a shared, ordered event log so tests can assert
//! on the order in which peers were created, negotiated and closed.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::config::IceConfig;
use super::peer::{Peer, PeerTransport};
use super::signaling::{ConnectionState, IceCandidate, SdpAnswer, SdpOffer};
use crate::camera::FrameReceiver;
use crate::error::{AppError, Result};

/// Offer SDP the fake peers refuse to negotiate
pub const BAD_SDP: &str = "not-an-sdp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Created(String),
    Negotiated(String),
    Candidate(String),
    Closed(String),
}

#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<PeerEvent>>,
}

impl EventLog {
    pub fn push(&self, event: PeerEvent) {
        self.events.lock().push(event);
    }

    pub fn snapshot(&self) -> Vec<PeerEvent> {
        self.events.lock().clone()
    }

    pub fn position(&self, event: &PeerEvent) -> Option<usize> {
        self.events.lock().iter().position(|e| e == event)
    }
}

pub struct FakePeer {
    client_id: String,
    log: Arc<EventLog>,
    state: Mutex<ConnectionState>,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    has_video: AtomicBool,
    has_control: AtomicBool,
    negotiate_delay: Duration,
}

impl FakePeer {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn has_video(&self) -> bool {
        self.has_video.load(Ordering::SeqCst)
    }

    pub fn has_control(&self) -> bool {
        self.has_control.load(Ordering::SeqCst)
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }
}

#[async_trait]
impl Peer for FakePeer {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn add_video_track(&self, _frames: FrameReceiver) -> Result<()> {
        self.has_video.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn create_control_channel(&self) -> Result<()> {
        self.has_control.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn negotiate(&self, offer: SdpOffer) -> Result<SdpAnswer> {
        if offer.sdp == BAD_SDP {
            return Err(AppError::Negotiation("Invalid SDP offer".to_string()));
        }
        if !self.negotiate_delay.is_zero() {
            tokio::time::sleep(self.negotiate_delay).await;
        }
        self.log.push(PeerEvent::Negotiated(self.client_id.clone()));
        self.set_state(ConnectionState::Connecting);
        Ok(SdpAnswer::new(format!("answer-for-{}", self.client_id)))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.log.push(PeerEvent::Candidate(candidate.candidate));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.log.push(PeerEvent::Closed(self.client_id.clone()));
            self.set_state(ConnectionState::Closed);
        }
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }
}

#[derive(Default)]
pub struct FakeTransport {
    pub log: Arc<EventLog>,
    peers: Mutex<Vec<Arc<FakePeer>>>,
    last_ice: Mutex<Option<IceConfig>>,
    negotiate_delay: Duration,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_negotiate_delay(delay: Duration) -> Self {
        Self {
            negotiate_delay: delay,
            ..Self::default()
        }
    }

    /// Standalone peer that shares this transport's log
    pub fn peer(&self, client_id: &str) -> Arc<FakePeer> {
        let peer = Arc::new(FakePeer {
            client_id: client_id.to_string(),
            log: self.log.clone(),
            state: Mutex::new(ConnectionState::New),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            has_video: AtomicBool::new(false),
            has_control: AtomicBool::new(false),
            negotiate_delay: self.negotiate_delay,
        });
        self.log.push(PeerEvent::Created(client_id.to_string()));
        self.peers.lock().push(peer.clone());
        peer
    }

    pub fn find(&self, client_id: &str) -> Option<Arc<FakePeer>> {
        self.peers
            .lock()
            .iter()
            .find(|p| p.client_id == client_id)
            .cloned()
    }

    pub fn peers(&self) -> Vec<Arc<FakePeer>> {
        self.peers.lock().clone()
    }

    pub fn last_ice(&self) -> Option<IceConfig> {
        self.last_ice.lock().clone()
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn create_peer(&self, client_id: &str, ice: &IceConfig) -> Result<Arc<dyn Peer>> {
        *self.last_ice.lock() = Some(ice.clone());
        Ok(self.peer(client_id))
    }
}
