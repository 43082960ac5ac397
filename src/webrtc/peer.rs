//! WebRTC peer connection management
//!
//! [`Peer`] and [`PeerTransport`] are the seam between session logic and the
//! transport library. [`RtcTransport`] / [`RtcPeer`] implement them on top
//! of `webrtc`.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::TrackLocal;

use super::config::{IceConfig, WebRtcConfig};
use super::signaling::{ConnectionState, IceCandidate, SdpAnswer, SdpOffer};
use super::track::CameraVideoTrack;
use crate::camera::FrameReceiver;
use crate::error::{AppError, Result};

/// Label of the server-created control data channel
pub const CONTROL_CHANNEL_LABEL: &str = "control";

/// One negotiated (or negotiating) peer connection
#[async_trait]
pub trait Peer: Send + Sync {
    fn client_id(&self) -> &str;

    /// Attach the camera video track, fed from `frames`
    async fn add_video_track(&self, frames: FrameReceiver) -> Result<()>;

    /// Create the control data channel and answer pings on it
    async fn create_control_channel(&self) -> Result<()>;

    /// Apply the remote offer and produce a complete (non-trickle) answer
    async fn negotiate(&self, offer: SdpOffer) -> Result<SdpAnswer>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Close the connection. Closing twice is a no-op.
    async fn close(&self) -> Result<()>;

    fn state(&self) -> ConnectionState;
}

/// Factory for peers
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_peer(&self, client_id: &str, ice: &IceConfig) -> Result<Arc<dyn Peer>>;
}

/// Reply to a control channel message, if it warrants one
pub(crate) fn control_reply(data: &[u8]) -> Option<&'static str> {
    #[derive(Deserialize)]
    struct ControlMessage {
        #[serde(rename = "type")]
        kind: String,
    }

    let msg: ControlMessage = serde_json::from_slice(data).ok()?;
    (msg.kind == "ping").then_some(r#"{"type":"pong"}"#)
}

fn attach_control_handler(dc: &Arc<RTCDataChannel>, client_id: &str) {
    let channel: Weak<RTCDataChannel> = Arc::downgrade(dc);
    let client_id = client_id.to_string();

    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let channel = channel.clone();
        let client_id = client_id.clone();

        Box::pin(async move {
            let Some(reply) = control_reply(&msg.data) else {
                debug!("Ignoring {} byte control message from {}", msg.data.len(), client_id);
                return;
            };
            if let Some(dc) = channel.upgrade() {
                if let Err(e) = dc.send_text(reply.to_string()).await {
                    debug!("Failed to answer ping from {}: {}", client_id, e);
                }
            }
        })
    }));
}

/// Peer connection wrapper with event handling
pub struct RtcPeer {
    client_id: String,
    pc: Arc<RTCPeerConnection>,
    config: WebRtcConfig,
    video_track: Mutex<Option<CameraVideoTrack>>,
    control_channel: Mutex<Option<Arc<RTCDataChannel>>>,
    /// Connection state
    state: Arc<watch::Sender<ConnectionState>>,
    /// State receiver
    state_rx: watch::Receiver<ConnectionState>,
    closed: AtomicBool,
}

impl RtcPeer {
    /// Create a new peer connection
    pub async fn new(config: &WebRtcConfig, ice: &IceConfig, client_id: String) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| AppError::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            AppError::WebRtcError(format!("Failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice.ice_servers(),
            ice_transport_policy: ice.transport_policy(),
            ..Default::default()
        };

        let pc = api.new_peer_connection(rtc_config).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to create peer connection: {}", e))
        })?;

        let (state_tx, state_rx) = watch::channel(ConnectionState::New);

        let peer = Self {
            client_id,
            pc: Arc::new(pc),
            config: config.clone(),
            video_track: Mutex::new(None),
            control_channel: Mutex::new(None),
            state: Arc::new(state_tx),
            state_rx,
            closed: AtomicBool::new(false),
        };
        peer.setup_event_handlers();

        Ok(peer)
    }

    fn setup_event_handlers(&self) {
        let state = self.state.clone();
        let client_id = self.client_id.clone();

        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let state = state.clone();
                let client_id = client_id.clone();

                Box::pin(async move {
                    let new_state = match s {
                        RTCPeerConnectionState::New => ConnectionState::New,
                        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                        RTCPeerConnectionState::Connected => ConnectionState::Connected,
                        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                        RTCPeerConnectionState::Failed => ConnectionState::Failed,
                        RTCPeerConnectionState::Closed => ConnectionState::Closed,
                        _ => return,
                    };

                    info!("Peer {} connection state: {}", client_id, new_state);
                    let _ = state.send(new_state);
                })
            }));
    }
}

#[async_trait]
impl Peer for RtcPeer {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn add_video_track(&self, frames: FrameReceiver) -> Result<()> {
        let track = CameraVideoTrack::new(
            self.config.video_format,
            &self.config.stream_id,
            self.config.nominal_fps,
        )?;

        let rtp_sender = self
            .pc
            .add_track(track.sample_track() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to add video track: {}", e)))?;

        // Drain RTCP so interceptors (NACK, reports) keep working
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtp_sender.read(&mut buf).await.is_ok() {}
        });

        track.start(frames, self.state_rx.clone());
        *self.video_track.lock() = Some(track);
        debug!("Video track added to peer {}", self.client_id);

        Ok(())
    }

    async fn create_control_channel(&self) -> Result<()> {
        let dc = self
            .pc
            .create_data_channel(CONTROL_CHANNEL_LABEL, None)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to create data channel: {}", e)))?;
        attach_control_handler(&dc, &self.client_id);
        *self.control_channel.lock() = Some(dc);

        // Channels opened by the browser get the same treatment
        let client_id = self.client_id.clone();
        self.pc
            .on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let client_id = client_id.clone();
                Box::pin(async move {
                    info!("Data channel '{}' opened by {}", dc.label(), client_id);
                    attach_control_handler(&dc, &client_id);
                })
            }));

        debug!("Control channel created for {}", self.client_id);
        Ok(())
    }

    async fn negotiate(&self, offer: SdpOffer) -> Result<SdpAnswer> {
        let sdp = RTCSessionDescription::offer(offer.sdp)
            .map_err(|e| AppError::Negotiation(format!("Invalid SDP offer: {}", e)))?;

        self.pc
            .set_remote_description(sdp)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to set remote description: {}", e)))?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to create answer: {}", e)))?;

        let mut gathering = self.pc.gathering_complete_promise().await;

        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to set local description: {}", e)))?;

        if tokio::time::timeout(self.config.gathering_timeout, gathering.recv())
            .await
            .is_err()
        {
            warn!(
                "ICE gathering for {} did not finish within {:?}, answering with partial candidates",
                self.client_id, self.config.gathering_timeout
            );
        }

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| AppError::Negotiation("No local description".to_string()))?;

        Ok(SdpAnswer::new(local.sdp))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to add ICE candidate: {}", e)))?;

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(track) = self.video_track.lock().as_ref() {
            track.stop();
        }
        self.control_channel.lock().take();

        self.pc
            .close()
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to close peer connection: {}", e)))?;
        let _ = self.state.send(ConnectionState::Closed);

        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }
}

/// Creates [`RtcPeer`]s
pub struct RtcTransport {
    config: WebRtcConfig,
}

impl RtcTransport {
    pub fn new(config: WebRtcConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PeerTransport for RtcTransport {
    async fn create_peer(&self, client_id: &str, ice: &IceConfig) -> Result<Arc<dyn Peer>> {
        let peer = RtcPeer::new(&self.config, ice, client_id.to_string()).await?;
        Ok(Arc::new(peer))
    }
}
