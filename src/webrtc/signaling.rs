//! WebRTC signaling types and messages

use serde::{Deserialize, Serialize};
use std::fmt;

/// SDP Offer from client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdpOffer {
    /// SDP content
    pub sdp: String,
}

impl SdpOffer {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self { sdp: sdp.into() }
    }
}

/// SDP Answer from server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdpAnswer {
    /// SDP content, with gathered candidates inlined
    pub sdp: String,
}

impl SdpAnswer {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self { sdp: sdp.into() }
    }
}

/// ICE candidate
///
/// Accepts both the browser's camelCase field names and snake_case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate string
    pub candidate: String,
    /// SDP mid (media ID)
    #[serde(rename = "sdpMid", alias = "sdp_mid", default)]
    pub sdp_mid: Option<String>,
    /// SDP mline index
    #[serde(rename = "sdpMLineIndex", alias = "sdp_mline_index", default)]
    pub sdp_mline_index: Option<u16>,
    /// Username fragment
    #[serde(rename = "usernameFragment", alias = "username_fragment", default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    pub fn with_mid(mut self, mid: impl Into<String>, index: u16) -> Self {
        self.sdp_mid = Some(mid.into());
        self.sdp_mline_index = Some(index);
        self
    }
}

/// What a viewer session carries besides video
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Video track only
    #[serde(alias = "video")]
    VideoOnly,
    /// Video track plus a "control" data channel answering pings
    #[default]
    #[serde(alias = "control", alias = "color")]
    VideoWithControl,
}

impl SessionMode {
    pub fn has_control_channel(&self) -> bool {
        matches!(self, SessionMode::VideoWithControl)
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionMode::VideoOnly => write!(f, "video_only"),
            SessionMode::VideoWithControl => write!(f, "video_with_control"),
        }
    }
}

/// WebRTC offer request (from HTTP API)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferRequest {
    /// SDP offer
    pub sdp: String,
    /// Description type, always "offer"
    #[serde(rename = "type", default = "default_offer_type")]
    pub sdp_type: String,
    /// Ignored: client ids are always assigned by the server
    #[serde(default, skip_serializing)]
    pub client_id: Option<String>,
}

fn default_offer_type() -> String {
    "offer".to_string()
}

/// Query string of the offer endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OfferQuery {
    #[serde(default)]
    pub mode: Option<SessionMode>,
}

/// WebRTC answer response (from HTTP API)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    /// SDP answer
    pub sdp: String,
    /// Description type, always "answer"
    #[serde(rename = "type")]
    pub sdp_type: String,
    /// Id of the session that now owns the camera
    pub client_id: String,
}

impl AnswerResponse {
    pub fn new(answer: SdpAnswer, client_id: impl Into<String>) -> Self {
        Self {
            sdp: answer.sdp,
            sdp_type: "answer".to_string(),
            client_id: client_id.into(),
        }
    }
}

/// ICE candidate request (from HTTP API)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceCandidateRequest {
    pub client_id: String,
    #[serde(flatten)]
    pub candidate: IceCandidate,
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Terminal states after which the peer will not recover
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}
