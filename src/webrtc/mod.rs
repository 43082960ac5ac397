//! WebRTC module for single-viewer camera streaming
//!
//! Architecture:
//! ```text
//! FrameSource (latest camera frame)
//!        |
//!        v
//! CameraVideoTrack (sample track, passthrough H264/VP8)
//!        |
//!        v
//! RtcPeer (PeerConnection + "control" DataChannel)
//!        |
//! Browser <-------- SDP Exchange ------- WebRtcStreamer
//!                                              |
//!                                       SessionRegistry (one slot)
//! ```

pub mod config;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod streamer;
pub mod track;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{IceConfig, IceConfigUpdate, WebRtcConfig};
pub use peer::{Peer, PeerTransport, RtcPeer, RtcTransport};
pub use session::{Session, SessionInfo, SessionRegistry};
pub use signaling::{
    AnswerResponse, ConnectionState, IceCandidate, IceCandidateRequest, OfferQuery,
    OfferRequest, SdpAnswer, SdpOffer, SessionMode,
};
pub use streamer::{WebRtcStreamer, DEFAULT_IDLE_MAX_AGE};
pub use track::CameraVideoTrack;
