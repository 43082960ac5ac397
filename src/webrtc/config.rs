//! WebRTC configuration
//!
//! [`IceConfig`] is the validated, process-wide ICE server setup. Updates
//! arrive as an [`IceConfigUpdate`], are merged onto the current value and
//! validated before anything is swapped in.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;

use crate::camera::PixelFormat;
use crate::error::{AppError, Result};

/// Default public STUN server
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Placeholder shown instead of the TURN credential
pub const REDACTED_CREDENTIAL: &str = "***";

const URL_SCHEMES: [&str; 4] = ["stun:", "stuns:", "turn:", "turns:"];

fn is_turn_url(url: &str) -> bool {
    url.starts_with("turn:") || url.starts_with("turns:")
}

/// Validated ICE configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IceConfig {
    /// Include TURN servers from `urls`
    pub use_turn: bool,
    /// STUN and TURN server URLs
    pub urls: Vec<String>,
    /// TURN username
    pub username: Option<String>,
    /// TURN credential
    pub credential: Option<String>,
    /// Only gather relay candidates
    pub relay_only: bool,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            use_turn: false,
            urls: vec![DEFAULT_STUN_SERVER.to_string()],
            username: None,
            credential: None,
            relay_only: false,
        }
    }
}

impl IceConfig {
    /// Check the configuration is self-consistent
    pub fn validate(&self) -> Result<()> {
        for url in &self.urls {
            if !URL_SCHEMES.iter().any(|scheme| url.starts_with(scheme)) {
                return Err(AppError::Config(format!(
                    "ICE server URL must start with stun:, stuns:, turn: or turns: ({})",
                    url
                )));
            }
        }

        let has_turn = self.urls.iter().any(|u| is_turn_url(u));
        if self.use_turn {
            if !has_turn {
                return Err(AppError::Config(
                    "use_turn is set but no turn: URL is configured".to_string(),
                ));
            }
            let missing = |v: &Option<String>| v.as_deref().map_or(true, str::is_empty);
            if missing(&self.username) || missing(&self.credential) {
                return Err(AppError::Config(
                    "TURN requires both username and credential".to_string(),
                ));
            }
        }

        if self.relay_only && !self.use_turn {
            return Err(AppError::Config(
                "relay_only requires use_turn".to_string(),
            ));
        }

        Ok(())
    }

    /// Merge a partial update onto this config and validate the result
    pub fn apply(&self, update: IceConfigUpdate) -> Result<IceConfig> {
        let mut next = self.clone();
        next.merge(update);
        next.validate()?;
        Ok(next)
    }

    /// Merge a partial update in place without validating.
    ///
    /// Used while layering startup sources, where an intermediate layer may
    /// be incomplete on its own.
    pub fn merge(&mut self, update: IceConfigUpdate) {
        if let Some(use_turn) = update.use_turn {
            self.use_turn = use_turn;
        }
        if let Some(urls) = update.urls {
            self.urls = urls
                .into_iter()
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .collect();
        }
        if let Some(username) = update.username {
            self.username = Some(username).filter(|s| !s.is_empty());
        }
        // A read-back of the masked config keeps the stored secret
        if let Some(credential) = update.credential.filter(|c| c != REDACTED_CREDENTIAL) {
            self.credential = Some(credential).filter(|s| !s.is_empty());
        }
        if let Some(relay_only) = update.relay_only {
            self.relay_only = relay_only;
        }
    }

    /// ICE servers handed to the peer connection.
    ///
    /// TURN URLs are only included when `use_turn` is set.
    pub fn ice_servers(&self) -> Vec<RTCIceServer> {
        let mut servers = Vec::new();

        let stun: Vec<String> = self
            .urls
            .iter()
            .filter(|u| !is_turn_url(u))
            .cloned()
            .collect();
        if !stun.is_empty() {
            servers.push(RTCIceServer {
                urls: stun,
                ..Default::default()
            });
        }

        if self.use_turn {
            let turn: Vec<String> = self.urls.iter().filter(|u| is_turn_url(u)).cloned().collect();
            if !turn.is_empty() {
                servers.push(RTCIceServer {
                    urls: turn,
                    username: self.username.clone().unwrap_or_default(),
                    credential: self.credential.clone().unwrap_or_default(),
                    ..Default::default()
                });
            }
        }

        servers
    }

    pub fn transport_policy(&self) -> RTCIceTransportPolicy {
        if self.relay_only {
            RTCIceTransportPolicy::Relay
        } else {
            RTCIceTransportPolicy::All
        }
    }

    /// Copy with the credential masked, for logs and status output
    pub fn redacted(&self) -> IceConfig {
        IceConfig {
            credential: self.credential.as_ref().map(|_| REDACTED_CREDENTIAL.to_string()),
            ..self.clone()
        }
    }
}

/// Runtime ICE config update.
///
/// Every field is optional; absent fields keep their current value.
/// Unrecognized fields are rejected.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IceConfigUpdate {
    pub use_turn: Option<bool>,
    pub urls: Option<Vec<String>>,
    pub username: Option<String>,
    pub credential: Option<String>,
    pub relay_only: Option<bool>,
}

/// Transport-level settings that are not part of the ICE payload
#[derive(Debug, Clone)]
pub struct WebRtcConfig {
    /// How long to wait for ICE gathering before answering
    pub gathering_timeout: Duration,
    /// Media stream id announced in SDP
    pub stream_id: String,
    /// Codec of the video track; must match what the camera produces
    pub video_format: PixelFormat,
    /// Frame rate assumed until capture timestamps are available
    pub nominal_fps: u32,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            gathering_timeout: Duration::from_secs(5),
            stream_id: "solocam".to_string(),
            video_format: PixelFormat::H264,
            nominal_fps: 30,
        }
    }
}
