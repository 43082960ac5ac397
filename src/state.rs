use std::sync::Arc;

use crate::camera::DeviceSupervisor;
use crate::config::AppConfig;
use crate::status::StatusReporter;
use crate::webrtc::WebRtcStreamer;

/// Application-wide state shared across handlers
///
/// All camera access goes through `supervisor`; all viewer access goes
/// through `streamer`. Handlers never touch the device or a peer directly.
pub struct AppState {
    /// Startup configuration (the ICE part is live in the streamer)
    pub config: AppConfig,
    /// Device supervisor, the only owner of the camera handle
    pub supervisor: Arc<DeviceSupervisor>,
    /// Signaling handler and session registry
    pub streamer: Arc<WebRtcStreamer>,
    /// Read-only status projections
    pub status: StatusReporter,
}

impl AppState {
    /// Create new application state
    pub fn new(
        config: AppConfig,
        supervisor: Arc<DeviceSupervisor>,
        streamer: Arc<WebRtcStreamer>,
    ) -> Arc<Self> {
        let status = StatusReporter::new(
            supervisor.clone(),
            streamer.clone(),
            config.camera.clone(),
        );
        Arc::new(Self {
            config,
            supervisor,
            streamer,
            status,
        })
    }
}
