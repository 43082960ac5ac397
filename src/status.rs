//! Status reporting
//!
//! Read-only projections of supervisor and session state for health checks.
//! Nothing here can fail; an unhealthy camera is reported, not raised.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::camera::{CameraStatus, DeviceSupervisor, PixelFormat};
use crate::config::CameraConfig;
use crate::webrtc::{SessionMode, WebRtcStreamer};

/// Camera health as reported to clients
#[derive(Debug, Clone, Serialize)]
pub struct CameraStatusReport {
    pub status: CameraStatus,
    pub running: bool,
    pub consecutive_failures: u32,
    pub retry_backoff_ms: u64,
    pub last_frame_age_ms: Option<u64>,
    pub last_frame_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub has_frame: bool,
    pub handle_held: bool,
    pub frames_captured: u64,
    pub reconnects: u64,
}

/// Current viewer
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionsReport {
    pub clients: Vec<String>,
    pub current_client: Option<String>,
    /// Seconds the current viewer has held the camera
    pub connection_duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<SessionMode>,
}

/// Camera configuration as reported to clients
#[derive(Debug, Clone, Serialize)]
pub struct CameraConfigReport {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub serial: Option<String>,
}

pub struct StatusReporter {
    supervisor: Arc<DeviceSupervisor>,
    streamer: Arc<WebRtcStreamer>,
    camera: CameraConfig,
}

impl StatusReporter {
    pub fn new(
        supervisor: Arc<DeviceSupervisor>,
        streamer: Arc<WebRtcStreamer>,
        camera: CameraConfig,
    ) -> Self {
        Self {
            supervisor,
            streamer,
            camera,
        }
    }

    pub fn camera_status(&self) -> CameraStatusReport {
        let health = self.supervisor.health();
        CameraStatusReport {
            status: health.status,
            running: health.running,
            consecutive_failures: health.consecutive_failures,
            retry_backoff_ms: health.retry_backoff.as_millis() as u64,
            last_frame_age_ms: health.last_frame_age().map(|d| d.as_millis() as u64),
            last_frame_at: health.last_frame_wall,
            last_attempt_at: health.last_attempt_at,
            last_error: health.last_error,
            has_frame: self.supervisor.frames().latest().is_some(),
            handle_held: health.handle_held,
            frames_captured: health.frames_captured,
            reconnects: health.reconnects,
        }
    }

    pub async fn connections(&self) -> ConnectionsReport {
        match self.streamer.current_session().await {
            Some(session) => ConnectionsReport {
                clients: vec![session.client_id.clone()],
                current_client: Some(session.client_id),
                connection_duration: session.age.as_secs_f64(),
                mode: Some(session.mode),
            },
            None => ConnectionsReport {
                clients: Vec::new(),
                current_client: None,
                connection_duration: 0.0,
                mode: None,
            },
        }
    }

    pub fn camera_config(&self) -> CameraConfigReport {
        CameraConfigReport {
            device: self.supervisor.describe(),
            width: self.camera.width,
            height: self.camera.height,
            fps: self.camera.fps,
            format: self.camera.format,
            serial: self.camera.serial.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::testing::{OpenStep, ScriptedBackend};
    use crate::camera::{FrameSource, SupervisorConfig};
    use crate::config::IceConfigStore;
    use crate::webrtc::testing::FakeTransport;
    use crate::webrtc::{SdpOffer, DEFAULT_IDLE_MAX_AGE};

    fn reporter(steps: Vec<OpenStep>, fallback: OpenStep) -> StatusReporter {
        let supervisor = Arc::new(DeviceSupervisor::new(
            Arc::new(ScriptedBackend::new(steps, fallback)),
            Arc::new(FrameSource::new()),
            SupervisorConfig::default(),
        ));
        let streamer = WebRtcStreamer::new(
            supervisor.clone(),
            Arc::new(FakeTransport::new()),
            IceConfigStore::default(),
            DEFAULT_IDLE_MAX_AGE,
        );
        StatusReporter::new(supervisor, streamer, CameraConfig::default())
    }

    #[test]
    fn test_status_before_start() {
        let reporter = reporter(vec![], OpenStep::Stream);
        let report = reporter.camera_status();
        assert_eq!(report.status, CameraStatus::Disconnected);
        assert!(!report.running);
        assert!(!report.has_frame);
        assert!(report.last_frame_age_ms.is_none());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "disconnected");
    }

    #[test]
    fn test_status_reports_faulted_camera() {
        let reporter = reporter(vec![], OpenStep::Fail);
        reporter.supervisor.start();
        let mut report = reporter.camera_status();
        assert!(crate::camera::testing::wait_until(
            std::time::Duration::from_secs(5),
            || {
                report = reporter.camera_status();
                report.status == CameraStatus::Faulted
            }
        ));
        assert!(report.running);
        assert!(report.consecutive_failures >= 1);
        assert!(report.last_error.is_some());
        assert!(!report.handle_held);
        reporter.supervisor.stop();
    }

    #[tokio::test]
    async fn test_connections_report() {
        let reporter = reporter(vec![], OpenStep::Stream);
        let empty = reporter.connections().await;
        assert!(empty.clients.is_empty());
        assert!(empty.current_client.is_none());
        assert_eq!(empty.connection_duration, 0.0);

        let (_, id) = reporter
            .streamer
            .handle_offer(SdpOffer::new("v=0"), SessionMode::VideoOnly)
            .await
            .unwrap();
        let report = reporter.connections().await;
        assert_eq!(report.clients, vec![id.clone()]);
        assert_eq!(report.current_client, Some(id));
        assert_eq!(report.mode, Some(SessionMode::VideoOnly));
        reporter.supervisor.stop();
    }

    #[test]
    fn test_camera_config_report() {
        let report = reporter(vec![], OpenStep::Stream).camera_config();
        assert_eq!(report.device, "scripted");
        assert_eq!(report.width, 640);
        assert_eq!(report.format, PixelFormat::H264);
    }
}
