use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::camera::{PixelFormat, Resolution, RetryPolicy, SupervisorConfig, V4l2Config};
use crate::webrtc::IceConfig;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Camera device settings
    pub camera: CameraConfig,
    /// Device supervisor timing
    pub supervisor: SupervisorSettings,
    /// Viewer session settings
    pub session: SessionConfig,
    /// ICE (STUN/TURN) settings
    pub ice: IceConfig,
    /// Web server settings
    pub web: WebConfig,
}

/// Camera configuration
///
/// Frames are forwarded as the camera encodes them. There is no rotation
/// setting: an H.264/VP8 stream cannot be rotated without transcoding, so
/// `CAMERA_ROTATION` is not read and a `rotation` key in the file is ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraConfig {
    /// Video device path (e.g., /dev/video0); discovered when unset
    pub device: Option<String>,
    /// Serial number used to pick a device when several are attached
    pub serial: Option<String>,
    /// Resolution width
    pub width: u32,
    /// Resolution height
    pub height: u32,
    /// Target FPS
    pub fps: u32,
    /// Capture format; must be one WebRTC can carry without transcoding
    pub format: PixelFormat,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: None,
            serial: None,
            width: 640,
            height: 480,
            fps: 30,
            format: PixelFormat::H264,
        }
    }
}

impl CameraConfig {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn v4l2(&self) -> V4l2Config {
        V4l2Config {
            device: self.device.as_ref().map(PathBuf::from),
            serial: self.serial.clone(),
            resolution: self.resolution(),
            format: self.format,
            fps: self.fps,
            ..Default::default()
        }
    }
}

/// Device supervisor timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SupervisorSettings {
    /// Longest single blocking read
    pub read_timeout_ms: u64,
    /// No frame for this long is a fault
    pub stall_timeout_secs: u64,
    /// First reconnect delay
    pub retry_base_ms: u64,
    /// Reconnect delay ceiling
    pub retry_ceiling_secs: u64,
    /// Recycle a healthy connection this often (disabled when unset)
    pub restart_interval_secs: Option<u64>,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            read_timeout_ms: 1000,
            stall_timeout_secs: 30,
            retry_base_ms: 1000,
            retry_ceiling_secs: 30,
            restart_interval_secs: None,
        }
    }
}

impl SupervisorSettings {
    pub fn to_supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            read_timeout: Duration::from_millis(self.read_timeout_ms.max(1)),
            stall_timeout: Duration::from_secs(self.stall_timeout_secs.max(1)),
            retry: RetryPolicy::new(
                Duration::from_millis(self.retry_base_ms),
                Duration::from_secs(self.retry_ceiling_secs),
            ),
            restart_interval: self
                .restart_interval_secs
                .filter(|&secs| secs > 0)
                .map(Duration::from_secs),
        }
    }
}

/// Viewer session configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Cleanup requests evict a session older than this
    pub idle_max_age_secs: u64,
    /// How often dead peers are reaped
    pub reap_interval_secs: u64,
    /// How long to wait for ICE gathering before answering
    pub gathering_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_max_age_secs: 3600,
            reap_interval_secs: 30,
            gathering_timeout_ms: 5000,
        }
    }
}

impl SessionConfig {
    pub fn idle_max_age(&self) -> Duration {
        Duration::from_secs(self.idle_max_age_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }

    pub fn gathering_timeout(&self) -> Duration {
        Duration::from_millis(self.gathering_timeout_ms)
    }
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebConfig {
    /// Bind address
    pub bind_address: String,
    /// HTTP port
    pub http_port: u16,
    /// Routes are served at `/` and again under this prefix
    pub proxy_prefix: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: 8104,
            proxy_prefix: "/api/v1/color_camera".to_string(),
        }
    }
}
