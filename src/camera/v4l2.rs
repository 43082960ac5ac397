//! V4L2 camera backend
//!
//! Opens a capture node, negotiates format and frame rate, and reads frames
//! through memory-mapped buffers. Encoded formats (H.264, VP8) are passed
//! through untouched.

use bytes::Bytes;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::Device;

use super::backend::{CameraBackend, CameraHandle, DeviceError, DeviceResult};
use super::format::{PixelFormat, Resolution};
use super::frame::Frame;
use crate::utils::LogThrottler;

/// Default number of capture buffers
const DEFAULT_BUFFER_COUNT: u32 = 4;

/// V4L2 backend configuration
#[derive(Debug, Clone)]
pub struct V4l2Config {
    /// Explicit device node; discovered when `None`
    pub device: Option<PathBuf>,
    /// Serial (or any substring of card name / bus info) used for discovery
    pub serial: Option<String>,
    pub resolution: Resolution,
    pub format: PixelFormat,
    pub fps: u32,
    pub buffer_count: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: None,
            serial: None,
            resolution: Resolution::new(640, 480),
            format: PixelFormat::H264,
            fps: 30,
            buffer_count: DEFAULT_BUFFER_COUNT,
        }
    }
}

/// Camera backend over a V4L2 capture node
pub struct V4l2Backend {
    config: V4l2Config,
}

impl V4l2Backend {
    pub fn new(config: V4l2Config) -> Self {
        Self { config }
    }

    fn resolve_path(&self) -> DeviceResult<PathBuf> {
        if let Some(path) = &self.config.device {
            return Ok(path.clone());
        }

        for node in v4l::context::enum_devices() {
            let path = node.path().to_path_buf();
            let device = match Device::with_path(&path) {
                Ok(d) => d,
                Err(e) => {
                    debug!("Skipping {:?}: {}", path, e);
                    continue;
                }
            };
            let caps = match device.query_caps() {
                Ok(c) => c,
                Err(e) => {
                    debug!("Failed to query {:?}: {}", path, e);
                    continue;
                }
            };
            if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
                continue;
            }

            match &self.config.serial {
                None => return Ok(path),
                Some(serial) => {
                    if caps.card.contains(serial.as_str())
                        || caps.bus.contains(serial.as_str())
                        || sysfs_serial(&path).is_some_and(|s| s == *serial)
                    {
                        return Ok(path);
                    }
                }
            }
        }

        Err(DeviceError::NotFound(match &self.config.serial {
            Some(serial) => format!("no capture device with serial {}", serial),
            None => "no capture device present".to_string(),
        }))
    }
}

/// USB serial number of the device behind a video node, if sysfs exposes one
fn sysfs_serial(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let serial_path = format!("/sys/class/video4linux/{}/device/../serial", name);
    std::fs::read_to_string(serial_path)
        .ok()
        .map(|s| s.trim().to_string())
}

impl CameraBackend for V4l2Backend {
    fn describe(&self) -> String {
        match (&self.config.device, &self.config.serial) {
            (Some(path), _) => format!("v4l2:{}", path.display()),
            (None, Some(serial)) => format!("v4l2:serial={}", serial),
            (None, None) => "v4l2:auto".to_string(),
        }
    }

    fn open(&self) -> DeviceResult<Box<dyn CameraHandle>> {
        let path = self.resolve_path()?;
        let open_err = |e: io::Error| DeviceError::Open(format!("{}: {}", path.display(), e));

        let device = Device::with_path(&path).map_err(open_err)?;

        let mut fmt = device.format().map_err(open_err)?;
        fmt.width = self.config.resolution.width;
        fmt.height = self.config.resolution.height;
        fmt.fourcc = self.config.format.to_fourcc();
        let actual = device.set_format(&fmt).map_err(open_err)?;

        let format = PixelFormat::from_fourcc(actual.fourcc).ok_or_else(|| {
            DeviceError::Open(format!(
                "{}: unsupported pixel format {}",
                path.display(),
                actual.fourcc
            ))
        })?;
        if format != self.config.format {
            warn!(
                "Requested {} from {}, device chose {}",
                self.config.format,
                path.display(),
                format
            );
        }
        let resolution = Resolution::new(actual.width, actual.height);
        if resolution != self.config.resolution {
            warn!(
                "Requested {}, got {}",
                self.config.resolution, resolution
            );
        }

        if let Err(e) = device.set_params(&Parameters::with_fps(self.config.fps)) {
            warn!("Failed to set {} fps on {}: {}", self.config.fps, path.display(), e);
        }

        let stream = Stream::with_buffers(&device, Type::VideoCapture, self.config.buffer_count)
            .map_err(open_err)?;

        info!(
            "Opened {} at {} {} ({} fps)",
            path.display(),
            resolution,
            format,
            self.config.fps
        );

        Ok(Box::new(V4l2Handle {
            stream,
            _device: device,
            path,
            resolution,
            format,
            timeout: None,
            throttler: LogThrottler::with_secs(5),
        }))
    }
}

/// An open V4L2 capture stream
struct V4l2Handle {
    // Declared before the device so buffers are unmapped first
    stream: Stream<'static>,
    _device: Device,
    path: PathBuf,
    resolution: Resolution,
    format: PixelFormat,
    timeout: Option<Duration>,
    throttler: LogThrottler,
}

/// Errno values that mean the device is gone rather than momentarily busy
fn is_device_lost(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(5)      // EIO
            | Some(6)   // ENXIO
            | Some(19)  // ENODEV
            | Some(32)  // EPIPE
            | Some(108) // ESHUTDOWN
    )
}

impl CameraHandle for V4l2Handle {
    fn read(&mut self, timeout: Duration) -> DeviceResult<Option<Frame>> {
        if self.timeout != Some(timeout) {
            self.stream.set_timeout(timeout);
            self.timeout = Some(timeout);
        }

        let (buf, meta) = match self.stream.next() {
            Ok(next) => next,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(None),
            Err(e) if is_device_lost(&e) => {
                return Err(DeviceError::Read(format!(
                    "device lost {}: {}",
                    self.path.display(),
                    e
                )));
            }
            Err(e) => {
                let key = format!("capture_{:?}", e.kind());
                crate::warn_throttled!(self.throttler, &key, "Capture error on {}: {}", self.path.display(), e);
                return Ok(None);
            }
        };

        let used = (meta.bytesused as usize).min(buf.len());
        if used == 0 {
            return Ok(None);
        }

        let key_frame = meta.flags.contains(v4l::buffer::Flags::KEYFRAME);
        let frame = Frame::new(
            Bytes::copy_from_slice(&buf[..used]),
            self.resolution,
            self.format,
            meta.sequence as u64,
        )
        .with_key_frame(key_frame || !matches!(self.format, PixelFormat::H264 | PixelFormat::Vp8));
        Ok(Some(frame))
    }

    fn close(self: Box<Self>) -> DeviceResult<()> {
        debug!("Closing {}", self.path.display());
        // Dropping the stream issues STREAMOFF and unmaps the buffers
        drop(self);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        let backend = V4l2Backend::new(V4l2Config {
            device: Some(PathBuf::from("/dev/video2")),
            ..Default::default()
        });
        assert_eq!(backend.describe(), "v4l2:/dev/video2");

        let backend = V4l2Backend::new(V4l2Config {
            serial: Some("ABC123".to_string()),
            ..Default::default()
        });
        assert_eq!(backend.describe(), "v4l2:serial=ABC123");
    }

    #[test]
    fn test_missing_device_is_open_error() {
        let backend = V4l2Backend::new(V4l2Config {
            device: Some(PathBuf::from("/nonexistent/video99")),
            ..Default::default()
        });
        match backend.open() {
            Err(DeviceError::Open(msg)) => assert!(msg.contains("/nonexistent/video99")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("opened a nonexistent device"),
        }
    }

    #[test]
    fn test_device_lost_classification() {
        assert!(is_device_lost(&io::Error::from_raw_os_error(19)));
        assert!(is_device_lost(&io::Error::from_raw_os_error(5)));
        assert!(!is_device_lost(&io::Error::from_raw_os_error(22)));
        assert!(!is_device_lost(&io::Error::new(io::ErrorKind::Other, "x")));
    }
}
