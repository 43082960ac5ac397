//! Pixel format and resolution definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use v4l::format::fourcc::FourCC;

/// Pixel formats a camera backend may produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    /// H.264 elementary stream (Annex B)
    H264,
    /// VP8 frames
    Vp8,
    /// MJPEG compressed format
    Mjpeg,
    /// YUYV 4:2:2 packed format
    Yuyv,
    /// NV12 semi-planar format
    Nv12,
    /// BGR24 format (3 bytes per pixel)
    Bgr24,
}

impl PixelFormat {
    /// Convert to V4L2 FourCC
    pub fn to_fourcc(&self) -> FourCC {
        match self {
            PixelFormat::H264 => FourCC::new(b"H264"),
            PixelFormat::Vp8 => FourCC::new(b"VP80"),
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
            PixelFormat::Yuyv => FourCC::new(b"YUYV"),
            PixelFormat::Nv12 => FourCC::new(b"NV12"),
            PixelFormat::Bgr24 => FourCC::new(b"BGR3"),
        }
    }

    /// Try to convert from V4L2 FourCC
    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"H264" => Some(PixelFormat::H264),
            b"VP80" => Some(PixelFormat::Vp8),
            b"MJPG" => Some(PixelFormat::Mjpeg),
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"NV12" => Some(PixelFormat::Nv12),
            b"BGR3" => Some(PixelFormat::Bgr24),
            _ => None,
        }
    }

    /// Whether frames in this format can be handed to the transport as-is
    pub fn is_webrtc_payload(&self) -> bool {
        self.mime_type().is_some()
    }

    /// RTP mime type for formats the transport carries natively
    pub fn mime_type(&self) -> Option<&'static str> {
        match self {
            PixelFormat::H264 => Some("video/H264"),
            PixelFormat::Vp8 => Some("video/VP8"),
            _ => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::H264 => "H264",
            PixelFormat::Vp8 => "VP8",
            PixelFormat::Mjpeg => "MJPEG",
            PixelFormat::Yuyv => "YUYV",
            PixelFormat::Nv12 => "NV12",
            PixelFormat::Bgr24 => "BGR24",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "H264" => Ok(PixelFormat::H264),
            "VP8" | "VP80" => Ok(PixelFormat::Vp8),
            "MJPEG" | "MJPG" => Ok(PixelFormat::Mjpeg),
            "YUYV" => Ok(PixelFormat::Yuyv),
            "NV12" => Ok(PixelFormat::Nv12),
            "BGR24" | "BGR3" => Ok(PixelFormat::Bgr24),
            _ => Err(format!("Unknown pixel format: {}", s)),
        }
    }
}

/// Frame dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_mapping() {
        for format in [
            PixelFormat::H264,
            PixelFormat::Vp8,
            PixelFormat::Mjpeg,
            PixelFormat::Yuyv,
            PixelFormat::Nv12,
            PixelFormat::Bgr24,
        ] {
            assert_eq!(PixelFormat::from_fourcc(format.to_fourcc()), Some(format));
        }
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"ABCD")), None);
    }

    #[test]
    fn test_webrtc_payload() {
        assert!(PixelFormat::H264.is_webrtc_payload());
        assert!(PixelFormat::Vp8.is_webrtc_payload());
        assert!(!PixelFormat::Mjpeg.is_webrtc_payload());
        assert_eq!(PixelFormat::Bgr24.mime_type(), None);
    }

    #[test]
    fn test_parse() {
        assert_eq!("h264".parse::<PixelFormat>(), Ok(PixelFormat::H264));
        assert_eq!("MJPG".parse::<PixelFormat>(), Ok(PixelFormat::Mjpeg));
        assert!("foo".parse::<PixelFormat>().is_err());
    }
}
