//! Captured frame data structures

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

use super::format::{PixelFormat, Resolution};

/// A captured frame with metadata
///
/// Immutable once built. The supervisor wraps each one in an `Arc` before
/// publishing, so readers never observe a frame being overwritten.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame payload (encoded bitstream or raw pixels, see `format`)
    data: Bytes,
    /// Frame resolution
    pub resolution: Resolution,
    /// Pixel format
    pub format: PixelFormat,
    /// Whether this is a key frame (for compressed formats)
    pub key_frame: bool,
    /// Frame sequence number as reported by the backend
    pub sequence: u64,
    /// Monotonic capture time
    pub captured_at: Instant,
    /// Wall-clock capture time, for status reporting
    pub captured_wall: DateTime<Utc>,
    /// Optional depth map aligned with this frame
    depth: Option<DepthMap>,
}

impl Frame {
    /// Create a new frame stamped with the current time
    pub fn new(data: Bytes, resolution: Resolution, format: PixelFormat, sequence: u64) -> Self {
        Self {
            data,
            resolution,
            format,
            key_frame: true,
            sequence,
            captured_at: Instant::now(),
            captured_wall: Utc::now(),
            depth: None,
        }
    }

    pub fn with_key_frame(mut self, key_frame: bool) -> Self {
        self.key_frame = key_frame;
        self
    }

    pub fn with_depth(mut self, depth: DepthMap) -> Self {
        self.depth = Some(depth);
        self
    }

    /// Get frame data as bytes slice
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get frame data as Bytes (cheap clone)
    pub fn data_bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    /// Time since capture
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    /// Depth sample accessor, if the backend produced one
    pub fn depth(&self) -> Option<&DepthMap> {
        self.depth.as_ref()
    }
}

/// Per-pixel depth samples aligned with a color frame
///
/// Samples are little-endian `u16` values in device units; `scale_m`
/// converts one unit to meters. A zero sample means "no reading".
#[derive(Debug, Clone)]
pub struct DepthMap {
    pub width: u32,
    pub height: u32,
    pub scale_m: f32,
    samples: Bytes,
}

impl DepthMap {
    /// Returns `None` if `samples` is too short for `width * height` readings.
    pub fn new(width: u32, height: u32, scale_m: f32, samples: Bytes) -> Option<Self> {
        let needed = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(2)?;
        if samples.len() < needed {
            return None;
        }
        Some(Self {
            width,
            height,
            scale_m,
            samples,
        })
    }

    /// Distance in meters at pixel (x, y)
    pub fn distance_at(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 2;
        let raw = u16::from_le_bytes([self.samples[idx], self.samples[idx + 1]]);
        if raw == 0 {
            return None;
        }
        Some(raw as f32 * self.scale_m)
    }
}
