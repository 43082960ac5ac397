//! Camera video track
//!
//! Forwards frames from the [`FrameSource`](crate::camera::FrameSource) slot
//! to a sample track. Only the newest frame is ever sent; frames that were
//! replaced before the sender woke up are skipped.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use super::signaling::ConnectionState;
use crate::camera::{FrameReceiver, PixelFormat};
use crate::error::{AppError, Result};
use crate::utils::LogThrottler;

/// Shortest and longest duration reported for one sample
const MIN_SAMPLE_DURATION: Duration = Duration::from_millis(1);
const MAX_SAMPLE_DURATION: Duration = Duration::from_millis(100);

/// Create RTP codec capability for a passthrough video format
pub fn video_codec_capability(format: PixelFormat) -> Result<RTCRtpCodecCapability> {
    let mime_type = format.mime_type().ok_or_else(|| {
        AppError::WebRtcError(format!(
            "{} frames cannot be sent without transcoding",
            format
        ))
    })?;
    let sdp_fmtp_line = match format {
        PixelFormat::H264 => {
            "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f".to_string()
        }
        _ => String::new(),
    };
    Ok(RTCRtpCodecCapability {
        mime_type: mime_type.to_string(),
        clock_rate: 90000,
        channels: 0,
        sdp_fmtp_line,
        rtcp_feedback: vec![],
    })
}

/// Duration of a sample given the capture time of the previous one
pub(crate) fn sample_duration(
    previous: Option<Instant>,
    current: Instant,
    nominal: Duration,
) -> Duration {
    match previous {
        Some(prev) => current
            .saturating_duration_since(prev)
            .clamp(MIN_SAMPLE_DURATION, MAX_SAMPLE_DURATION),
        None => nominal,
    }
}

/// Video track fed by the camera
pub struct CameraVideoTrack {
    track: Arc<TrackLocalStaticSample>,
    format: PixelFormat,
    nominal_frame: Duration,
    /// Running flag
    running: Arc<watch::Sender<bool>>,
}

impl CameraVideoTrack {
    pub fn new(format: PixelFormat, stream_id: &str, fps: u32) -> Result<Self> {
        let capability = video_codec_capability(format)?;
        let track = Arc::new(TrackLocalStaticSample::new(
            capability,
            "video0".to_string(),
            stream_id.to_string(),
        ));
        let (running_tx, _) = watch::channel(false);

        Ok(Self {
            track,
            format,
            nominal_frame: Duration::from_secs(1) / fps.max(1),
            running: Arc::new(running_tx),
        })
    }

    /// Get the underlying sample track
    pub fn sample_track(&self) -> Arc<TrackLocalStaticSample> {
        self.track.clone()
    }

    /// Start forwarding once `state` reports Connected
    pub fn start(&self, frames: FrameReceiver, state: watch::Receiver<ConnectionState>) {
        let _ = self.running.send(true);
        let sender = Sender {
            track: self.track.clone(),
            format: self.format,
            nominal_frame: self.nominal_frame,
            running_rx: self.running.subscribe(),
            throttler: LogThrottler::with_secs(10),
        };
        tokio::spawn(sender.run(frames, state));
    }

    /// Stop sending
    pub fn stop(&self) {
        let _ = self.running.send(false);
    }
}

struct Sender {
    track: Arc<TrackLocalStaticSample>,
    format: PixelFormat,
    nominal_frame: Duration,
    running_rx: watch::Receiver<bool>,
    throttler: LogThrottler,
}

impl Sender {
    fn stopped(&self) -> bool {
        !*self.running_rx.borrow()
    }

    /// Returns `false` if the peer or the track went away first
    async fn wait_connected(&mut self, state: &mut watch::Receiver<ConnectionState>) -> bool {
        loop {
            let current = *state.borrow_and_update();
            if current == ConnectionState::Connected {
                return true;
            }
            if current.is_terminal() || self.stopped() {
                return false;
            }
            tokio::select! {
                changed = state.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
                changed = self.running_rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    async fn run(
        mut self,
        mut frames: FrameReceiver,
        mut state: watch::Receiver<ConnectionState>,
    ) {
        if !self.wait_connected(&mut state).await {
            debug!("Video track never connected");
            return;
        }
        info!("Starting video track sender ({})", self.format);

        let mut last_capture: Option<Instant> = None;
        let mut seen_key_frame = false;
        // Anything already in the slot is stale by now
        let _ = frames.borrow_and_update();

        loop {
            tokio::select! {
                changed = frames.changed() => {
                    if changed.is_err() {
                        debug!("Frame source closed");
                        break;
                    }
                }
                changed = self.running_rx.changed() => {
                    if changed.is_err() || self.stopped() {
                        debug!("Video track stopped");
                        break;
                    }
                    continue;
                }
            }

            let latest = frames.borrow_and_update().clone();
            let Some(frame) = latest else {
                continue;
            };

            if frame.format != self.format {
                crate::warn_throttled!(
                    self.throttler,
                    "format_mismatch",
                    "Dropping {} frame on {} track",
                    frame.format,
                    self.format
                );
                continue;
            }
            if !seen_key_frame {
                if !frame.key_frame {
                    continue;
                }
                seen_key_frame = true;
            }

            let duration = sample_duration(last_capture, frame.captured_at, self.nominal_frame);
            last_capture = Some(frame.captured_at);

            let sample = Sample {
                data: frame.data_bytes(),
                duration,
                ..Default::default()
            };
            if let Err(e) = self.track.write_sample(&sample).await {
                debug!("Failed to write sample: {}", e);
            }
        }

        info!("Video track sender stopped");
    }
}
