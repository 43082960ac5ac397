//! Latest-frame publication between the capture thread and consumers
//!
//! Single slot, replace on publish. A slow consumer never sees a backlog,
//! only the newest frame on its next read.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use super::frame::Frame;

/// Receiving end handed to consumers such as the video track
pub type FrameReceiver = watch::Receiver<Option<Arc<Frame>>>;

/// Single-slot frame buffer
#[derive(Debug)]
pub struct FrameSource {
    tx: watch::Sender<Option<Arc<Frame>>>,
    published: AtomicU64,
}

impl FrameSource {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx,
            published: AtomicU64::new(0),
        }
    }

    /// Overwrite the slot. Never blocks and never fails, even with no
    /// subscribers.
    pub fn publish(&self, frame: Frame) {
        self.tx.send_replace(Some(Arc::new(frame)));
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Most recent frame, or `None` before the first publish
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.tx.borrow().clone()
    }

    /// Subscribe to frame updates
    pub fn subscribe(&self) -> FrameReceiver {
        self.tx.subscribe()
    }

    /// Total frames published since start
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for FrameSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::format::{PixelFormat, Resolution};
    use bytes::Bytes;

    fn frame(seq: u64) -> Frame {
        Frame::new(
            Bytes::from(vec![seq as u8; 4]),
            Resolution::new(4, 1),
            PixelFormat::H264,
            seq,
        )
    }

    #[test]
    fn test_latest_before_publish() {
        let source = FrameSource::new();
        assert!(source.latest().is_none());
        assert_eq!(source.published_count(), 0);
    }

    #[test]
    fn test_publish_replaces() {
        let source = FrameSource::new();
        source.publish(frame(1));
        source.publish(frame(2));
        source.publish(frame(3));

        let latest = source.latest().unwrap();
        assert_eq!(latest.sequence, 3);
        assert_eq!(source.published_count(), 3);
    }

    #[test]
    fn test_held_frame_survives_replacement() {
        let source = FrameSource::new();
        source.publish(frame(1));
        let held = source.latest().unwrap();
        source.publish(frame(2));

        assert_eq!(held.sequence, 1);
        assert_eq!(source.latest().unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn test_slow_subscriber_sees_only_newest() {
        let source = FrameSource::new();
        let mut rx = source.subscribe();

        for seq in 1..=5 {
            source.publish(frame(seq));
        }

        rx.changed().await.unwrap();
        let seen = rx.borrow_and_update().clone().unwrap();
        assert_eq!(seen.sequence, 5);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_publish_from_other_thread() {
        let source = Arc::new(FrameSource::new());
        let producer = {
            let source = source.clone();
            std::thread::spawn(move || {
                for seq in 0..100 {
                    source.publish(frame(seq));
                }
            })
        };
        producer.join().unwrap();
        assert_eq!(source.latest().unwrap().sequence, 99);
    }
}
