//! Camera backend abstraction
//!
//! The supervisor only talks to hardware through these traits, which keeps
//! the reconnect logic testable with a scripted backend.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::frame::Frame;

/// Device-level fault. Handled by the supervisor, never returned to requests.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("No matching camera: {0}")]
    NotFound(String),

    #[error("Failed to open camera: {0}")]
    Open(String),

    #[error("Camera read failed: {0}")]
    Read(String),

    #[error("No frame for {elapsed:?}")]
    Stalled { elapsed: Duration },

    #[error("Camera backend panicked: {0}")]
    Panicked(String),
}

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Factory for camera handles
pub trait CameraBackend: Send + Sync {
    /// Human readable description for logs and status
    fn describe(&self) -> String;

    /// Open the device. Ownership of the returned handle passes to the caller.
    fn open(&self) -> DeviceResult<Box<dyn CameraHandle>>;
}

/// An open camera
pub trait CameraHandle: Send {
    /// Wait up to `timeout` for the next frame.
    ///
    /// `Ok(None)` means no frame arrived in time; stall detection is the
    /// caller's job.
    fn read(&mut self, timeout: Duration) -> DeviceResult<Option<Frame>>;

    /// Release the device
    fn close(self: Box<Self>) -> DeviceResult<()>;
}

/// Owns a handle for the duration of one connect attempt.
///
/// The handle is released when the guard goes out of scope, whether the
/// attempt ends normally, with an error, or by unwinding.
pub struct HandleGuard {
    handle: Option<Box<dyn CameraHandle>>,
    label: String,
}

impl HandleGuard {
    pub fn new(handle: Box<dyn CameraHandle>, label: impl Into<String>) -> Self {
        Self {
            handle: Some(handle),
            label: label.into(),
        }
    }

    /// Read one frame, converting a panic inside the backend into an error
    pub fn read(&mut self, timeout: Duration) -> DeviceResult<Option<Frame>> {
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| DeviceError::Read("handle already released".to_string()))?;

        match catch_unwind(AssertUnwindSafe(|| handle.read(timeout))) {
            Ok(result) => result,
            Err(payload) => Err(DeviceError::Panicked(panic_message(payload.as_ref()))),
        }
    }

    /// Release now instead of at end of scope
    pub fn release(mut self) {
        self.close_inner();
    }

    fn close_inner(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        match catch_unwind(AssertUnwindSafe(move || handle.close())) {
            Ok(Ok(())) => debug!("Released camera {}", self.label),
            Ok(Err(e)) => warn!("Error while releasing camera {}: {}", self.label, e),
            Err(payload) => warn!(
                "Camera {} panicked during release: {}",
                self.label,
                panic_message(payload.as_ref())
            ),
        }
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.close_inner();
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandle {
        closes: Arc<AtomicUsize>,
        panic_on_read: bool,
    }

    impl CameraHandle for CountingHandle {
        fn read(&mut self, _timeout: Duration) -> DeviceResult<Option<Frame>> {
            if self.panic_on_read {
                panic!("sensor exploded");
            }
            Ok(None)
        }

        fn close(self: Box<Self>) -> DeviceResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn guard(closes: &Arc<AtomicUsize>, panic_on_read: bool) -> HandleGuard {
        HandleGuard::new(
            Box::new(CountingHandle {
                closes: closes.clone(),
                panic_on_read,
            }),
            "test",
        )
    }

    #[test]
    fn test_drop_releases_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        {
            let mut g = guard(&closes, false);
            assert!(matches!(g.read(Duration::from_millis(1)), Ok(None)));
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_explicit_release_not_repeated_on_drop() {
        let closes = Arc::new(AtomicUsize::new(0));
        guard(&closes, false).release();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_in_read_becomes_error_and_still_releases() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut g = guard(&closes, true);
        match g.read(Duration::from_millis(1)) {
            Err(DeviceError::Panicked(msg)) => assert!(msg.contains("sensor exploded")),
            other => panic!("unexpected: {:?}", other),
        }
        drop(g);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
