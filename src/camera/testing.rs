//! Scripted camera backend for supervisor and signaling tests

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::backend::{CameraBackend, CameraHandle, DeviceError, DeviceResult};
use super::format::{PixelFormat, Resolution};
use super::frame::Frame;

/// What the next `open()` call does
#[derive(Debug, Clone, Copy)]
pub enum OpenStep {
    /// Open fails
    Fail,
    /// Open succeeds and frames flow indefinitely
    Stream,
    /// Open succeeds, yields this many frames, then goes silent
    Frames(usize),
    /// Open succeeds but the first read panics
    PanicOnRead,
}

pub struct ScriptedBackend {
    steps: Mutex<VecDeque<OpenStep>>,
    fallback: OpenStep,
    opens: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    /// Plays `steps` in order, then repeats `fallback` forever
    pub fn new(steps: Vec<OpenStep>, fallback: OpenStep) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fallback,
            opens: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of `open()` calls, successful or not
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of handles released
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl CameraBackend for ScriptedBackend {
    fn describe(&self) -> String {
        "scripted".to_string()
    }

    fn open(&self) -> DeviceResult<Box<dyn CameraHandle>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().pop_front().unwrap_or(self.fallback);
        let remaining = match step {
            OpenStep::Fail => return Err(DeviceError::Open("scripted failure".to_string())),
            OpenStep::Stream => None,
            OpenStep::Frames(n) => Some(n),
            OpenStep::PanicOnRead => {
                return Ok(Box::new(ScriptedHandle {
                    remaining: None,
                    panic_on_read: true,
                    sequence: 0,
                    closes: self.closes.clone(),
                }))
            }
        };
        Ok(Box::new(ScriptedHandle {
            remaining,
            panic_on_read: false,
            sequence: 0,
            closes: self.closes.clone(),
        }))
    }
}

struct ScriptedHandle {
    remaining: Option<usize>,
    panic_on_read: bool,
    sequence: u64,
    closes: Arc<AtomicUsize>,
}

impl CameraHandle for ScriptedHandle {
    fn read(&mut self, timeout: Duration) -> DeviceResult<Option<Frame>> {
        if self.panic_on_read {
            panic!("scripted read panic");
        }
        match self.remaining.as_mut() {
            Some(n) if *n == 0 => {
                std::thread::sleep(timeout);
                Ok(None)
            }
            Some(n) => {
                *n -= 1;
                Ok(Some(self.next_frame()))
            }
            None => {
                std::thread::sleep(Duration::from_millis(2));
                Ok(Some(self.next_frame()))
            }
        }
    }

    fn close(self: Box<Self>) -> DeviceResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl ScriptedHandle {
    fn next_frame(&mut self) -> Frame {
        self.sequence += 1;
        Frame::new(
            Bytes::from_static(&[0, 0, 0, 1, 0x65, 0x88]),
            Resolution::new(640, 480),
            PixelFormat::H264,
            self.sequence,
        )
    }
}

/// Poll `cond` every few milliseconds until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}
