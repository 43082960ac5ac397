//! Camera device supervisor
//!
//! Owns the backend handle and runs the open/read/reconnect loop on a
//! dedicated thread for the lifetime of the process:
//!
//! ```text
//! Disconnected -> Connecting -> Streaming -> (stall/error) -> Faulted
//!                     ^                                          |
//!                     +----------------- back-off ---------------+
//! ```
//!
//! Faults never escape the loop. They are recorded in [`CameraHealth`] and
//! drive the back-off policy.

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::backend::{panic_message, CameraBackend, DeviceError, HandleGuard};
use super::backoff::RetryPolicy;
use super::source::FrameSource;
use crate::utils::LogThrottler;

/// Supervisor state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraStatus {
    /// Not running, no handle held
    Disconnected,
    /// Opening the device, or opened and waiting for the first frame
    Connecting,
    /// Frames are flowing
    Streaming,
    /// Last attempt failed; waiting out the back-off
    Faulted,
}

impl fmt::Display for CameraStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraStatus::Disconnected => write!(f, "disconnected"),
            CameraStatus::Connecting => write!(f, "connecting"),
            CameraStatus::Streaming => write!(f, "streaming"),
            CameraStatus::Faulted => write!(f, "faulted"),
        }
    }
}

/// Supervisor timing
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Upper bound on one blocking read; also bounds how long `stop()` waits
    pub read_timeout: Duration,
    /// No frame for this long counts as a fault
    pub stall_timeout: Duration,
    /// Reconnect back-off
    pub retry: RetryPolicy,
    /// Recycle a healthy connection after this long (disabled when `None`)
    pub restart_interval: Option<Duration>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(1),
            stall_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            restart_interval: None,
        }
    }
}

/// Snapshot of the camera state for status reporting
#[derive(Debug, Clone)]
pub struct CameraHealth {
    pub status: CameraStatus,
    pub running: bool,
    /// Failed attempts since the last good frame
    pub consecutive_failures: u32,
    /// Delay before the next connect attempt
    pub retry_backoff: Duration,
    pub last_frame_at: Option<Instant>,
    pub last_frame_wall: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub handle_held: bool,
    pub last_error: Option<String>,
    pub frames_captured: u64,
    /// Faults recorded since start
    pub faults: u64,
    /// Healthy connections recycled on request or by the restart interval
    pub reconnects: u64,
}

impl CameraHealth {
    fn new() -> Self {
        Self {
            status: CameraStatus::Disconnected,
            running: false,
            consecutive_failures: 0,
            retry_backoff: Duration::ZERO,
            last_frame_at: None,
            last_frame_wall: None,
            last_attempt_at: None,
            handle_held: false,
            last_error: None,
            frames_captured: 0,
            faults: 0,
            reconnects: 0,
        }
    }

    /// Time since the last good frame
    pub fn last_frame_age(&self) -> Option<Duration> {
        self.last_frame_at.map(|t| t.elapsed())
    }
}

#[derive(Debug, Default)]
struct Control {
    stop: bool,
    reconnect: bool,
}

/// State shared between the supervisor handle and its worker thread
struct Shared {
    health: RwLock<CameraHealth>,
    status_tx: watch::Sender<CameraStatus>,
    control: Mutex<Control>,
    wake: Condvar,
}

impl Shared {
    fn set_status(&self, status: CameraStatus) {
        self.health.write().status = status;
        self.status_tx.send_replace(status);
    }

    fn stop_requested(&self) -> bool {
        self.control.lock().stop
    }

    fn take_reconnect(&self) -> bool {
        std::mem::take(&mut self.control.lock().reconnect)
    }

    /// Sleep for `delay` unless stop or reconnect is requested first.
    /// Returns `false` if the loop should exit.
    fn wait(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        let mut control = self.control.lock();
        while !control.stop && !control.reconnect {
            if self.wake.wait_until(&mut control, deadline).timed_out() {
                break;
            }
        }
        control.reconnect = false;
        !control.stop
    }
}

/// How the streaming phase of an attempt ended
enum AttemptOutcome {
    Stopped,
    Fault(DeviceError),
    Recycle(&'static str),
}

/// What the loop does after an attempt
enum Next {
    Exit,
    Backoff,
    Reconnect,
}

/// Keeps one camera connection alive and publishes its frames
pub struct DeviceSupervisor {
    backend: Arc<dyn CameraBackend>,
    frames: Arc<FrameSource>,
    config: SupervisorConfig,
    shared: Arc<Shared>,
    running: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceSupervisor {
    pub fn new(
        backend: Arc<dyn CameraBackend>,
        frames: Arc<FrameSource>,
        config: SupervisorConfig,
    ) -> Self {
        let (status_tx, _) = watch::channel(CameraStatus::Disconnected);
        Self {
            backend,
            frames,
            config,
            shared: Arc::new(Shared {
                health: RwLock::new(CameraHealth::new()),
                status_tx,
                control: Mutex::new(Control::default()),
                wake: Condvar::new(),
            }),
            running: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    /// Start the supervisory loop. No-op if it is already running.
    ///
    /// The service counts as running from here on even if the camera cannot
    /// be opened; that shows up in `health()` instead.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if let Some(handle) = worker.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }
        if let Some(finished) = worker.take() {
            let _ = finished.join();
        }

        *self.shared.control.lock() = Control::default();
        self.running.store(true, Ordering::SeqCst);
        self.shared.health.write().running = true;

        let ctx = Worker {
            backend: self.backend.clone(),
            frames: self.frames.clone(),
            config: self.config.clone(),
            shared: self.shared.clone(),
            throttler: LogThrottler::with_secs(30),
        };

        match std::thread::Builder::new()
            .name("camera-supervisor".to_string())
            .spawn(move || ctx.run())
        {
            Ok(handle) => {
                info!("Camera supervisor started for {}", self.backend.describe());
                *worker = Some(handle);
            }
            Err(e) => {
                error!("Failed to spawn camera supervisor thread: {}", e);
                self.shared.health.write().last_error = Some(e.to_string());
            }
        }
    }

    /// Stop the loop and release the device.
    ///
    /// Blocks for at most about one read timeout.
    pub fn stop(&self) {
        let handle = self.worker.lock().take();
        self.running.store(false, Ordering::SeqCst);

        {
            let mut control = self.shared.control.lock();
            control.stop = true;
        }
        self.shared.wake.notify_all();

        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Camera supervisor thread panicked");
            }
            info!("Camera supervisor stopped");
        }

        let mut health = self.shared.health.write();
        health.running = false;
        health.handle_held = false;
        health.status = CameraStatus::Disconnected;
        drop(health);
        self.shared.status_tx.send_replace(CameraStatus::Disconnected);
    }

    /// Drop the current connection and reconnect without waiting out any
    /// pending back-off.
    pub fn request_reconnect(&self) {
        info!("Camera reconnect requested");
        self.shared.control.lock().reconnect = true;
        self.shared.wake.notify_all();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> CameraStatus {
        self.shared.health.read().status
    }

    pub fn health(&self) -> CameraHealth {
        self.shared.health.read().clone()
    }

    /// Subscribe to status transitions
    pub fn status_watch(&self) -> watch::Receiver<CameraStatus> {
        self.shared.status_tx.subscribe()
    }

    pub fn frames(&self) -> &Arc<FrameSource> {
        &self.frames
    }

    pub fn describe(&self) -> String {
        self.backend.describe()
    }
}

impl Drop for DeviceSupervisor {
    fn drop(&mut self) {
        if self.worker.lock().is_some() {
            self.stop();
        }
    }
}

/// Everything the worker thread owns
struct Worker {
    backend: Arc<dyn CameraBackend>,
    frames: Arc<FrameSource>,
    config: SupervisorConfig,
    shared: Arc<Shared>,
    throttler: LogThrottler,
}

impl Worker {
    fn run(self) {
        let label = self.backend.describe();
        let mut skip_backoff = false;

        loop {
            if self.shared.stop_requested() {
                break;
            }

            let delay = {
                let mut health = self.shared.health.write();
                health.retry_backoff = if skip_backoff {
                    Duration::ZERO
                } else {
                    self.config.retry.delay(health.consecutive_failures)
                };
                health.retry_backoff
            };
            if !delay.is_zero() {
                debug!("Waiting {:?} before reconnecting {}", delay, label);
                if !self.shared.wait(delay) {
                    break;
                }
            }

            skip_backoff = match self.attempt(&label) {
                Next::Exit => break,
                Next::Backoff => false,
                Next::Reconnect => true,
            };
        }

        let mut health = self.shared.health.write();
        health.handle_held = false;
        health.status = CameraStatus::Disconnected;
        drop(health);
        self.shared.status_tx.send_replace(CameraStatus::Disconnected);
        debug!("Camera supervisor loop exited for {}", label);
    }

    /// One full connect attempt. The handle lives inside the guard and is
    /// released before this returns, whatever the outcome.
    fn attempt(&self, label: &str) -> Next {
        {
            let mut health = self.shared.health.write();
            health.last_attempt_at = Some(Utc::now());
        }
        self.shared.set_status(CameraStatus::Connecting);

        let opened = match catch_unwind(AssertUnwindSafe(|| self.backend.open())) {
            Ok(result) => result,
            Err(payload) => Err(DeviceError::Panicked(panic_message(payload.as_ref()))),
        };
        let handle = match opened {
            Ok(handle) => handle,
            Err(e) => {
                self.record_fault(label, e, None);
                return Next::Backoff;
            }
        };

        let mut guard = HandleGuard::new(handle, label);
        self.shared.health.write().handle_held = true;
        debug!("Camera {} opened, waiting for first frame", label);

        match self.stream(&mut guard, label) {
            AttemptOutcome::Stopped => {
                self.release(guard, CameraStatus::Disconnected);
                Next::Exit
            }
            AttemptOutcome::Fault(e) => {
                self.record_fault(label, e, Some(guard));
                Next::Backoff
            }
            AttemptOutcome::Recycle(reason) => {
                info!("Recycling camera connection {}: {}", label, reason);
                self.shared.health.write().reconnects += 1;
                self.release(guard, CameraStatus::Disconnected);
                Next::Reconnect
            }
        }
    }

    /// Close the handle and publish the new status in one health update
    fn release(&self, guard: HandleGuard, status: CameraStatus) {
        let mut health = self.shared.health.write();
        guard.release();
        health.handle_held = false;
        health.status = status;
        drop(health);
        self.shared.status_tx.send_replace(status);
    }

    fn stream(&self, guard: &mut HandleGuard, label: &str) -> AttemptOutcome {
        let opened_at = Instant::now();
        let mut last_progress = opened_at;
        let mut streaming = false;

        loop {
            if self.shared.stop_requested() {
                return AttemptOutcome::Stopped;
            }
            if self.shared.take_reconnect() {
                return AttemptOutcome::Recycle("reconnect requested");
            }
            if let Some(interval) = self.config.restart_interval {
                if streaming && opened_at.elapsed() >= interval {
                    return AttemptOutcome::Recycle("restart interval reached");
                }
            }

            match guard.read(self.config.read_timeout) {
                Ok(Some(frame)) => {
                    last_progress = Instant::now();
                    {
                        let mut health = self.shared.health.write();
                        health.frames_captured += 1;
                        health.last_frame_at = Some(frame.captured_at);
                        health.last_frame_wall = Some(frame.captured_wall);
                        if !streaming {
                            health.consecutive_failures = 0;
                            health.retry_backoff = Duration::ZERO;
                            health.last_error = None;
                            health.status = CameraStatus::Streaming;
                        }
                    }
                    if !streaming {
                        streaming = true;
                        self.shared.status_tx.send_replace(CameraStatus::Streaming);
                        self.throttler.clear_all();
                        info!(
                            "Camera {} streaming {} {}",
                            label, frame.resolution, frame.format
                        );
                    }
                    self.frames.publish(frame);
                }
                Ok(None) => {
                    let elapsed = last_progress.elapsed();
                    if elapsed > self.config.stall_timeout {
                        return AttemptOutcome::Fault(DeviceError::Stalled { elapsed });
                    }
                }
                Err(e) => return AttemptOutcome::Fault(e),
            }
        }
    }

    fn record_fault(&self, label: &str, err: DeviceError, guard: Option<HandleGuard>) {
        let failures = {
            let mut health = self.shared.health.write();
            if let Some(guard) = guard {
                guard.release();
            }
            health.consecutive_failures = health.consecutive_failures.saturating_add(1);
            health.faults += 1;
            health.handle_held = false;
            health.status = CameraStatus::Faulted;
            health.last_error = Some(err.to_string());
            health.retry_backoff = self.config.retry.delay(health.consecutive_failures);
            health.consecutive_failures
        };
        self.shared.status_tx.send_replace(CameraStatus::Faulted);

        let key = match &err {
            DeviceError::NotFound(_) => "not_found",
            DeviceError::Open(_) => "open",
            DeviceError::Read(_) => "read",
            DeviceError::Stalled { .. } => "stalled",
            DeviceError::Panicked(_) => "panicked",
        };
        match self.throttler.check(key) {
            Some(0) => warn!(
                "Camera {} fault (attempt {}): {}",
                label, failures, err
            ),
            Some(suppressed) => warn!(
                "Camera {} fault (attempt {}): {} (suppressed {} repeats)",
                label, failures, err, suppressed
            ),
            None => debug!("Camera {} fault (attempt {}): {}", label, failures, err),
        }
    }
}
