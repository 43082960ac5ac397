//! Camera acquisition and supervision
//!
//! - [`DeviceSupervisor`] owns the device and keeps it alive
//! - [`FrameSource`] hands the newest frame to whoever wants it
//! - [`CameraBackend`] is the seam to the hardware; [`V4l2Backend`] is the
//!   production implementation

pub mod backend;
pub mod backoff;
pub mod format;
pub mod frame;
pub mod source;
pub mod supervisor;
pub mod v4l2;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{CameraBackend, CameraHandle, DeviceError, DeviceResult, HandleGuard};
pub use backoff::RetryPolicy;
pub use format::{PixelFormat, Resolution};
pub use frame::{DepthMap, Frame};
pub use source::{FrameReceiver, FrameSource};
pub use supervisor::{CameraHealth, CameraStatus, DeviceSupervisor, SupervisorConfig};
pub use v4l2::{V4l2Backend, V4l2Config};
