//! solocam - single-viewer camera streaming over WebRTC
//!
//! One camera, one viewer at a time. A supervisor thread keeps the device
//! alive and publishes the newest frame; each new viewer evicts the previous
//! one before its answer is returned.

pub mod camera;
pub mod config;
pub mod error;
pub mod state;
pub mod status;
pub mod utils;
pub mod web;
pub mod webrtc;

pub use error::{AppError, Result};
