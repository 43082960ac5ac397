//! Configuration handlers
//!
//! - GET  /ice_config     - current ICE configuration (credential masked)
//! - POST /ice_config     - partial ICE configuration update
//! - GET  /camera/config  - configured camera parameters

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::status::CameraConfigReport;
use crate::webrtc::{IceConfig, IceConfigUpdate};

pub async fn get_ice_config(State(state): State<Arc<AppState>>) -> Json<IceConfig> {
    Json(state.streamer.ice_config().redacted())
}

/// Apply an ICE update. Invalid payloads leave the current config untouched.
pub async fn update_ice_config(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<IceConfigUpdate>, axum::extract::rejection::JsonRejection>,
) -> Result<Json<IceConfig>> {
    let Json(update) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let updated = state.streamer.update_ice_config(update)?;
    Ok(Json(updated.redacted()))
}

pub async fn get_camera_config(State(state): State<Arc<AppState>>) -> Json<CameraConfigReport> {
    Json(state.status.camera_config())
}
