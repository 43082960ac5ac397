pub mod config;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::Result;
use crate::state::AppState;
use crate::status::{CameraStatusReport, ConnectionsReport};
use crate::webrtc::{AnswerResponse, IceCandidateRequest, OfferQuery, OfferRequest, SdpOffer};

// ============================================================================
// Health
// ============================================================================

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Generic acknowledgement
#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

// ============================================================================
// WebRTC
// ============================================================================

/// Handle WebRTC offer; the new viewer replaces any current one
pub async fn webrtc_offer(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OfferQuery>,
    Json(req): Json<OfferRequest>,
) -> Result<Json<AnswerResponse>> {
    let mode = query.mode.unwrap_or_default();
    let (answer, client_id) = state
        .streamer
        .handle_offer(SdpOffer::new(req.sdp), mode)
        .await?;
    Ok(Json(AnswerResponse::new(answer, client_id)))
}

/// Add ICE candidate for the current viewer
pub async fn webrtc_ice_candidate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IceCandidateRequest>,
) -> Result<Json<StatusResponse>> {
    state
        .streamer
        .handle_ice_candidate(&req.client_id, req.candidate)
        .await?;
    Ok(Json(StatusResponse { status: "ok" }))
}

/// Close a viewer. Closing a stale id is acknowledged.
pub async fn webrtc_close(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> Json<StatusResponse> {
    let status = if state.streamer.handle_close(&client_id).await {
        "closed"
    } else {
        "not_current"
    };
    Json(StatusResponse { status })
}

pub async fn webrtc_connections(State(state): State<Arc<AppState>>) -> Json<ConnectionsReport> {
    Json(state.status.connections().await)
}

/// Idle cleanup request body
#[derive(Debug, Default, Deserialize)]
pub struct CleanupRequest {
    /// Override the configured idle age
    pub max_age_secs: Option<u64>,
}

#[derive(Serialize)]
pub struct CleanupResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released_client: Option<String>,
}

pub async fn webrtc_cleanup(
    State(state): State<Arc<AppState>>,
    body: Option<Json<CleanupRequest>>,
) -> Json<CleanupResponse> {
    let max_age = body
        .and_then(|Json(req)| req.max_age_secs)
        .map(Duration::from_secs);
    let released_client = state.streamer.handle_cleanup(max_age).await;
    Json(CleanupResponse {
        status: "ok",
        released_client,
    })
}

pub async fn webrtc_force_release(State(state): State<Arc<AppState>>) -> Json<CleanupResponse> {
    match state.streamer.handle_force_release().await {
        Some(id) => Json(CleanupResponse {
            status: "force_released",
            released_client: Some(id),
        }),
        None => Json(CleanupResponse {
            status: "already_empty",
            released_client: None,
        }),
    }
}

// ============================================================================
// Camera
// ============================================================================

pub async fn camera_status(State(state): State<Arc<AppState>>) -> Json<CameraStatusReport> {
    Json(state.status.camera_status())
}

#[derive(Serialize)]
pub struct ReconnectResponse {
    pub status: &'static str,
    pub message: &'static str,
}

/// Drop the camera connection and reconnect immediately
pub async fn camera_reconnect(State(state): State<Arc<AppState>>) -> Json<ReconnectResponse> {
    if !state.supervisor.is_running() {
        info!("Reconnect requested while camera supervisor is stopped, starting it");
        state.supervisor.start();
    } else {
        state.supervisor.request_reconnect();
    }
    Json(ReconnectResponse {
        status: "ok",
        message: "Camera reconnection initiated",
    })
}
