use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use crate::state::AppState;

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(handlers::health_check))
        // WebRTC endpoints
        .route("/offer", post(handlers::webrtc_offer))
        .route("/ice", post(handlers::webrtc_ice_candidate))
        .route("/connections", get(handlers::webrtc_connections))
        .route("/connections/:client_id", delete(handlers::webrtc_close))
        .route("/cleanup", post(handlers::webrtc_cleanup))
        .route("/force-release", post(handlers::webrtc_force_release))
        // Camera endpoints
        .route("/camera/status", get(handlers::camera_status))
        .route("/camera/reconnect", post(handlers::camera_reconnect))
        .route("/camera/config", get(handlers::config::get_camera_config))
        // ICE configuration
        .route(
            "/ice_config",
            get(handlers::config::get_ice_config).post(handlers::config::update_ice_config),
        )
}

/// Create the main application router
///
/// Every route is served at `/` and again under `proxy_prefix`, so the
/// service works both directly and behind a path-routing reverse proxy.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let prefix = state.config.web.proxy_prefix.trim_end_matches('/').to_string();

    let mut router = Router::new().merge(api_routes());
    if !prefix.is_empty() {
        router = router.nest(&prefix, api_routes());
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
