//! Startup configuration loading
//!
//! Layers, lowest priority first: built-in defaults, the JSON config file,
//! the JSON ICE file named by `ICE_CONFIG_PATH`, then environment variables.
//! Command-line flags are applied on top by the binary.

use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

use super::AppConfig;
use crate::camera::PixelFormat;
use crate::error::{AppError, Result};
use crate::webrtc::IceConfigUpdate;

/// Environment variable naming the main config file
pub const CONFIG_PATH_ENV: &str = "SOLOCAM_CONFIG";
/// Environment variable naming a standalone ICE config file
pub const ICE_CONFIG_PATH_ENV: &str = "ICE_CONFIG_PATH";

/// Load configuration from `path` (if any) and the process environment
pub fn load(path: Option<&Path>) -> Result<AppConfig> {
    load_with(path, |key| std::env::var(key).ok())
}

/// Load configuration with an injectable environment lookup
pub fn load_with<F>(path: Option<&Path>, env: F) -> Result<AppConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(path) => read_config_file(path)?,
        None => AppConfig::default(),
    };

    if let Some(ice_path) = env(ICE_CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
        if let Some(update) = read_ice_file(Path::new(&ice_path)) {
            config.ice.merge(update);
        }
    }

    apply_env(&mut config, &env)?;
    validate(&config)?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        AppError::Config(format!("Failed to read config {}: {}", path.display(), e))
    })?;
    let config = serde_json::from_str(&content).map_err(|e| {
        AppError::Config(format!("Failed to parse config {}: {}", path.display(), e))
    })?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// A broken ICE file is logged and skipped; the other layers still apply.
fn read_ice_file(path: &Path) -> Option<IceConfigUpdate> {
    if !path.is_file() {
        warn!(
            "{} {} is not a file, falling back to defaults",
            ICE_CONFIG_PATH_ENV,
            path.display()
        );
        return None;
    }
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Failed to read ICE config {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(update) => {
            info!("Loaded ICE config from {}", path.display());
            Some(update)
        }
        Err(e) => {
            warn!("Failed to parse ICE config {}: {}", path.display(), e);
            None
        }
    }
}

/// `1`, `true`, `yes` and `on` are true; anything else is false
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| AppError::Config(format!("Invalid {}={:?}: {}", key, value, e)))
}

fn apply_env<F>(config: &mut AppConfig, env: &F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let camera = &mut config.camera;
    if let Some(device) = env("CAMERA_DEVICE") {
        camera.device = Some(device).filter(|d| !d.is_empty());
    }
    if let Some(serial) = env("CAMERA_SERIAL") {
        camera.serial = Some(serial).filter(|s| !s.is_empty());
    }
    if let Some(v) = env("CAMERA_WIDTH") {
        camera.width = parse_env("CAMERA_WIDTH", &v)?;
    }
    if let Some(v) = env("CAMERA_HEIGHT") {
        camera.height = parse_env("CAMERA_HEIGHT", &v)?;
    }
    if let Some(v) = env("CAMERA_FPS") {
        camera.fps = parse_env("CAMERA_FPS", &v)?;
    }
    if let Some(v) = env("CAMERA_FORMAT") {
        camera.format = parse_env::<PixelFormat>("CAMERA_FORMAT", &v)?;
    }

    if let Some(host) = env("SERVICE_HOST").filter(|h| !h.is_empty()) {
        config.web.bind_address = host;
    }
    if let Some(v) = env("SERVICE_PORT") {
        config.web.http_port = parse_env("SERVICE_PORT", &v)?;
    }

    let mut ice = IceConfigUpdate::default();
    if let Some(raw) = env("TURN_URLS") {
        let urls: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(String::from)
            .collect();
        if !urls.is_empty() {
            ice.urls = Some(urls);
        }
    }
    ice.use_turn = env("USE_TURN").map(|v| parse_bool(&v));
    ice.username = env("TURN_USERNAME");
    ice.credential = env("TURN_CREDENTIAL");
    ice.relay_only = env("ICE_RELAY_ONLY").map(|v| parse_bool(&v));
    config.ice.merge(ice);

    Ok(())
}

/// Reject configurations the service cannot run with
pub fn validate(config: &AppConfig) -> Result<()> {
    let camera = &config.camera;
    if camera.width == 0 || camera.height == 0 || camera.fps == 0 {
        return Err(AppError::Config(format!(
            "Camera resolution and fps must be non-zero ({}x{} @ {})",
            camera.width, camera.height, camera.fps
        )));
    }
    if !camera.format.is_webrtc_payload() {
        return Err(AppError::Config(format!(
            "Camera format {} cannot be streamed without transcoding; use H264 or VP8",
            camera.format
        )));
    }
    if !config.web.proxy_prefix.is_empty() && !config.web.proxy_prefix.starts_with('/') {
        return Err(AppError::Config(format!(
            "proxy_prefix must start with '/' ({})",
            config.web.proxy_prefix
        )));
    }
    config.ice.validate()
}
