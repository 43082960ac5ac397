use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use solocam::camera::{DeviceSupervisor, FrameSource, V4l2Backend};
use solocam::config::{self, loader::CONFIG_PATH_ENV, IceConfigStore};
use solocam::state::AppState;
use solocam::web;
use solocam::webrtc::{RtcTransport, WebRtcConfig, WebRtcStreamer};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// solocam command line arguments
#[derive(Parser, Debug)]
#[command(name = "solocam")]
#[command(version, about = "Single-viewer camera streaming over WebRTC", long_about = None)]
struct CliArgs {
    /// JSON config file
    #[arg(short = 'c', long, value_name = "FILE", env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides config)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Camera device node, e.g. /dev/video0 (overrides config)
    #[arg(short = 'd', long, value_name = "DEVICE")]
    device: Option<String>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Initialize logging with CLI arguments
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting solocam v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration, CLI flags take precedence
    let mut config = config::loader::load(args.config.as_deref())?;
    if let Some(address) = args.address {
        config.web.bind_address = address;
    }
    if let Some(port) = args.port {
        config.web.http_port = port;
    }
    if let Some(device) = args.device {
        config.camera.device = Some(device);
    }
    tracing::info!(
        "Camera: {}x{} @ {} fps, {}",
        config.camera.width,
        config.camera.height,
        config.camera.fps,
        config.camera.format
    );
    tracing::debug!("ICE config: {:?}", config.ice.redacted());

    // Camera
    let frames = Arc::new(FrameSource::new());
    let backend = Arc::new(V4l2Backend::new(config.camera.v4l2()));
    let supervisor = Arc::new(DeviceSupervisor::new(
        backend,
        frames,
        config.supervisor.to_supervisor_config(),
    ));

    // WebRTC
    let ice = IceConfigStore::new(config.ice.clone())?;
    let transport = Arc::new(RtcTransport::new(WebRtcConfig {
        gathering_timeout: config.session.gathering_timeout(),
        video_format: config.camera.format,
        nominal_fps: config.camera.fps,
        ..Default::default()
    }));
    let streamer = WebRtcStreamer::new(
        supervisor.clone(),
        transport,
        ice,
        config.session.idle_max_age(),
    );

    // Start capturing right away so the first viewer gets a warm camera
    supervisor.start();
    let reaper = streamer.spawn_reaper(config.session.reap_interval());

    let bind_addr: SocketAddr = format!("{}:{}", config.web.bind_address, config.web.http_port)
        .parse()
        .or_else(|_| {
            format!("[{}]:{}", config.web.bind_address, config.web.http_port).parse()
        })?;

    let state = AppState::new(config, supervisor, streamer);
    let app = web::create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("Starting HTTP server on {}", listener.local_addr()?);

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
    };

    let server = axum::serve(listener, app);
    tokio::select! {
        _ = shutdown_signal => {}
        result = async move { server.await } => {
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
            }
        }
    }

    reaper.abort();
    cleanup(&state).await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Initialize logging with the given level and verbosity
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    // Build filter string based on effective level
    let filter = match effective_level {
        LogLevel::Error => "solocam=error,tower_http=error,webrtc=error",
        LogLevel::Warn => "solocam=warn,tower_http=warn,webrtc=warn",
        LogLevel::Info => "solocam=info,tower_http=info,webrtc=warn",
        LogLevel::Verbose => "solocam=debug,tower_http=info,webrtc=warn",
        LogLevel::Debug => "solocam=debug,tower_http=debug,webrtc=info",
        LogLevel::Trace => "solocam=trace,tower_http=debug,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Release the viewer and the camera
async fn cleanup(state: &Arc<AppState>) {
    if let Some(id) = state.streamer.handle_force_release().await {
        tracing::info!("Closed viewer {}", id);
    }

    // Joining the supervisor thread blocks for up to one read timeout
    let supervisor = state.supervisor.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || supervisor.stop()).await {
        tracing::warn!("Failed to stop camera supervisor: {}", e);
    } else {
        tracing::info!("Camera supervisor stopped");
    }
}
