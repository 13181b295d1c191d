mod api;
mod flow_manager;
mod types;
mod utils;
mod websocket;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use posflow::AppiumConfig;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use flow_manager::FlowManager;

// Flows with inline product lists stay well below this.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(name = "posflow-server")]
#[command(about = "HTTP/WebSocket server running point-of-sale automation flows")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8000", env = "POSFLOW_PORT")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0", env = "POSFLOW_HOST")]
    host: String,

    /// Appium / WinAppDriver endpoint
    #[arg(long, default_value = "http://127.0.0.1:4723", env = "APPIUM_URL")]
    appium_url: String,

    /// Title of the POS window to attach to
    #[arg(long, default_value = "SimiPOS", env = "POS_WINDOW_TITLE")]
    window_title: String,

    /// Native window handle (hex) to attach to instead of searching by title
    #[arg(long, env = "POS_WINDOW_HANDLE")]
    window_handle: Option<String>,

    /// Executable to launch when no window is found
    #[arg(long, env = "POS_APP_PATH")]
    app_path: Option<String>,

    /// Enable CORS for all origins
    #[arg(long)]
    cors: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    utils::init_logging()?;

    info!("🚀 Starting posflow-server v{}", env!("CARGO_PKG_VERSION"));
    info!("🔧 Driver: {}", args.appium_url);
    info!("🔧 Window: {}", args.window_title);
    info!("🔧 CORS: {}", if args.cors { "enabled" } else { "disabled" });

    let appium = AppiumConfig {
        server_url: args.appium_url,
        app_path: args.app_path,
        window_title: Some(args.window_title),
        window_handle: args.window_handle,
        ..AppiumConfig::default()
    };
    let manager = Arc::new(FlowManager::new(appium)?);

    let mut app = Router::new()
        .route("/api/health", get(api::health))
        .route("/api/status", get(api::get_status))
        .route("/api/initialize", post(api::initialize))
        .route("/api/run-flow", post(api::run_flow))
        .route("/api/stop-flow", post(api::stop_flow))
        .route("/api/pause-flow", post(api::pause_flow))
        .route("/api/resume-flow", post(api::resume_flow))
        .route("/api/reconnect", post(api::reconnect))
        .route("/api/disconnect", post(api::disconnect))
        .route("/api/load-products-file", post(api::load_products_file))
        .route("/ws", get(websocket::websocket_handler))
        .with_state(manager)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http());

    if args.cors {
        app = app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("✅ Server listening on http://{}", addr);
    info!("📡 WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
