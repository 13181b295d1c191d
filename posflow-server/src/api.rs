use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use posflow::products::load_product_file;
use posflow::{initialize as run_initialize, Flow, FlowError, FlowOutcome, InitReport, InitRequest};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::flow_manager::FlowManager;
use crate::types::{
    ControlResponse, HealthResponse, LoadProductsRequest, LoadProductsResponse,
    ReconnectResponse, StatusResponse,
};

// ============================================================================
// Error Handling
// ============================================================================

pub struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.0,
            Json(serde_json::json!({
                "status": "error",
                "error": self.1
            })),
        )
            .into_response()
    }
}

impl From<FlowError> for ApiError {
    fn from(err: FlowError) -> Self {
        let status = match err {
            FlowError::AlreadyRunning => StatusCode::CONFLICT,
            FlowError::InvalidStep(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, err.to_string())
    }
}

// ============================================================================
// Health Check
// ============================================================================

pub async fn health(State(manager): State<Arc<FlowManager>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        session_connected: manager.context().is_connected().await,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// Status
// ============================================================================

pub async fn get_status(State(manager): State<Arc<FlowManager>>) -> Json<StatusResponse> {
    let ctx = manager.context();
    Json(StatusResponse {
        state: ctx.state(),
        running: ctx.control().is_running(),
        awaiting_resolution: ctx.is_awaiting_resolution(),
        loaded_products: ctx.loaded_products().await.len(),
    })
}

// ============================================================================
// Initialization
// ============================================================================

pub async fn initialize(
    State(manager): State<Arc<FlowManager>>,
    Json(request): Json<InitRequest>,
) -> Json<InitReport> {
    info!("📥 POST /api/initialize");
    Json(run_initialize(manager.context(), &request).await)
}

// ============================================================================
// Flow Execution
// ============================================================================

pub async fn run_flow(
    State(manager): State<Arc<FlowManager>>,
    Json(flow): Json<Flow>,
) -> Result<Json<FlowOutcome>, ApiError> {
    info!(
        "📥 POST /api/run-flow - flow: {} ({} steps)",
        flow.name,
        flow.steps.len()
    );
    if manager.context().control().is_running() {
        return Err(FlowError::AlreadyRunning.into());
    }
    Ok(Json(manager.run_flow(flow).await))
}

pub async fn stop_flow(State(manager): State<Arc<FlowManager>>) -> Json<ControlResponse> {
    info!("📥 POST /api/stop-flow");
    manager.context().request_stop();
    Json(ControlResponse::new("stopped"))
}

pub async fn pause_flow(State(manager): State<Arc<FlowManager>>) -> Json<ControlResponse> {
    info!("📥 POST /api/pause-flow");
    manager.context().pause();
    Json(ControlResponse::new("paused"))
}

pub async fn resume_flow(State(manager): State<Arc<FlowManager>>) -> Json<ControlResponse> {
    info!("📥 POST /api/resume-flow");
    manager.context().resume();
    Json(ControlResponse::new("running"))
}

// ============================================================================
// Session
// ============================================================================

pub async fn reconnect(State(manager): State<Arc<FlowManager>>) -> Json<ReconnectResponse> {
    info!("📥 POST /api/reconnect");
    match manager.context().reconnect().await {
        Ok(_) => Json(ReconnectResponse::Success {
            session_connected: true,
        }),
        Err(e) => {
            warn!("Reconnect failed: {}", e);
            Json(ReconnectResponse::Error {
                error: e.to_string(),
            })
        }
    }
}

pub async fn disconnect(
    State(manager): State<Arc<FlowManager>>,
) -> Result<Json<ControlResponse>, ApiError> {
    info!("📥 POST /api/disconnect");
    let ctx = manager.context();
    if ctx.control().is_running() {
        return Err(ApiError(
            StatusCode::CONFLICT,
            "Cannot disconnect while a flow is running".to_string(),
        ));
    }
    ctx.disconnect().await;
    Ok(Json(ControlResponse::new("disconnected")))
}

// ============================================================================
// Products
// ============================================================================

pub async fn load_products_file(
    State(manager): State<Arc<FlowManager>>,
    Json(request): Json<LoadProductsRequest>,
) -> Json<LoadProductsResponse> {
    info!("📥 POST /api/load-products-file - {}", request.file_path);
    if request.file_path.trim().is_empty() {
        return Json(LoadProductsResponse::Error {
            error: "No file path provided".to_string(),
        });
    }

    let path = Path::new(&request.file_path).to_path_buf();
    let loaded = tokio::task::spawn_blocking(move || load_product_file(path))
        .await
        .map_err(|e| format!("Task join error: {e}"))
        .and_then(|result| result.map_err(|e| e.to_string()));

    match loaded {
        Ok(products) => {
            let count = products.len();
            manager.context().set_products(products.clone()).await;
            info!("✅ Loaded {} products", count);
            Json(LoadProductsResponse::Success { products, count })
        }
        Err(error) => {
            warn!("Failed to load products: {}", error);
            Json(LoadProductsResponse::Error { error })
        }
    }
}
