use posflow::{ExecutionState, Product};
use serde::{Deserialize, Serialize};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub session_connected: bool,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub state: ExecutionState,
    pub running: bool,
    pub awaiting_resolution: bool,
    pub loaded_products: usize,
}

/// Acknowledgement for stop / pause / resume / disconnect.
#[derive(Debug, Clone, Serialize)]
pub struct ControlResponse {
    pub status: String,
}

impl ControlResponse {
    pub fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoadProductsRequest {
    #[serde(default)]
    pub file_path: String,
}

/// Errors are reported in-band with a 200, as operator UIs expect.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum LoadProductsResponse {
    Success {
        products: Vec<Product>,
        count: usize,
    },
    Error {
        error: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ReconnectResponse {
    Success { session_connected: bool },
    Error { error: String },
}

// ============================================================================
// WebSocket Messages
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Pong,
    Error { message: String },
}
