//! Session preparation ahead of flow runs: driver check, connect, clearing a
//! leftover order, and loading the product list.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::instrument;

use crate::errors::{AutomationError, FlowError};
use crate::events::LogLevel;
use crate::executor::ExecutionContext;
use crate::locator::ElementResolver;
use crate::platforms::blocking;
use crate::products::{load_product_file, Product};
use crate::selector::Selector;

const CLEAR_ORDER_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Deserialize)]
pub struct InitRequest {
    #[serde(default)]
    pub products_file: Option<String>,
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default = "default_clear_order")]
    pub clear_order: bool,
    /// Button that discards an order left open by a previous run.
    #[serde(default = "default_clear_order_button")]
    pub clear_order_button: Selector,
}

fn default_clear_order() -> bool {
    true
}

fn default_clear_order_button() -> Selector {
    Selector::name("Borrar pedido")
}

impl Default for InitRequest {
    fn default() -> Self {
        Self {
            products_file: None,
            products: Vec::new(),
            clear_order: default_clear_order(),
            clear_order_button: default_clear_order_button(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitStepReport {
    pub step: String,
    pub status: InitStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitReport {
    pub status: InitStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub results: Vec<InitStepReport>,
}

/// Run the preparation steps in order, stopping at the first failure.
/// Each step is announced on the event channel as an `init_step` status.
#[instrument(level = "info", skip_all)]
pub async fn initialize(ctx: &ExecutionContext, request: &InitRequest) -> InitReport {
    let mut results = Vec::new();

    macro_rules! step {
        ($id:expr, $body:expr) => {{
            announce(ctx, $id, "running", None);
            match $body {
                Ok((message, count)) => {
                    announce(ctx, $id, "success", Some(&message));
                    ctx.events().log(LogLevel::Success, &format!("{}: {}", $id, message));
                    results.push(InitStepReport {
                        step: $id.to_string(),
                        status: InitStatus::Success,
                        message: Some(message),
                        count,
                    });
                }
                Err(e) => {
                    let error = e.to_string();
                    announce(ctx, $id, "error", Some(&error));
                    ctx.events().log(LogLevel::Error, &format!("{} failed: {}", $id, error));
                    return InitReport {
                        status: InitStatus::Error,
                        step: Some($id.to_string()),
                        error: Some(error),
                        results,
                    };
                }
            }
        }};
    }

    step!("check_driver", check_driver(ctx).await);
    step!("connect", connect(ctx).await);
    if request.clear_order {
        step!("clear_order", clear_order(ctx, &request.clear_order_button).await);
    }
    step!("load_products", load_products(ctx, request).await);

    ctx.events()
        .log(LogLevel::Success, "Initialization complete; ready to run flows");
    InitReport {
        status: InitStatus::Success,
        step: None,
        error: None,
        results,
    }
}

fn announce(ctx: &ExecutionContext, step: &str, status: &str, message: Option<&str>) {
    ctx.events().status(
        "init_step",
        json!({ "step_id": step, "status": status, "message": message }),
    );
}

type StepResult = Result<(String, Option<usize>), FlowError>;

async fn check_driver(ctx: &ExecutionContext) -> StepResult {
    let Some(connector) = ctx.connector().cloned() else {
        return Ok(("no driver configured; using the installed session".to_string(), None));
    };
    tokio::task::spawn_blocking(move || connector.check_available())
        .await
        .map_err(|e| AutomationError::PlatformError(format!("Task join error: {e}")))??;
    Ok(("driver reachable".to_string(), None))
}

async fn connect(ctx: &ExecutionContext) -> StepResult {
    ctx.ensure_session().await?;
    Ok(("session connected".to_string(), None))
}

/// Best-effort: a missing button means there is no leftover order.
async fn clear_order(ctx: &ExecutionContext, button: &Selector) -> StepResult {
    let session = ctx
        .session()
        .await
        .ok_or_else(|| FlowError::SessionInvalid("No active session".to_string()))?;
    let resolver = ElementResolver::new(session.clone());
    match resolver.find_once(button, CLEAR_ORDER_TIMEOUT).await? {
        Some(element) => {
            blocking(&session, move |s| s.click(&element)).await?;
            Ok(("previous order cleared".to_string(), None))
        }
        None => {
            ctx.events()
                .log(LogLevel::Warning, "No previous order to clear; continuing");
            Ok(("nothing to clear".to_string(), None))
        }
    }
}

async fn load_products(ctx: &ExecutionContext, request: &InitRequest) -> StepResult {
    let products = if !request.products.is_empty() {
        request.products.clone()
    } else if let Some(path) = request.products_file.clone().filter(|p| !p.is_empty()) {
        tokio::task::spawn_blocking(move || load_product_file(path))
            .await
            .map_err(|e| AutomationError::PlatformError(format!("Task join error: {e}")))?
            .map_err(|e| FlowError::InvalidStep(e.to_string()))?
    } else {
        Vec::new()
    };
    let count = products.len();
    ctx.set_products(products).await;
    Ok((format!("{count} products loaded"), Some(count)))
}
