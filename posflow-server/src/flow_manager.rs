use anyhow::{Context, Result};
use posflow::{
    AppiumConfig, AppiumConnector, BroadcastEventBus, ExecutionContext, Flow, FlowEvent,
    FlowExecutor, FlowOutcome, SessionConnector,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Owns the single execution context shared by every HTTP and WebSocket
/// handler.
pub struct FlowManager {
    ctx: Arc<ExecutionContext>,
    executor: FlowExecutor,
    bus: BroadcastEventBus,
}

impl FlowManager {
    pub fn new(appium: AppiumConfig) -> Result<Self> {
        info!("🔧 Initializing FlowManager (driver: {})", appium.server_url);

        let connector: Arc<dyn SessionConnector> = Arc::new(
            AppiumConnector::new(appium).context("Failed to create Appium connector")?,
        );
        let bus = BroadcastEventBus::default();
        let ctx = Arc::new(
            ExecutionContext::new(Arc::new(bus.clone())).with_connector(connector),
        );

        Ok(Self {
            executor: FlowExecutor::new(ctx.clone()),
            ctx,
            bus,
        })
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.ctx
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.bus.subscribe()
    }

    /// Run a flow on its own task so a dropped HTTP request does not abort
    /// it; the caller still gets the outcome once the run ends.
    pub async fn run_flow(&self, flow: Flow) -> FlowOutcome {
        let executor = self.executor.clone();
        let name = flow.name.clone();
        match tokio::spawn(async move { executor.run(flow).await }).await {
            Ok(outcome) => {
                info!("🏁 Flow '{}' finished: {:?}", name, outcome.status);
                outcome
            }
            Err(e) => {
                error!("❌ Flow task for '{}' failed: {}", name, e);
                FlowOutcome::error(None, format!("Flow task failed: {e}"))
            }
        }
    }
}
