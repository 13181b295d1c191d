use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::actions::{ActionDispatcher, ActionOutcome};
use crate::batch::ProductBatch;
use crate::click_strategies::{ClickChain, UnfocusableRegistry};
use crate::config::FlowConfig;
use crate::control::{interruptible_sleep, ExecutionControl, ExecutionState, ExecutionStatus};
use crate::errors::FlowError;
use crate::events::{EventSink, FailureEvent, LogLevel};
use crate::flow::{ActionType, Flow, Step};
use crate::helpers::is_products_placeholder;
use crate::platforms::{self, blocking, AutomationSession, SessionConnector};
use crate::products::{select_products, Product};
use crate::recovery::{RecoveryCoordinator, Resolution, ResolutionAction, ResolutionSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Stopped,
    Error,
}

/// Result of a flow run as reported to the submitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowOutcome {
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps_executed: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FlowOutcome {
    pub fn completed(steps_executed: usize) -> Self {
        Self {
            status: OutcomeStatus::Completed,
            steps_executed: Some(steps_executed),
            failed_step: None,
            error: None,
        }
    }

    pub fn stopped(failed_step: usize, error: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Stopped,
            steps_executed: None,
            failed_step: Some(failed_step),
            error: Some(error.into()),
        }
    }

    pub fn error(failed_step: Option<usize>, error: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Error,
            steps_executed: None,
            failed_step,
            error: Some(error.into()),
        }
    }
}

/// Everything a run shares with the outside world: the session slot, the
/// control flags, the event channel and the pending recovery wait.
pub struct ExecutionContext {
    session: RwLock<Option<Arc<dyn AutomationSession>>>,
    connector: Option<Arc<dyn SessionConnector>>,
    products: RwLock<Vec<Product>>,
    control: Arc<ExecutionControl>,
    events: Arc<dyn EventSink>,
    recovery: RecoveryCoordinator,
    click_chain: Arc<ClickChain>,
    registry: Arc<UnfocusableRegistry>,
}

impl ExecutionContext {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            session: RwLock::new(None),
            connector: None,
            products: RwLock::new(Vec::new()),
            control: Arc::new(ExecutionControl::new()),
            recovery: RecoveryCoordinator::new(events.clone()),
            events,
            click_chain: Arc::new(ClickChain::standard()),
            registry: Arc::new(UnfocusableRegistry::default()),
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn SessionConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn with_session(self, session: Arc<dyn AutomationSession>) -> Self {
        Self {
            session: RwLock::new(Some(session)),
            ..self
        }
    }

    pub fn with_click_chain(mut self, chain: ClickChain) -> Self {
        self.click_chain = Arc::new(chain);
        self
    }

    pub fn with_registry(mut self, registry: UnfocusableRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn control(&self) -> &Arc<ExecutionControl> {
        &self.control
    }

    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    pub fn connector(&self) -> Option<&Arc<dyn SessionConnector>> {
        self.connector.as_ref()
    }

    pub async fn session(&self) -> Option<Arc<dyn AutomationSession>> {
        self.session.read().await.clone()
    }

    pub async fn set_session(&self, session: Arc<dyn AutomationSession>) {
        *self.session.write().await = Some(session);
    }

    /// Products loaded ahead of time, used when a flow brings none.
    pub async fn loaded_products(&self) -> Vec<Product> {
        self.products.read().await.clone()
    }

    pub async fn set_products(&self, products: Vec<Product>) {
        *self.products.write().await = products;
    }

    /// Build a fresh session through the connector and install it.
    #[instrument(level = "debug", skip(self))]
    pub async fn reconnect(&self) -> Result<Arc<dyn AutomationSession>, FlowError> {
        let connector = self.connector.as_ref().ok_or_else(|| {
            FlowError::SessionInvalid("No session connector configured".to_string())
        })?;
        self.events
            .log(LogLevel::Warning, "Reconnecting automation session...");

        let old = self.session.write().await.take();
        if let Some(old) = old {
            if let Err(e) = blocking(&old, |s| s.close()).await {
                warn!("Failed to close previous session: {}", e);
            }
        }

        match platforms::connect(connector).await {
            Ok(session) => {
                self.set_session(session.clone()).await;
                self.events
                    .log(LogLevel::Success, "Automation session reconnected");
                Ok(session)
            }
            Err(e) => {
                self.events
                    .log(LogLevel::Error, &format!("Reconnect failed: {e}"));
                Err(FlowError::SessionInvalid(e.to_string()))
            }
        }
    }

    /// Return a live session, probing with a real round trip and
    /// reconnecting once when the probe fails.
    pub async fn ensure_session(&self) -> Result<Arc<dyn AutomationSession>, FlowError> {
        if let Some(session) = self.session().await {
            if blocking(&session, |s| Ok(s.is_alive())).await.unwrap_or(false) {
                return Ok(session);
            }
            self.events.log(
                LogLevel::Warning,
                "Automation session expired; trying to reconnect",
            );
        }
        self.reconnect().await
    }

    /// Close and forget the current session. Returns `false` if there was none.
    pub async fn disconnect(&self) -> bool {
        let Some(session) = self.session.write().await.take() else {
            return false;
        };
        if let Err(e) = blocking(&session, |s| s.close()).await {
            warn!("Failed to close session: {}", e);
        }
        self.events.log(LogLevel::Info, "Automation session closed");
        true
    }

    /// Whether the installed session answers a round trip.
    pub async fn is_connected(&self) -> bool {
        match self.session().await {
            Some(session) => blocking(&session, |s| Ok(s.is_alive())).await.unwrap_or(false),
            None => false,
        }
    }

    pub fn request_stop(&self) {
        self.control.request_stop();
        self.events.log(LogLevel::Warning, "Stop requested");
    }

    pub fn pause(&self) {
        self.control.pause();
        self.events.status("execution", json!({ "state": "paused" }));
    }

    pub fn resume(&self) {
        self.control.resume();
        self.events.status("execution", json!({ "state": "running" }));
    }

    /// Hand an operator decision to the step waiting for one.
    /// Returns `false` if no step is waiting.
    pub fn deliver_resolution(&self, resolution: Resolution) -> bool {
        self.recovery.deliver(resolution)
    }

    pub fn is_awaiting_resolution(&self) -> bool {
        self.recovery.is_waiting()
    }

    pub fn state(&self) -> ExecutionState {
        self.control.snapshot()
    }

    fn dispatcher(&self, session: Arc<dyn AutomationSession>) -> ActionDispatcher {
        ActionDispatcher::new(
            session,
            self.click_chain.clone(),
            self.registry.clone(),
            self.control.clone(),
            self.events.clone(),
        )
    }
}

/// Runs flows step by step, negotiating failures with the operator.
#[derive(Clone)]
pub struct FlowExecutor {
    ctx: Arc<ExecutionContext>,
}

impl FlowExecutor {
    pub fn new(ctx: Arc<ExecutionContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.ctx
    }

    #[instrument(level = "info", skip_all, fields(flow = %flow.name))]
    pub async fn run(&self, flow: Flow) -> FlowOutcome {
        let _guard = match self.ctx.control.begin_run() {
            Ok(guard) => guard,
            Err(e) => return FlowOutcome::error(None, e.to_string()),
        };
        let token = self.ctx.control.token();
        let outcome = self.run_guarded(flow, &token).await;

        let (status, level) = match outcome.status {
            OutcomeStatus::Completed => (ExecutionStatus::Completed, LogLevel::Success),
            OutcomeStatus::Stopped => (ExecutionStatus::Stopped, LogLevel::Warning),
            OutcomeStatus::Error => (ExecutionStatus::Error, LogLevel::Error),
        };
        self.ctx.control.set_status(status);
        self.ctx.events.log(level, &format!("Flow finished: {:?}", outcome.status));
        self.ctx.events.status(
            "execution",
            serde_json::to_value(&outcome).unwrap_or_default(),
        );
        outcome
    }

    async fn run_guarded(&self, mut flow: Flow, token: &CancellationToken) -> FlowOutcome {
        let ctx = &self.ctx;
        ctx.events.status(
            "execution",
            json!({ "state": "running", "flow": flow.name }),
        );

        if let Err(e) = ctx.ensure_session().await {
            error!("No usable session: {}", e);
            return FlowOutcome::error(None, e.to_string());
        }

        if flow.config.products.is_empty() {
            flow.config.products = ctx.loaded_products().await;
        }
        let config = flow.config.clone();
        let mut steps = flow.enabled_steps();
        let total = steps.len();
        let iterations = flow.iterations.max(1);
        let mut executed = 0usize;

        ctx.events.log(
            LogLevel::Info,
            &format!(
                "Running flow '{}': {} steps, {} iteration(s)",
                flow.name, total, iterations
            ),
        );

        for iteration in 0..iterations {
            let mut index = if iteration == 0 {
                flow.start_from_step.min(total)
            } else {
                0
            };
            if iterations > 1 {
                ctx.events.log(
                    LogLevel::Info,
                    &format!("Iteration {}/{}", iteration + 1, iterations),
                );
            }
            // Products drawn for the current step; kept across retries.
            let mut selection: Option<Vec<Product>> = None;

            while index < total {
                ctx.control.set_index(index);
                if ctx.control.checkpoint(token).await.is_err() {
                    return FlowOutcome::stopped(index, "Execution stopped by user");
                }

                let step = steps[index].clone();
                info!("[STEP {}/{}] BEGIN {}", index + 1, total, step.label());
                ctx.events.status(
                    "step_started",
                    json!({
                        "step_index": index,
                        "step_description": step.description,
                        "action_type": step.action_type,
                    }),
                );

                let failure = match self.run_step(&step, &config, token, &mut selection).await {
                    Ok(outcome) => {
                        self.report_success(index, total, &step, &outcome);
                        index += 1;
                        executed += 1;
                        selection = None;
                        continue;
                    }
                    Err(e) if e.is_stop() => {
                        return FlowOutcome::stopped(index, e.to_string());
                    }
                    Err(e) => e,
                };

                if failure.is_session_invalid() {
                    if let Err(e) = ctx.reconnect().await {
                        warn!("Reconnect after session loss failed: {}", e);
                    }
                }

                ctx.control.set_status(ExecutionStatus::StepFailed);
                let event = FailureEvent {
                    step_index: index,
                    description: step.description.clone(),
                    error_message: failure.to_string(),
                    selector_type: step.selector_type.clone(),
                    selector_value: step.selector_value.clone(),
                    action_type: step.action_type.to_string(),
                };
                let resolution = ctx
                    .recovery
                    .await_resolution(&event, config.recovery_timeout(), token)
                    .await;
                ctx.control.set_status(if ctx.control.is_paused() {
                    ExecutionStatus::Paused
                } else {
                    ExecutionStatus::Running
                });

                match (resolution.source, resolution.action) {
                    (ResolutionSource::Timeout, _) => {
                        return FlowOutcome::error(
                            Some(index),
                            FlowError::RecoveryTimeout.to_string(),
                        );
                    }
                    (ResolutionSource::Cancelled, _) => {
                        return FlowOutcome::stopped(index, FlowError::UserStopped.to_string());
                    }
                    (_, ResolutionAction::Stop) => {
                        ctx.events
                            .log(LogLevel::Warning, &format!("Operator stopped at step {}", index + 1));
                        return FlowOutcome::stopped(index, failure.to_string());
                    }
                    (_, ResolutionAction::Retry) => {
                        if let Some((kind, value)) = resolution.correction() {
                            ctx.events.log(
                                LogLevel::Info,
                                &format!("Retrying step {} with selector '{}'", index + 1, value),
                            );
                            steps[index].apply_correction(kind, value);
                        } else {
                            ctx.events
                                .log(LogLevel::Info, &format!("Retrying step {}", index + 1));
                        }
                    }
                    (_, ResolutionAction::Skip) => {
                        ctx.events
                            .log(LogLevel::Warning, &format!("Skipping step {}", index + 1));
                        index += 1;
                        executed += 1;
                        selection = None;
                    }
                }
            }
        }

        FlowOutcome::completed(executed)
    }

    async fn run_step(
        &self,
        step: &Step,
        config: &FlowConfig,
        token: &CancellationToken,
        selection: &mut Option<Vec<Product>>,
    ) -> Result<ActionOutcome, FlowError> {
        let session = self
            .ctx
            .session()
            .await
            .ok_or_else(|| FlowError::SessionInvalid("No active session".to_string()))?;
        let dispatcher = self.ctx.dispatcher(session);

        let is_batch = step.action_type == ActionType::SearchProduct
            && !config.products.is_empty()
            && is_products_placeholder(step.value.as_deref());
        if !is_batch {
            return dispatcher.execute(step, config, token).await;
        }

        self.ctx.control.checkpoint(token).await?;
        interruptible_sleep(token, config.step_delay()).await?;
        let products = selection
            .get_or_insert_with(|| select_products(&config.products, config.products_per_iteration))
            .clone();
        ProductBatch::new(&dispatcher, &self.ctx.control, &self.ctx.events, config)
            .run(&products, token)
            .await?;
        Ok(ActionOutcome::Done)
    }

    fn report_success(&self, index: usize, total: usize, step: &Step, outcome: &ActionOutcome) {
        let (level, message) = match outcome {
            ActionOutcome::Done => (
                LogLevel::Success,
                format!("Step {}/{} done: {}", index + 1, total, step.label()),
            ),
            ActionOutcome::Degraded(note) => (
                LogLevel::Warning,
                format!("Step {}/{} done with warnings: {} ({})", index + 1, total, step.label(), note),
            ),
            ActionOutcome::Skipped(note) => (
                LogLevel::Warning,
                format!("Step {}/{} skipped: {} ({})", index + 1, total, step.label(), note),
            ),
        };
        self.ctx.events.log(level, &message);
    }
}
