use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::click_strategies::{ActivationTarget, ClickChain, UnfocusableRegistry};
use crate::config::FlowConfig;
use crate::control::{interruptible_sleep, ExecutionControl};
use crate::element::UIElement;
use crate::errors::{AutomationError, FlowError};
use crate::events::{EventSink, LogLevel};
use crate::flow::{ActionType, Step};
use crate::helpers::{is_products_placeholder, substitute_variables};
use crate::keys::Key;
use crate::locator::{ElementResolver, RetryPolicy};
use crate::platforms::{blocking, AutomationSession};
use crate::selector::Selector;

const DEFAULT_WAIT: Duration = Duration::from_millis(2000);
const DOUBLE_CLICK_GAP: Duration = Duration::from_millis(100);
const COMBO_OPEN_SETTLE: Duration = Duration::from_secs(1);
const COMBO_RETRY_SETTLE: Duration = Duration::from_millis(500);
const COMBO_VALUE_ATTRIBUTE: &str = "Value.Value";

/// How a step ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Done,
    /// Completed with a best-effort fallback; the message says what was lost.
    Degraded(String),
    /// Nothing to do for this step.
    Skipped(String),
}

/// Performs the effect of a single step against the current session.
pub struct ActionDispatcher {
    session: Arc<dyn AutomationSession>,
    resolver: ElementResolver,
    click_chain: Arc<ClickChain>,
    registry: Arc<UnfocusableRegistry>,
    control: Arc<ExecutionControl>,
    events: Arc<dyn EventSink>,
}

impl ActionDispatcher {
    pub fn new(
        session: Arc<dyn AutomationSession>,
        click_chain: Arc<ClickChain>,
        registry: Arc<UnfocusableRegistry>,
        control: Arc<ExecutionControl>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            resolver: ElementResolver::new(session.clone()),
            session,
            click_chain,
            registry,
            control,
            events,
        }
    }

    pub fn resolver(&self) -> &ElementResolver {
        &self.resolver
    }

    pub fn session(&self) -> &Arc<dyn AutomationSession> {
        &self.session
    }

    /// Execute one step: honour pause and stop, apply the step delay,
    /// resolve the target element if the action has one, then act.
    #[instrument(level = "debug", skip_all, fields(action = %step.action_type, step = %step.label()))]
    pub async fn execute(
        &self,
        step: &Step,
        config: &FlowConfig,
        token: &CancellationToken,
    ) -> Result<ActionOutcome, FlowError> {
        self.control.checkpoint(token).await?;
        if config.step_delay > 0 {
            debug!("Waiting {}ms before step", config.step_delay);
            interruptible_sleep(token, config.step_delay()).await?;
        }

        let selector = step
            .selector()
            .map_err(|e| FlowError::InvalidStep(e.to_string()))?;

        let mut lookup_error = None;
        let element = match (&selector, step.action_type.targets_element()) {
            (Some(selector), true) => {
                match self
                    .resolver
                    .resolve(selector, &RetryPolicy::from_config(config), token)
                    .await
                {
                    Ok(element) => Some(element),
                    Err(e @ FlowError::ElementNotFound { .. }) => {
                        lookup_error = Some(e);
                        None
                    }
                    Err(e) => return Err(e),
                }
            }
            _ => None,
        };

        match step.action_type {
            ActionType::Click => {
                let element = require(element, lookup_error, selector.as_ref(), step)?;
                self.click(step, selector.as_ref(), &element, token).await
            }
            ActionType::DoubleClick => {
                let element = require(element, lookup_error, selector.as_ref(), step)?;
                self.double_click(&element, token).await
            }
            ActionType::Type => {
                let Some(element) = element else {
                    return Err(FlowError::FieldNotFound(describe(selector.as_ref(), step)));
                };
                let text = substitute_variables(step.value.as_deref().unwrap_or_default(), config);
                self.fill(&element, text).await?;
                Ok(ActionOutcome::Done)
            }
            ActionType::SendKeys => {
                let key = Key::parse(step.value.as_deref().unwrap_or_default());
                self.send_keys(element, key).await
            }
            ActionType::Wait => {
                let wait = step.wait_time.map(Duration::from_millis).unwrap_or(DEFAULT_WAIT);
                debug!("Waiting {:?}", wait);
                interruptible_sleep(token, wait).await?;
                Ok(ActionOutcome::Done)
            }
            ActionType::Clear => match element {
                Some(element) => {
                    self.call(move |s| s.clear(&element)).await?;
                    Ok(ActionOutcome::Done)
                }
                None => Ok(ActionOutcome::Skipped("nothing to clear".to_string())),
            },
            ActionType::SelectCombo => {
                let combo = non_empty(step.selector_value.as_deref())
                    .or_else(|| non_empty(config.combo_box_name.as_deref()))
                    .ok_or_else(|| FlowError::InvalidStep("No combo box name configured".into()))?;
                let option = non_empty(step.value.as_deref())
                    .or_else(|| non_empty(config.combo_box_option.as_deref()))
                    .ok_or_else(|| FlowError::InvalidStep("No combo box option configured".into()))?;
                self.select_combo(&combo, &option, config, token).await
            }
            ActionType::SelectRadio => {
                let radio = non_empty(step.selector_value.as_deref())
                    .or_else(|| non_empty(config.radio_button_name.as_deref()))
                    .ok_or_else(|| {
                        FlowError::InvalidStep("No radio button name configured".into())
                    })?;
                self.select_radio(&radio, config, token).await
            }
            ActionType::Scroll => match element {
                Some(element) => Ok(self.scroll(element).await),
                None => Ok(ActionOutcome::Skipped("nothing to scroll".to_string())),
            },
            ActionType::Assert => match element {
                Some(_) => Ok(ActionOutcome::Done),
                None => Err(FlowError::AssertionFailed(format!(
                    "{} is not present",
                    describe(selector.as_ref(), step)
                ))),
            },
            ActionType::SearchProduct => {
                let value = step.value.as_deref();
                match element {
                    Some(element) if !is_products_placeholder(value) => {
                        self.fill(&element, value.unwrap_or_default().to_string())
                            .await?;
                        Ok(ActionOutcome::Done)
                    }
                    None if !is_products_placeholder(value) => Err(FlowError::FieldNotFound(
                        describe(selector.as_ref(), step),
                    )),
                    _ => {
                        self.events.log(
                            LogLevel::Warning,
                            "search_product has no products and no value; skipping",
                        );
                        Ok(ActionOutcome::Skipped("no product to search".to_string()))
                    }
                }
            }
            ActionType::Unknown => Err(FlowError::InvalidStep(format!(
                "Unsupported action for step '{}'",
                step.label()
            ))),
        }
    }

    async fn call<T, F>(&self, f: F) -> Result<T, AutomationError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn AutomationSession) -> Result<T, AutomationError> + Send + 'static,
    {
        blocking(&self.session, f).await
    }

    async fn click(
        &self,
        step: &Step,
        selector: Option<&Selector>,
        element: &UIElement,
        token: &CancellationToken,
    ) -> Result<ActionOutcome, FlowError> {
        let Some(control) = selector.and_then(|s| self.registry.lookup(s)) else {
            let element = element.clone();
            self.call(move |s| s.click(&element)).await?;
            return Ok(ActionOutcome::Done);
        };

        info!("Using activation strategies for '{}'", control.label);
        let target = ActivationTarget {
            control,
            selector: selector.cloned(),
            description: step.label().to_string(),
        };
        match self.click_chain.activate(&self.session, &target, token).await {
            Ok(strategy) => {
                debug!("Activated with {}", strategy);
                Ok(ActionOutcome::Done)
            }
            Err(FlowError::ActivationExhausted(what)) => {
                warn!("All strategies failed for '{}'; falling back to plain click", what);
                let element = element.clone();
                self.call(move |s| s.click(&element)).await?;
                Ok(ActionOutcome::Degraded(format!(
                    "'{what}' activated with a plain click"
                )))
            }
            Err(e) => Err(e),
        }
    }

    async fn double_click(
        &self,
        element: &UIElement,
        token: &CancellationToken,
    ) -> Result<ActionOutcome, FlowError> {
        let scripted = {
            let element = element.clone();
            self.call(move |s| {
                s.script_click(&element)?;
                std::thread::sleep(DOUBLE_CLICK_GAP);
                s.script_click(&element)
            })
            .await
        };
        if let Err(e) = scripted {
            if matches!(e, AutomationError::SessionInvalid(_)) {
                return Err(e.into());
            }
            warn!("Scripted double click failed: {}; clicking directly", e);
            let first = element.clone();
            self.call(move |s| s.click(&first)).await?;
            interruptible_sleep(token, DOUBLE_CLICK_GAP).await?;
            let second = element.clone();
            self.call(move |s| s.click(&second)).await?;
        }
        Ok(ActionOutcome::Done)
    }

    /// Focus, clear, then type into a field.
    pub async fn fill(&self, element: &UIElement, text: String) -> Result<(), FlowError> {
        let element = element.clone();
        self.call(move |s| {
            if let Err(e) = s.focus(&element) {
                debug!("Focus failed, clicking instead: {}", e);
                s.click(&element)?;
            }
            s.clear(&element)?;
            s.send_text(&element, &text)
        })
        .await?;
        Ok(())
    }

    async fn send_keys(
        &self,
        element: Option<UIElement>,
        key: Key,
    ) -> Result<ActionOutcome, FlowError> {
        if let Some(element) = element {
            let code = key.webdriver_code();
            self.call(move |s| s.send_text(&element, &code)).await?;
            return Ok(ActionOutcome::Done);
        }

        warn!("No element for key {}; sending to the focused control", key);
        let code = key.webdriver_code();
        let active = self.call(move |s| s.send_keys_to_active(&code)).await;
        let Err(active_err) = active else {
            return Ok(ActionOutcome::Done);
        };
        if matches!(active_err, AutomationError::SessionInvalid(_)) {
            return Err(active_err.into());
        }

        warn!("Focused control rejected key {}: {}; injecting natively", key, active_err);
        let native = key.native_code();
        match self.call(move |s| s.inject_keys(&native)).await {
            Ok(()) => Ok(ActionOutcome::Done),
            Err(e @ AutomationError::SessionInvalid(_)) => Err(e.into()),
            Err(e) if key.is_non_critical() => {
                self.events.log(
                    LogLevel::Warning,
                    &format!("Key {key} could not be delivered ({e}); continuing"),
                );
                Ok(ActionOutcome::Degraded(format!("key {key} not sent")))
            }
            Err(e) => Err(FlowError::Automation(AutomationError::PlatformError(format!(
                "Could not send key {key} without a target element: {e}"
            )))),
        }
    }

    async fn select_combo(
        &self,
        combo_name: &str,
        option_name: &str,
        config: &FlowConfig,
        token: &CancellationToken,
    ) -> Result<ActionOutcome, FlowError> {
        let policy = RetryPolicy::from_config(config);
        let combo = self
            .resolver
            .resolve(&Selector::name(combo_name), &policy, token)
            .await?;
        {
            let combo = combo.clone();
            self.call(move |s| s.click(&combo)).await?;
        }
        interruptible_sleep(token, COMBO_OPEN_SETTLE).await?;

        let option = self
            .resolver
            .resolve(&Selector::name(option_name), &policy, token)
            .await?;
        {
            let option = option.clone();
            self.call(move |s| s.click(&option)).await?;
        }

        if self.combo_shows(&combo, option_name).await == Some(true) {
            info!("Option '{}' selected in '{}'", option_name, combo_name);
            return Ok(ActionOutcome::Done);
        }

        warn!("Selection of '{}' not confirmed; reopening '{}'", option_name, combo_name);
        {
            let combo = combo.clone();
            self.call(move |s| s.click(&combo)).await?;
        }
        interruptible_sleep(token, COMBO_RETRY_SETTLE).await?;
        {
            let option = option.clone();
            self.call(move |s| s.click(&option)).await?;
        }

        match self.combo_shows(&combo, option_name).await {
            Some(true) => Ok(ActionOutcome::Done),
            _ => {
                self.events.log(
                    LogLevel::Warning,
                    &format!("Could not verify '{option_name}' in '{combo_name}'; continuing"),
                );
                Ok(ActionOutcome::Degraded(format!(
                    "selection of '{option_name}' unverified"
                )))
            }
        }
    }

    /// `None` when the combo value cannot be read.
    async fn combo_shows(&self, combo: &UIElement, option: &str) -> Option<bool> {
        let combo = combo.clone();
        match self
            .call(move |s| s.attribute(&combo, COMBO_VALUE_ATTRIBUTE))
            .await
        {
            Ok(Some(value)) => Some(value == option || value.contains(option)),
            Ok(None) => None,
            Err(e) => {
                debug!("Could not read combo value: {}", e);
                None
            }
        }
    }

    /// Poll until the radio button appears and accepts a click. Only a stop
    /// request ends the wait.
    async fn select_radio(
        &self,
        radio_name: &str,
        config: &FlowConfig,
        token: &CancellationToken,
    ) -> Result<ActionOutcome, FlowError> {
        let selector = Selector::name(radio_name);
        let interval = config.radio_poll_interval();
        loop {
            self.control.checkpoint(token).await?;
            let attempt = {
                let selector = selector.clone();
                self.call(move |s| {
                    let radio = s.find_element(&selector, Duration::ZERO)?;
                    s.click(&radio)
                })
                .await
            };
            match attempt {
                Ok(()) => {
                    info!("Radio button '{}' selected", radio_name);
                    return Ok(ActionOutcome::Done);
                }
                Err(AutomationError::SessionInvalid(msg)) => {
                    return Err(FlowError::SessionInvalid(msg));
                }
                Err(e) => {
                    debug!("Radio button '{}' not available yet: {}", radio_name, e);
                    interruptible_sleep(token, interval).await?;
                }
            }
        }
    }

    async fn scroll(&self, element: UIElement) -> ActionOutcome {
        let result = self
            .call(move |s| match s.scroll_into_view(&element) {
                Ok(()) => Ok(()),
                Err(e) => {
                    debug!("scrollIntoView failed: {}; resetting scroll position", e);
                    s.reset_scroll(&element)
                }
            })
            .await;
        match result {
            Ok(()) => ActionOutcome::Done,
            Err(e) => {
                warn!("Scroll failed: {}", e);
                ActionOutcome::Degraded(format!("scroll failed: {e}"))
            }
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn describe(selector: Option<&Selector>, step: &Step) -> String {
    match selector {
        Some(selector) => selector.to_string(),
        None => step.label().to_string(),
    }
}

fn require(
    element: Option<UIElement>,
    lookup_error: Option<FlowError>,
    selector: Option<&Selector>,
    step: &Step,
) -> Result<UIElement, FlowError> {
    match (element, lookup_error) {
        (Some(element), _) => Ok(element),
        (None, Some(e)) => Err(e),
        (None, None) => Err(FlowError::InvalidStep(format!(
            "Step '{}' has no selector",
            describe(selector, step)
        ))),
    }
}
