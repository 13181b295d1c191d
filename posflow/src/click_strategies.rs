//! Activation strategies for controls that reject keyboard focus.
//!
//! Strategies run in a fixed order; the first one that reports success wins.
//! A strategy that returns `false` or errors is logged and the chain moves on
//! after a short settle delay.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::control::interruptible_sleep;
use crate::element::UIElement;
use crate::errors::{AutomationError, FlowError};
use crate::platforms::{blocking, AutomationSession, W3C_ELEMENT_KEY};
use crate::selector::{Selector, SelectorKind};

const STRATEGY_SETTLE_DELAY: Duration = Duration::from_millis(500);
const ALTERNATE_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);
const POST_CLICK_SETTLE: Duration = Duration::from_millis(500);
const FOCUS_SETTLE: Duration = Duration::from_millis(100);

/// Window-relative offsets from the bottom-right corner tried by the
/// coordinate strategy.
const COORDINATE_GUESSES: [(f64, f64); 3] = [(100.0, 50.0), (150.0, 80.0), (120.0, 100.0)];

/// A control known to ignore keyboard focus and plain clicks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnfocusableControl {
    /// Visible label, matched as a substring of the accessible name.
    pub label: String,
    pub automation_id: String,
    /// Substring of the automation id that identifies the control.
    pub id_fragment: String,
    #[serde(default = "default_control_type")]
    pub control_type: String,
    #[serde(default = "default_localized_control_type")]
    pub localized_control_type: String,
    /// Must match nothing after a successful blind coordinate click.
    #[serde(default)]
    pub post_condition_absent: Option<Selector>,
}

fn default_control_type() -> String {
    "Button".to_string()
}

fn default_localized_control_type() -> String {
    "button".to_string()
}

impl UnfocusableControl {
    /// The POS payment button: it only reacts to pointer input and closes
    /// the payment-methods dialog once accepted.
    pub fn payment_button() -> Self {
        Self {
            label: "Cobrar".to_string(),
            automation_id: "BtnCobro".to_string(),
            id_fragment: "Cobro".to_string(),
            control_type: default_control_type(),
            localized_control_type: default_localized_control_type(),
            post_condition_absent: Some(Selector::xpath("//*[@Name='Métodos de pago']")),
        }
    }

    /// Ad hoc entry for an AutomationId selector that is not registered.
    pub fn from_automation_id(id: &str) -> Self {
        Self {
            label: id.to_string(),
            automation_id: id.to_string(),
            id_fragment: id.to_string(),
            control_type: default_control_type(),
            localized_control_type: default_localized_control_type(),
            post_condition_absent: None,
        }
    }

    fn matches_value(&self, value: &str) -> bool {
        value == self.label
            || value.contains(&self.automation_id)
            || (!self.id_fragment.is_empty() && value.contains(&self.id_fragment))
    }

    fn matches_element(&self, name: &str, automation_id: &str, control_type: &str) -> bool {
        name.contains(&self.label)
            || (!self.id_fragment.is_empty() && automation_id.contains(&self.id_fragment))
            || (control_type
                .to_lowercase()
                .contains(&self.localized_control_type.to_lowercase())
                && name.contains(&self.label))
    }

    /// Alternate selectors, most specific first.
    fn alternate_selectors(&self) -> Vec<Selector> {
        let label = &self.label;
        let id = &self.automation_id;
        let fragment = &self.id_fragment;
        vec![
            Selector::name(label.clone()),
            Selector::xpath(format!("//*[@Name='{label}']")),
            Selector::xpath(format!("//*[contains(@Name, '{label}')]")),
            Selector::xpath(format!("//*[@AutomationId='{id}']")),
            Selector::xpath(format!("//*[contains(@AutomationId, '{fragment}')]")),
            Selector::xpath(format!(
                "//*[@ControlType='{}' and @Name='{label}']",
                self.control_type
            )),
        ]
    }
}

/// Registry of controls that need the strategy chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnfocusableRegistry {
    controls: Vec<UnfocusableControl>,
}

impl Default for UnfocusableRegistry {
    fn default() -> Self {
        Self {
            controls: vec![UnfocusableControl::payment_button()],
        }
    }
}

impl UnfocusableRegistry {
    pub fn new(controls: Vec<UnfocusableControl>) -> Self {
        Self { controls }
    }

    pub fn register(&mut self, control: UnfocusableControl) {
        self.controls.push(control);
    }

    /// The control a click step targets, if it needs the strategy chain.
    ///
    /// Registered controls are matched by label or automation id; any other
    /// AutomationId xpath gets an ad hoc entry.
    pub fn lookup(&self, selector: &Selector) -> Option<UnfocusableControl> {
        if let Some(control) = self
            .controls
            .iter()
            .find(|c| c.matches_value(&selector.value))
        {
            return Some(control.clone());
        }
        if selector.kind == SelectorKind::Xpath && selector.value.contains("AutomationId") {
            return selector
                .automation_id()
                .map(|id| UnfocusableControl::from_automation_id(&id));
        }
        None
    }
}

/// What a strategy is asked to activate.
#[derive(Debug, Clone)]
pub struct ActivationTarget {
    pub control: UnfocusableControl,
    /// The step's own selector, tried before the alternates.
    pub selector: Option<Selector>,
    pub description: String,
}

/// One way of activating a stubborn control.
///
/// `attempt` blocks on the driver and is run on the blocking pool.
pub trait ActivationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the strategy can run for this target at all.
    fn applies_to(&self, _target: &ActivationTarget) -> bool {
        true
    }

    fn attempt(
        &self,
        session: &dyn AutomationSession,
        target: &ActivationTarget,
    ) -> Result<bool, AutomationError>;
}

fn attr(session: &dyn AutomationSession, element: &UIElement, name: &str) -> String {
    session
        .attribute(element, name)
        .ok()
        .flatten()
        .unwrap_or_default()
}

/// Strategy 1: alternate selectors, native click.
pub struct AlternateSelectorStrategy;

impl ActivationStrategy for AlternateSelectorStrategy {
    fn name(&self) -> &'static str {
        "alternate_selectors"
    }

    fn attempt(
        &self,
        session: &dyn AutomationSession,
        target: &ActivationTarget,
    ) -> Result<bool, AutomationError> {
        let candidates = target
            .selector
            .iter()
            .cloned()
            .chain(target.control.alternate_selectors());
        for selector in candidates {
            match session.find_element(&selector, ALTERNATE_LOOKUP_TIMEOUT) {
                Ok(element) => match session.native_click(&element) {
                    Ok(()) => return Ok(true),
                    Err(e) => debug!("Native click via {} failed: {}", selector, e),
                },
                Err(e @ AutomationError::SessionInvalid(_)) => return Err(e),
                Err(_) => continue,
            }
        }
        Ok(false)
    }
}

/// Strategy 2: scan every element, match on attributes, then native,
/// scripted and plain click in turn.
pub struct AttributeScanStrategy;

impl ActivationStrategy for AttributeScanStrategy {
    fn name(&self) -> &'static str {
        "attribute_scan"
    }

    fn attempt(
        &self,
        session: &dyn AutomationSession,
        target: &ActivationTarget,
    ) -> Result<bool, AutomationError> {
        for element in session.find_elements(&Selector::xpath("//*"))? {
            let name = attr(session, &element, "Name");
            let automation_id = attr(session, &element, "AutomationId");
            let control_type = attr(session, &element, "LocalizedControlType");
            if !target
                .control
                .matches_element(&name, &automation_id, &control_type)
            {
                continue;
            }
            debug!("Attribute match: name='{}' id='{}'", name, automation_id);
            if session.native_click(&element).is_ok()
                || session.script_click(&element).is_ok()
                || session.click(&element).is_ok()
            {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Strategy 3: controls of the expected type whose label matches, clicked at
/// their centre.
pub struct ControlTypeStrategy;

impl ActivationStrategy for ControlTypeStrategy {
    fn name(&self) -> &'static str {
        "control_type_coordinates"
    }

    fn attempt(
        &self,
        session: &dyn AutomationSession,
        target: &ActivationTarget,
    ) -> Result<bool, AutomationError> {
        let selector = Selector::xpath(format!(
            "//*[@ControlType='{}']",
            target.control.control_type
        ));
        for element in session.find_elements(&selector)? {
            if !attr(session, &element, "Name").contains(&target.control.label) {
                continue;
            }
            let (x, y) = session.rect(&element)?.center();
            session.click_at(x, y)?;
            return Ok(true);
        }
        Ok(false)
    }
}

/// Strategy 4: walk controls by localized type, focus, then click.
pub struct TreeWalkStrategy;

impl ActivationStrategy for TreeWalkStrategy {
    fn name(&self) -> &'static str {
        "tree_walk"
    }

    fn attempt(
        &self,
        session: &dyn AutomationSession,
        target: &ActivationTarget,
    ) -> Result<bool, AutomationError> {
        let selector = Selector::xpath(format!(
            "//*[@LocalizedControlType='{}']",
            target.control.localized_control_type
        ));
        for element in session.find_elements(&selector)? {
            let name = attr(session, &element, "Name");
            if name.is_empty() || !name.contains(&target.control.label) {
                continue;
            }
            if let Err(e) = session.focus(&element) {
                debug!("Focus failed before click: {}", e);
            }
            std::thread::sleep(FOCUS_SETTLE);
            session.click(&element)?;
            return Ok(true);
        }
        Ok(false)
    }
}

/// Strategy 5: blind clicks near the bottom-right corner, each verified by
/// the control's post-condition.
pub struct CoordinateGuessStrategy;

impl ActivationStrategy for CoordinateGuessStrategy {
    fn name(&self) -> &'static str {
        "coordinate_guess"
    }

    fn applies_to(&self, target: &ActivationTarget) -> bool {
        target.control.post_condition_absent.is_some()
    }

    fn attempt(
        &self,
        session: &dyn AutomationSession,
        target: &ActivationTarget,
    ) -> Result<bool, AutomationError> {
        let Some(absent) = &target.control.post_condition_absent else {
            return Ok(false);
        };
        let size = session.window_size()?;
        for (dx, dy) in COORDINATE_GUESSES {
            let (x, y) = (size.width - dx, size.height - dy);
            if let Err(e) = session.click_at(x, y) {
                debug!("Click at ({}, {}) failed: {}", x, y, e);
                continue;
            }
            std::thread::sleep(POST_CLICK_SETTLE);
            if session.find_elements(absent)?.is_empty() {
                debug!("Post-condition satisfied after click at ({}, {})", x, y);
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Strategy 6: find and click through raw driver commands.
pub struct ScriptedCommandStrategy;

impl ActivationStrategy for ScriptedCommandStrategy {
    fn name(&self) -> &'static str {
        "scripted_command"
    }

    fn attempt(
        &self,
        session: &dyn AutomationSession,
        target: &ActivationTarget,
    ) -> Result<bool, AutomationError> {
        let found = session.execute_script(
            "windows: findElement",
            json!({ "using": "name", "value": target.control.label }),
        )?;
        let Some(id) = found
            .get(W3C_ELEMENT_KEY)
            .or_else(|| found.get("ELEMENT"))
            .and_then(Value::as_str)
        else {
            return Ok(false);
        };
        session.execute_script("windows: click", json!({ "elementId": id }))?;
        Ok(true)
    }
}

/// Ordered chain of activation strategies.
#[derive(Clone)]
pub struct ClickChain {
    strategies: Vec<Arc<dyn ActivationStrategy>>,
    settle_delay: Duration,
}

impl Default for ClickChain {
    fn default() -> Self {
        Self::standard()
    }
}

impl ClickChain {
    pub fn standard() -> Self {
        Self::with_strategies(vec![
            Arc::new(AlternateSelectorStrategy),
            Arc::new(AttributeScanStrategy),
            Arc::new(ControlTypeStrategy),
            Arc::new(TreeWalkStrategy),
            Arc::new(CoordinateGuessStrategy),
            Arc::new(ScriptedCommandStrategy),
        ])
    }

    pub fn with_strategies(strategies: Vec<Arc<dyn ActivationStrategy>>) -> Self {
        Self {
            strategies,
            settle_delay: STRATEGY_SETTLE_DELAY,
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run the strategies in order and return the name of the one that worked.
    #[instrument(level = "debug", skip_all, fields(target = %target.description))]
    pub async fn activate(
        &self,
        session: &Arc<dyn AutomationSession>,
        target: &ActivationTarget,
        token: &CancellationToken,
    ) -> Result<&'static str, FlowError> {
        let total = self.strategies.len();
        for (i, strategy) in self.strategies.iter().enumerate() {
            if token.is_cancelled() {
                return Err(FlowError::UserStopped);
            }
            let name = strategy.name();
            if !strategy.applies_to(target) {
                debug!("Strategy {} ({}) does not apply; skipping", i + 1, name);
                continue;
            }
            info!("Activation strategy {}/{}: {}", i + 1, total, name);

            let run = {
                let strategy = strategy.clone();
                let target = target.clone();
                blocking(session, move |s| strategy.attempt(s, &target)).await
            };
            match run {
                Ok(true) => {
                    info!("'{}' activated with strategy {}", target.description, name);
                    return Ok(name);
                }
                Ok(false) => debug!("Strategy {} found nothing to activate", name),
                Err(AutomationError::SessionInvalid(msg)) => {
                    return Err(FlowError::SessionInvalid(msg));
                }
                Err(e) => warn!("Strategy {} failed: {}", name, e),
            }

            if i + 1 < total {
                interruptible_sleep(token, self.settle_delay).await?;
            }
        }
        Err(FlowError::ActivationExhausted(target.description.clone()))
    }
}
