use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::config::FlowConfig;
use crate::errors::{AutomationError, FlowError};
use crate::selector::Selector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Click,
    DoubleClick,
    Type,
    SendKeys,
    Wait,
    Clear,
    SelectCombo,
    SelectRadio,
    Scroll,
    Assert,
    SearchProduct,
    #[serde(other)]
    Unknown,
}

impl ActionType {
    /// Actions that act on the element named by the step's selector and
    /// therefore resolve it before running.
    pub fn targets_element(&self) -> bool {
        matches!(
            self,
            ActionType::Click
                | ActionType::DoubleClick
                | ActionType::Type
                | ActionType::SendKeys
                | ActionType::Clear
                | ActionType::Assert
                | ActionType::Scroll
                | ActionType::SearchProduct
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Click => "click",
            ActionType::DoubleClick => "double_click",
            ActionType::Type => "type",
            ActionType::SendKeys => "send_keys",
            ActionType::Wait => "wait",
            ActionType::Clear => "clear",
            ActionType::SelectCombo => "select_combo",
            ActionType::SelectRadio => "select_radio",
            ActionType::Scroll => "scroll",
            ActionType::Assert => "assert",
            ActionType::SearchProduct => "search_product",
            ActionType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub action_type: ActionType,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Milliseconds, used by `wait` steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_time: Option<u64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Step {
    pub fn new(action_type: ActionType, description: impl Into<String>) -> Self {
        Self {
            action_type,
            description: description.into(),
            selector_type: None,
            selector_value: None,
            value: None,
            wait_time: None,
            enabled: true,
        }
    }

    pub fn with_selector(mut self, selector: &Selector) -> Self {
        self.selector_type = Some(selector.kind.as_str().to_string());
        self.selector_value = Some(selector.value.clone());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// The typed selector of this step, if it carries one.
    ///
    /// Without an explicit type the value is parsed as `kind:value`, an
    /// xpath, or a name.
    pub fn selector(&self) -> Result<Option<Selector>, AutomationError> {
        let value = match self.selector_value.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => v,
            _ => return Ok(None),
        };
        let selector = match self.selector_type.as_deref().map(str::trim) {
            Some(kind) if !kind.is_empty() => Selector::from_parts(kind, value)?,
            _ => value.parse()?,
        };
        Ok(Some(selector))
    }

    /// Replace the selector in place with an operator correction.
    pub fn apply_correction(&mut self, selector_type: Option<String>, selector_value: String) {
        if let Some(kind) = selector_type.filter(|k| !k.trim().is_empty()) {
            self.selector_type = Some(kind);
        }
        self.selector_value = Some(selector_value);
    }

    pub fn label(&self) -> &str {
        if self.description.is_empty() {
            self.action_type.as_str()
        } else {
            &self.description
        }
    }
}

/// An ordered list of steps plus the options they run with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<Step>,
    /// How many times the enabled steps are run back to back.
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Position in the enabled steps where the first iteration starts.
    #[serde(default)]
    pub start_from_step: usize,
    #[serde(default)]
    pub config: FlowConfig,
}

fn default_iterations() -> u32 {
    1
}

impl Flow {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            steps,
            iterations: 1,
            start_from_step: 0,
            config: FlowConfig::default(),
        }
    }

    /// The steps that take part in execution; disabled steps do not count
    /// toward indices.
    pub fn enabled_steps(&self) -> Vec<Step> {
        self.steps.iter().filter(|s| s.enabled).cloned().collect()
    }

    pub fn from_json(text: &str) -> Result<Self, FlowError> {
        serde_json::from_str(text).map_err(|e| FlowError::InvalidStep(format!("Invalid flow JSON: {e}")))
    }

    pub fn from_yaml(text: &str) -> Result<Self, FlowError> {
        serde_yaml::from_str(text).map_err(|e| FlowError::InvalidStep(format!("Invalid flow YAML: {e}")))
    }

    /// Load a flow file, choosing the format by extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            FlowError::InvalidStep(format!("Failed to read {}: {e}", path.display()))
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&text),
            _ => Self::from_json(&text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::SelectorKind;

    #[test]
    fn steps_default_to_enabled() {
        let step: Step = serde_json::from_str(r#"{"action_type":"click","description":"Pay"}"#).unwrap();
        assert!(step.enabled);
        assert_eq!(step.action_type, ActionType::Click);
    }

    #[test]
    fn unknown_actions_deserialize() {
        let step: Step = serde_json::from_str(r#"{"action_type":"teleport"}"#).unwrap();
        assert_eq!(step.action_type, ActionType::Unknown);
    }

    #[test]
    fn selector_is_built_from_parts() {
        let step: Step = serde_json::from_value(serde_json::json!({
            "action_type": "click",
            "selector_type": "accessibility_id",
            "selector_value": "BtnCobro"
        }))
        .unwrap();
        let selector = step.selector().unwrap().unwrap();
        assert_eq!(selector.kind, SelectorKind::AccessibilityId);

        let bare = Step::new(ActionType::Wait, "pause");
        assert!(bare.selector().unwrap().is_none());
    }

    #[test]
    fn correction_replaces_selector_in_place() {
        let mut step = Step::new(ActionType::Click, "Pay").with_selector(&Selector::name("Cobrar"));
        step.apply_correction(Some("xpath".into()), "//Button[@Name='Pagar']".into());
        let selector = step.selector().unwrap().unwrap();
        assert_eq!(selector, Selector::xpath("//Button[@Name='Pagar']"));
    }

    #[test]
    fn yaml_flows_load_with_defaults() {
        let flow = Flow::from_yaml(
            r#"
name: venta
steps:
  - action_type: search_product
    description: Agregar productos
  - action_type: click
    description: Cobrar
    selector_type: name
    selector_value: Cobrar
    enabled: false
config:
  payment_amount: "100"
"#,
        )
        .unwrap();
        assert_eq!(flow.iterations, 1);
        assert_eq!(flow.enabled_steps().len(), 1);
        assert_eq!(flow.config.payment_amount.as_deref(), Some("100"));
    }
}
