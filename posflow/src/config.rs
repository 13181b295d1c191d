use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::products::Product;
use crate::selector::Selector;

/// Named options that shape how a flow is executed.
///
/// Unknown keys are preserved in `extra` and can be referenced from `type`
/// steps with `{{name}}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Delay before each step, in milliseconds.
    #[serde(default)]
    pub step_delay: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Delay between resolver attempts, in milliseconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
    /// Presence wait of a single resolver attempt, in milliseconds.
    #[serde(default = "default_element_timeout")]
    pub element_timeout: u64,

    /// Accepted as a JSON string or number; kept as its text form.
    #[serde(default, deserialize_with = "string_or_number")]
    pub payment_amount: Option<String>,
    #[serde(default)]
    pub combo_box_name: Option<String>,
    #[serde(default)]
    pub combo_box_option: Option<String>,
    #[serde(default)]
    pub radio_button_name: Option<String>,
    #[serde(default = "default_radio_poll_interval")]
    pub radio_poll_interval: u64,

    #[serde(default)]
    pub products: Vec<Product>,
    /// Products drawn per batch; 0 means all of them.
    #[serde(default = "default_products_per_iteration")]
    pub products_per_iteration: usize,
    /// Settle delay after UI mutations, in milliseconds.
    #[serde(default = "default_settle_delay")]
    pub settle_delay: u64,
    /// Wait after submitting a product search, in milliseconds.
    #[serde(default = "default_product_load_delay")]
    pub product_load_delay: u64,
    #[serde(default)]
    pub batch: BatchSelectors,

    /// How long a failed step waits for an operator decision, in milliseconds.
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout: u64,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Number(serde_json::Number),
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(
        Option::<StringOrNumber>::deserialize(deserializer)?.map(|value| match value {
            StringOrNumber::String(text) => text,
            StringOrNumber::Number(number) => number.to_string(),
        }),
    )
}

fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    2000
}
fn default_element_timeout() -> u64 {
    5000
}
fn default_radio_poll_interval() -> u64 {
    2000
}
fn default_products_per_iteration() -> usize {
    10
}
fn default_settle_delay() -> u64 {
    500
}
fn default_product_load_delay() -> u64 {
    1000
}
fn default_recovery_timeout() -> u64 {
    300_000
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            step_delay: 0,
            retry_attempts: default_retry_attempts(),
            retry_delay: default_retry_delay(),
            element_timeout: default_element_timeout(),
            payment_amount: None,
            combo_box_name: None,
            combo_box_option: None,
            radio_button_name: None,
            radio_poll_interval: default_radio_poll_interval(),
            products: Vec::new(),
            products_per_iteration: default_products_per_iteration(),
            settle_delay: default_settle_delay(),
            product_load_delay: default_product_load_delay(),
            batch: BatchSelectors::default(),
            recovery_timeout: default_recovery_timeout(),
            extra: BTreeMap::new(),
        }
    }
}

impl FlowConfig {
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay)
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.element_timeout)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay)
    }

    pub fn product_load_delay(&self) -> Duration {
        Duration::from_millis(self.product_load_delay)
    }

    pub fn radio_poll_interval(&self) -> Duration {
        Duration::from_millis(self.radio_poll_interval)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout)
    }

    /// Value of a named option for `{{name}}` substitution.
    pub fn variable(&self, name: &str) -> Option<String> {
        match name {
            "payment_amount" => self.payment_amount.clone(),
            "combo_box_name" => self.combo_box_name.clone(),
            "combo_box_option" => self.combo_box_option.clone(),
            "radio_button_name" => self.radio_button_name.clone(),
            _ => self.extra.get(name).map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
        }
    }
}

/// Selectors used by the product batch sub-routine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSelectors {
    #[serde(default = "default_search_field")]
    pub search_field: Selector,
    #[serde(default = "default_add_button")]
    pub add_button: Selector,
    /// Accept button of stray modals and of the up-sell prompt.
    #[serde(default = "default_accept_button")]
    pub accept_button: Selector,
    #[serde(default = "default_upsell_prompt")]
    pub upsell_prompt: Selector,
    #[serde(default = "default_search_field_timeout")]
    pub search_field_timeout: u64,
    #[serde(default = "default_add_button_timeout")]
    pub add_button_timeout: u64,
    /// Short probe used for optional dialogs.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: u64,
}

fn default_search_field() -> Selector {
    Selector::name("Buscar producto")
}
fn default_add_button() -> Selector {
    Selector::name("Agregar")
}
fn default_accept_button() -> Selector {
    Selector::name("Aceptar")
}
fn default_upsell_prompt() -> Selector {
    Selector::xpath("//*[contains(@Name, 'Oportunidad') or contains(@Name, 'Recomendación')]")
}
fn default_search_field_timeout() -> u64 {
    10_000
}
fn default_add_button_timeout() -> u64 {
    5000
}
fn default_probe_timeout() -> u64 {
    1000
}

impl Default for BatchSelectors {
    fn default() -> Self {
        Self {
            search_field: default_search_field(),
            add_button: default_add_button(),
            accept_button: default_accept_button(),
            upsell_prompt: default_upsell_prompt(),
            search_field_timeout: default_search_field_timeout(),
            add_button_timeout: default_add_button_timeout(),
            probe_timeout: default_probe_timeout(),
        }
    }
}

impl BatchSelectors {
    pub fn search_field_timeout(&self) -> Duration {
        Duration::from_millis(self.search_field_timeout)
    }

    pub fn add_button_timeout(&self) -> Duration {
        Duration::from_millis(self.add_button_timeout)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout)
    }
}
