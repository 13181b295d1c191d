use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::config::FlowConfig;

static PLACEHOLDER_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\{\{\s*([a-zA-Z0-9_.-]+)\s*\}\}").ok());

/// Replace `{{name}}` placeholders with configuration values.
///
/// Unknown names are left untouched, except `payment_amount` which resolves
/// to an empty string when unset.
pub fn substitute_variables(text: &str, config: &FlowConfig) -> String {
    let Some(re) = PLACEHOLDER_RE.as_ref() else {
        return text.to_string();
    };
    re.replace_all(text, |caps: &Captures| {
        let name = &caps[1];
        match config.variable(name) {
            Some(value) => value,
            None if name == "payment_amount" => String::new(),
            None => caps[0].to_string(),
        }
    })
    .into_owned()
}

/// `true` for a step value that asks for the configured product list.
pub fn is_products_placeholder(value: Option<&str>) -> bool {
    match value.map(str::trim) {
        None | Some("") => true,
        Some(v) => v.replace(' ', "") == "{{products}}",
    }
}
