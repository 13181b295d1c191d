use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::AutomationError;

static AUTOMATION_ID_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"@?AutomationId\s*=\s*['"]([^'"]+)['"]"#).ok());

/// The lookup strategy a selector uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    /// Accessible name / label
    Name,
    Xpath,
    /// Driver element id
    Id,
    /// Native automation id (`AutomationId` on Windows)
    AccessibilityId,
    Css,
    ClassName,
}

impl SelectorKind {
    /// The W3C WebDriver `using` strategy string for this kind.
    pub fn webdriver_strategy(&self) -> &'static str {
        match self {
            SelectorKind::Name => "name",
            SelectorKind::Xpath => "xpath",
            SelectorKind::Id => "id",
            SelectorKind::AccessibilityId => "accessibility id",
            SelectorKind::Css => "css selector",
            SelectorKind::ClassName => "class name",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SelectorKind::Name => "name",
            SelectorKind::Xpath => "xpath",
            SelectorKind::Id => "id",
            SelectorKind::AccessibilityId => "accessibility_id",
            SelectorKind::Css => "css",
            SelectorKind::ClassName => "class_name",
        }
    }
}

impl fmt::Display for SelectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectorKind {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "name" => Ok(SelectorKind::Name),
            "xpath" => Ok(SelectorKind::Xpath),
            "id" => Ok(SelectorKind::Id),
            "accessibility_id" | "automation_id" => Ok(SelectorKind::AccessibilityId),
            "css" | "css_selector" => Ok(SelectorKind::Css),
            "class_name" | "class" => Ok(SelectorKind::ClassName),
            other => Err(AutomationError::InvalidSelector(format!(
                "Unknown selector type: '{other}'"
            ))),
        }
    }
}

/// Represents a way to locate a UI element: a lookup strategy plus its value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selector {
    pub kind: SelectorKind,
    pub value: String,
}

impl Selector {
    pub fn new(kind: SelectorKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn name(value: impl Into<String>) -> Self {
        Self::new(SelectorKind::Name, value)
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Self::new(SelectorKind::Xpath, value)
    }

    pub fn accessibility_id(value: impl Into<String>) -> Self {
        Self::new(SelectorKind::AccessibilityId, value)
    }

    /// Builds a selector from the loosely typed pair carried by a step.
    pub fn from_parts(kind: &str, value: &str) -> Result<Self, AutomationError> {
        if value.trim().is_empty() {
            return Err(AutomationError::InvalidSelector(
                "Selector value is empty".to_string(),
            ));
        }
        Ok(Self::new(kind.parse()?, value))
    }

    /// Extracts the automation identifier from an xpath of the shape
    /// `//*[@AutomationId='BtnCobro']`. Other selectors are opaque.
    pub fn automation_id(&self) -> Option<String> {
        match self.kind {
            SelectorKind::Xpath if self.value.contains("AutomationId") => AUTOMATION_ID_RE
                .as_ref()
                .and_then(|re| re.captures(&self.value))
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string()),
            SelectorKind::AccessibilityId => Some(self.value.clone()),
            _ => None,
        }
    }

    /// Alternate lookups tried after the primary lookup of an
    /// AutomationId xpath fails: accessibility id, then the exact attribute xpath.
    pub fn fallbacks(&self) -> Vec<Selector> {
        if self.kind != SelectorKind::Xpath {
            return Vec::new();
        }
        match self.automation_id() {
            Some(id) => vec![
                Selector::accessibility_id(id.clone()),
                Selector::xpath(format!("//*[@AutomationId='{id}']")),
            ],
            None => Vec::new(),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

impl FromStr for Selector {
    type Err = AutomationError;

    /// Parses `kind:value`. A bare value starting with `/` is an xpath,
    /// anything else without a known prefix is a name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AutomationError::InvalidSelector(
                "Empty selector".to_string(),
            ));
        }
        if s.starts_with('/') || s.starts_with('(') {
            return Ok(Selector::xpath(s));
        }
        if let Some((prefix, rest)) = s.split_once(':') {
            if let Ok(kind) = prefix.parse::<SelectorKind>() {
                return Selector::from_parts(kind.as_str(), rest);
            }
        }
        Ok(Selector::name(s))
    }
}
