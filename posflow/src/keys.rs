use std::fmt;

/// Named keys understood by `send_keys` steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Enter,
    Tab,
    Escape,
    F5,
    Backspace,
    Delete,
    /// Anything outside the vocabulary is sent as literal text.
    Literal(String),
}

impl Key {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "enter" | "return" => Key::Enter,
            "tab" => Key::Tab,
            "escape" | "esc" => Key::Escape,
            "f5" => Key::F5,
            "backspace" => Key::Backspace,
            "delete" | "del" => Key::Delete,
            _ => Key::Literal(value.to_string()),
        }
    }

    /// WebDriver key code point (W3C `Keys` private-use range).
    pub fn webdriver_code(&self) -> String {
        match self {
            Key::Enter => "\u{E007}".to_string(),
            Key::Tab => "\u{E004}".to_string(),
            Key::Escape => "\u{E00C}".to_string(),
            Key::F5 => "\u{E035}".to_string(),
            Key::Backspace => "\u{E003}".to_string(),
            Key::Delete => "\u{E017}".to_string(),
            Key::Literal(text) => text.clone(),
        }
    }

    /// Brace form used by platform key injection (`{ENTER}`).
    pub fn native_code(&self) -> String {
        match self {
            Key::Enter => "{ENTER}".to_string(),
            Key::Tab => "{TAB}".to_string(),
            Key::Escape => "{ESC}".to_string(),
            Key::F5 => "{F5}".to_string(),
            Key::Backspace => "{BACKSPACE}".to_string(),
            Key::Delete => "{DELETE}".to_string(),
            Key::Literal(text) => text.clone(),
        }
    }

    /// Navigation keys whose delivery failure only warrants a warning.
    pub fn is_non_critical(&self) -> bool {
        matches!(self, Key::Enter | Key::Tab | Key::Escape)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Literal(text) => write!(f, "'{text}'"),
            other => write!(f, "{other:?}"),
        }
    }
}
