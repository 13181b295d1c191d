use crate::element::{Rect, UIElement, WindowSize};
use crate::errors::AutomationError;
use crate::selector::Selector;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub mod appium;

pub use appium::{AppiumConfig, AppiumConnector, AppiumSession};

/// W3C WebDriver key under which element references travel in JSON payloads.
pub const W3C_ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// The common trait every automation backend must implement.
///
/// All methods block on the driver round trip; async callers go through
/// [`blocking`] so the runtime is never stalled.
pub trait AutomationSession: Send + Sync {
    /// Title of the application window. Used as the liveness probe.
    fn title(&self) -> Result<String, AutomationError>;

    /// Real round trip to the driver; a cached flag is not enough.
    fn is_alive(&self) -> bool {
        self.title().is_ok()
    }

    /// Find the first element matching the selector, polling up to `timeout`.
    fn find_element(
        &self,
        selector: &Selector,
        timeout: Duration,
    ) -> Result<UIElement, AutomationError>;

    /// All elements currently matching the selector (no waiting).
    fn find_elements(&self, selector: &Selector) -> Result<Vec<UIElement>, AutomationError>;

    /// The element that currently holds keyboard focus.
    fn focused_element(&self) -> Result<UIElement, AutomationError>;

    /// Plain driver click.
    fn click(&self, element: &UIElement) -> Result<(), AutomationError>;

    /// Click through the platform input stack (mouse move + press).
    fn native_click(&self, element: &UIElement) -> Result<(), AutomationError>;

    /// Click issued as a scripted command against the element.
    fn script_click(&self, element: &UIElement) -> Result<(), AutomationError>;

    fn focus(&self, element: &UIElement) -> Result<(), AutomationError>;

    fn clear(&self, element: &UIElement) -> Result<(), AutomationError>;

    fn send_text(&self, element: &UIElement, text: &str) -> Result<(), AutomationError>;

    /// Send keys to whatever control has focus.
    fn send_keys_to_active(&self, keys: &str) -> Result<(), AutomationError>;

    /// Platform key injection using the brace notation (`{ENTER}`).
    fn inject_keys(&self, keys: &str) -> Result<(), AutomationError>;

    fn attribute(&self, element: &UIElement, name: &str)
        -> Result<Option<String>, AutomationError>;

    fn rect(&self, element: &UIElement) -> Result<Rect, AutomationError>;

    fn window_size(&self) -> Result<WindowSize, AutomationError>;

    /// Click at window-relative coordinates.
    fn click_at(&self, x: f64, y: f64) -> Result<(), AutomationError>;

    /// Raw scripted-command escape hatch.
    fn execute_script(&self, script: &str, args: Value) -> Result<Value, AutomationError>;

    fn scroll_into_view(&self, element: &UIElement) -> Result<(), AutomationError> {
        self.execute_script(
            "arguments[0].scrollIntoView(true);",
            Value::Array(vec![element_reference(element)]),
        )
        .map(|_| ())
    }

    fn reset_scroll(&self, element: &UIElement) -> Result<(), AutomationError> {
        self.execute_script(
            "arguments[0].scrollTop = 0;",
            Value::Array(vec![element_reference(element)]),
        )
        .map(|_| ())
    }

    /// Release the driver session. Best-effort.
    fn close(&self) -> Result<(), AutomationError> {
        Ok(())
    }
}

/// Re-establishes an application session, rediscovering the window if needed.
pub trait SessionConnector: Send + Sync {
    /// Cheap reachability check of the driver, without creating a session.
    fn check_available(&self) -> Result<(), AutomationError> {
        Ok(())
    }

    fn connect(&self) -> Result<Arc<dyn AutomationSession>, AutomationError>;
}

/// JSON element reference understood by W3C drivers.
pub fn element_reference(element: &UIElement) -> Value {
    serde_json::json!({ W3C_ELEMENT_KEY: element.id() })
}

/// Run a blocking session call on the blocking pool.
pub async fn blocking<T, F>(
    session: &Arc<dyn AutomationSession>,
    f: F,
) -> Result<T, AutomationError>
where
    T: Send + 'static,
    F: FnOnce(&dyn AutomationSession) -> Result<T, AutomationError> + Send + 'static,
{
    let session = session.clone();
    tokio::task::spawn_blocking(move || f(session.as_ref()))
        .await
        .map_err(|e| AutomationError::PlatformError(format!("Task join error: {e}")))?
}

/// Run a blocking connector call on the blocking pool.
pub async fn connect(
    connector: &Arc<dyn SessionConnector>,
) -> Result<Arc<dyn AutomationSession>, AutomationError> {
    let connector = connector.clone();
    tokio::task::spawn_blocking(move || connector.connect())
        .await
        .map_err(|e| AutomationError::PlatformError(format!("Task join error: {e}")))?
}
