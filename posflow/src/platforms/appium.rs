//! W3C WebDriver client for an Appium Windows driver / WinAppDriver session.

use reqwest::blocking::Client;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use super::{element_reference, AutomationSession, SessionConnector, W3C_ELEMENT_KEY};
use crate::element::{Rect, UIElement, WindowSize};
use crate::errors::AutomationError;
use crate::keys::Key;
use crate::selector::{Selector, SelectorKind};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const DEFAULT_WINDOW_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// How to reach the driver and which application window to attach to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppiumConfig {
    /// Driver endpoint, e.g. `http://127.0.0.1:4723`
    pub server_url: String,
    /// Executable to launch when no running window is targeted.
    #[serde(default)]
    pub app_path: Option<String>,
    /// Title fragment used to rediscover the running application window.
    #[serde(default)]
    pub window_title: Option<String>,
    /// Native window handle (hex, `0x...`) to attach to directly.
    #[serde(default)]
    pub window_handle: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    60_000
}

impl Default for AppiumConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:4723".to_string(),
            app_path: None,
            window_title: Some("SimiPOS".to_string()),
            window_handle: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// One live driver session against one application window.
pub struct AppiumSession {
    client: Client,
    base_url: String,
    session_id: String,
    poll_interval: Duration,
}

impl AppiumSession {
    /// Create a new driver session with the given `appium:` capabilities.
    #[instrument(level = "debug", skip(client, capabilities))]
    pub fn create(
        client: Client,
        server_url: &str,
        capabilities: Value,
    ) -> Result<Self, AutomationError> {
        let base_url = server_url.trim_end_matches('/').to_string();
        let body = json!({ "capabilities": { "alwaysMatch": capabilities } });
        let value = send(&client, Method::POST, &format!("{base_url}/session"), Some(body))?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AutomationError::PlatformError(format!(
                    "Driver did not return a session id: {value}"
                ))
            })?
            .to_string();

        info!("Created driver session {}", session_id);
        Ok(Self {
            client,
            base_url,
            session_id,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, AutomationError> {
        let url = format!("{}/session/{}{}", self.base_url, self.session_id, path);
        send(&self.client, method, &url, body)
    }

    fn find_once(&self, selector: &Selector) -> Result<UIElement, AutomationError> {
        let value = self.command(
            Method::POST,
            "/element",
            Some(json!({
                "using": selector.kind.webdriver_strategy(),
                "value": selector.value,
            })),
        )?;
        parse_element(&value)
    }

    fn perform_actions(&self, actions: Value) -> Result<(), AutomationError> {
        self.command(Method::POST, "/actions", Some(json!({ "actions": actions })))?;
        // Release any keys/buttons still held by the input state.
        if let Err(e) = self.command(Method::DELETE, "/actions", None) {
            debug!("Failed to release input state: {}", e);
        }
        Ok(())
    }

    fn element_path(element: &UIElement, suffix: &str) -> String {
        format!("/element/{}{}", element.id(), suffix)
    }
}

impl AutomationSession for AppiumSession {
    fn title(&self) -> Result<String, AutomationError> {
        let value = self.command(Method::GET, "/title", None)?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    fn find_element(
        &self,
        selector: &Selector,
        timeout: Duration,
    ) -> Result<UIElement, AutomationError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.find_once(selector) {
                Ok(element) => return Ok(element),
                Err(AutomationError::ElementNotFound(msg)) => {
                    if Instant::now() >= deadline {
                        return Err(AutomationError::ElementNotFound(format!(
                            "{selector} not found within {timeout:?}: {msg}"
                        )));
                    }
                    std::thread::sleep(self.poll_interval);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn find_elements(&self, selector: &Selector) -> Result<Vec<UIElement>, AutomationError> {
        let value = self.command(
            Method::POST,
            "/elements",
            Some(json!({
                "using": selector.kind.webdriver_strategy(),
                "value": selector.value,
            })),
        )?;
        match value {
            Value::Array(items) => items.iter().map(parse_element).collect(),
            other => Err(AutomationError::PlatformError(format!(
                "Unexpected find_elements response: {other}"
            ))),
        }
    }

    fn focused_element(&self) -> Result<UIElement, AutomationError> {
        let value = self.command(Method::GET, "/element/active", None)?;
        parse_element(&value)
    }

    fn click(&self, element: &UIElement) -> Result<(), AutomationError> {
        self.command(
            Method::POST,
            &Self::element_path(element, "/click"),
            Some(json!({})),
        )
        .map(|_| ())
    }

    fn native_click(&self, element: &UIElement) -> Result<(), AutomationError> {
        self.perform_actions(json!([{
            "type": "pointer",
            "id": "mouse",
            "parameters": { "pointerType": "mouse" },
            "actions": [
                { "type": "pointerMove", "duration": 0, "origin": element_reference(element), "x": 0, "y": 0 },
                { "type": "pointerDown", "button": 0 },
                { "type": "pause", "duration": 50 },
                { "type": "pointerUp", "button": 0 }
            ]
        }]))
    }

    fn script_click(&self, element: &UIElement) -> Result<(), AutomationError> {
        self.execute_script("windows: click", json!({ "elementId": element.id() }))
            .map(|_| ())
    }

    fn focus(&self, element: &UIElement) -> Result<(), AutomationError> {
        match self.execute_script("windows: setFocus", json!({ "elementId": element.id() })) {
            Ok(_) => Ok(()),
            Err(AutomationError::UnsupportedOperation(_)) => self.click(element),
            Err(e) => Err(e),
        }
    }

    fn clear(&self, element: &UIElement) -> Result<(), AutomationError> {
        self.command(
            Method::POST,
            &Self::element_path(element, "/clear"),
            Some(json!({})),
        )
        .map(|_| ())
    }

    fn send_text(&self, element: &UIElement, text: &str) -> Result<(), AutomationError> {
        let chars: Vec<String> = text.chars().map(|c| c.to_string()).collect();
        self.command(
            Method::POST,
            &Self::element_path(element, "/value"),
            Some(json!({ "text": text, "value": chars })),
        )
        .map(|_| ())
    }

    fn send_keys_to_active(&self, keys: &str) -> Result<(), AutomationError> {
        let active = self.focused_element()?;
        self.send_text(&active, keys)
    }

    fn inject_keys(&self, keys: &str) -> Result<(), AutomationError> {
        let mut actions = Vec::new();
        for code in expand_native_keys(keys) {
            actions.push(json!({ "type": "keyDown", "value": code }));
            actions.push(json!({ "type": "keyUp", "value": code }));
        }
        if actions.is_empty() {
            return Err(AutomationError::InvalidArgument(
                "No keys to inject".to_string(),
            ));
        }
        self.perform_actions(json!([{
            "type": "key",
            "id": "keyboard",
            "actions": actions
        }]))
    }

    fn attribute(
        &self,
        element: &UIElement,
        name: &str,
    ) -> Result<Option<String>, AutomationError> {
        let value = self.command(
            Method::GET,
            &Self::element_path(element, &format!("/attribute/{name}")),
            None,
        )?;
        Ok(match value {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        })
    }

    fn rect(&self, element: &UIElement) -> Result<Rect, AutomationError> {
        let value = self.command(Method::GET, &Self::element_path(element, "/rect"), None)?;
        serde_json::from_value(value)
            .map_err(|e| AutomationError::PlatformError(format!("Invalid rect response: {e}")))
    }

    fn window_size(&self) -> Result<WindowSize, AutomationError> {
        let value = self.command(Method::GET, "/window/rect", None)?;
        serde_json::from_value(value)
            .map_err(|e| AutomationError::PlatformError(format!("Invalid window rect: {e}")))
    }

    fn click_at(&self, x: f64, y: f64) -> Result<(), AutomationError> {
        self.perform_actions(json!([{
            "type": "pointer",
            "id": "mouse",
            "parameters": { "pointerType": "mouse" },
            "actions": [
                { "type": "pointerMove", "duration": 0, "origin": "viewport", "x": x.round() as i64, "y": y.round() as i64 },
                { "type": "pointerDown", "button": 0 },
                { "type": "pause", "duration": 50 },
                { "type": "pointerUp", "button": 0 }
            ]
        }]))
    }

    fn execute_script(&self, script: &str, args: Value) -> Result<Value, AutomationError> {
        let args = match args {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        };
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
    }

    fn close(&self) -> Result<(), AutomationError> {
        let url = format!("{}/session/{}", self.base_url, self.session_id);
        send(&self.client, Method::DELETE, &url, None).map(|_| ())
    }
}

/// Creates application sessions from an [`AppiumConfig`].
///
/// When a window title is configured, each `connect` rediscovers the window
/// through a desktop-root session, so a restarted application is picked up.
pub struct AppiumConnector {
    config: AppiumConfig,
    client: Client,
}

impl AppiumConnector {
    pub fn new(config: AppiumConfig) -> Result<Self, AutomationError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| AutomationError::PlatformError(format!("HTTP client error: {e}")))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &AppiumConfig {
        &self.config
    }

    fn base_capabilities() -> serde_json::Map<String, Value> {
        let mut caps = serde_json::Map::new();
        caps.insert("platformName".into(), json!("Windows"));
        caps.insert("appium:automationName".into(), json!("Windows"));
        caps.insert("appium:deviceName".into(), json!("WindowsPC"));
        caps
    }

    /// Finds the top-level window whose name contains `title` and returns
    /// its native handle formatted as hex.
    #[instrument(level = "debug", skip(self))]
    fn discover_window_handle(&self, title: &str) -> Result<String, AutomationError> {
        let mut caps = Self::base_capabilities();
        caps.insert("appium:app".into(), json!("Root"));
        let root = AppiumSession::create(
            self.client.clone(),
            &self.config.server_url,
            Value::Object(caps),
        )?;

        let lookup = (|| -> Result<String, AutomationError> {
            let window = root.find_element(
                &Selector::new(
                    SelectorKind::Xpath,
                    format!("//Window[contains(@Name, '{title}')]"),
                ),
                DEFAULT_WINDOW_LOOKUP_TIMEOUT,
            )?;
            let raw = root
                .attribute(&window, "NativeWindowHandle")?
                .ok_or_else(|| {
                    AutomationError::PlatformError(format!(
                        "Window '{title}' has no native handle"
                    ))
                })?;
            let handle: i64 = raw.trim().parse().map_err(|e| {
                AutomationError::PlatformError(format!("Invalid window handle '{raw}': {e}"))
            })?;
            Ok(format!("{handle:#x}"))
        })();

        if let Err(e) = root.close() {
            warn!("Failed to close root session: {}", e);
        }
        lookup
    }
}

impl SessionConnector for AppiumConnector {
    fn check_available(&self) -> Result<(), AutomationError> {
        let url = format!("{}/status", self.config.server_url.trim_end_matches('/'));
        send(&self.client, Method::GET, &url, None).map(|_| ())
    }

    fn connect(&self) -> Result<Arc<dyn AutomationSession>, AutomationError> {
        let mut caps = Self::base_capabilities();

        if let Some(handle) = &self.config.window_handle {
            caps.insert("appium:appTopLevelWindow".into(), json!(handle));
        } else if let Some(title) = &self.config.window_title {
            let handle = self.discover_window_handle(title)?;
            info!("Found window '{}' with handle {}", title, handle);
            caps.insert("appium:appTopLevelWindow".into(), json!(handle));
        } else if let Some(app) = &self.config.app_path {
            caps.insert("appium:app".into(), json!(app));
        } else {
            return Err(AutomationError::InvalidArgument(
                "Either a window handle, a window title or an app path is required".to_string(),
            ));
        }

        let session = AppiumSession::create(
            self.client.clone(),
            &self.config.server_url,
            Value::Object(caps),
        )?;
        Ok(Arc::new(session))
    }
}

fn send(
    client: &Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, AutomationError> {
    debug!("{} {}", method, url);
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }
    let response = request.send().map_err(|e| {
        if e.is_connect() {
            AutomationError::SessionInvalid(format!("Driver unreachable: {e}"))
        } else if e.is_timeout() {
            AutomationError::Timeout(format!("Driver request timed out: {e}"))
        } else {
            AutomationError::PlatformError(format!("Driver request failed: {e}"))
        }
    })?;

    let status = response.status();
    let payload: Value = response
        .json()
        .map_err(|e| AutomationError::PlatformError(format!("Invalid driver response: {e}")))?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);

    if let Some(error) = value.get("error").and_then(Value::as_str) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(map_webdriver_error(error, message));
    }
    if !status.is_success() {
        return Err(AutomationError::PlatformError(format!(
            "Driver returned HTTP {status}: {value}"
        )));
    }
    Ok(value)
}

/// Maps W3C error codes onto [`AutomationError`].
fn map_webdriver_error(code: &str, message: String) -> AutomationError {
    match code {
        "no such element" | "stale element reference" => AutomationError::ElementNotFound(message),
        "invalid session id" | "no such window" | "session not created" => {
            AutomationError::SessionInvalid(message)
        }
        "invalid selector" => AutomationError::InvalidSelector(message),
        "timeout" | "script timeout" => AutomationError::Timeout(message),
        "unknown command" | "unknown method" | "unsupported operation" => {
            AutomationError::UnsupportedOperation(message)
        }
        "invalid argument" => AutomationError::InvalidArgument(message),
        other => AutomationError::PlatformError(format!("{other}: {message}")),
    }
}

fn parse_element(value: &Value) -> Result<UIElement, AutomationError> {
    value
        .get(W3C_ELEMENT_KEY)
        .or_else(|| value.get("ELEMENT"))
        .and_then(Value::as_str)
        .map(UIElement::new)
        .ok_or_else(|| {
            AutomationError::PlatformError(format!("Response is not an element: {value}"))
        })
}

/// Expands brace notation (`{ENTER}abc{TAB}`) into WebDriver key code points.
fn expand_native_keys(keys: &str) -> Vec<String> {
    let mut codes = Vec::new();
    let mut rest = keys;
    while !rest.is_empty() {
        if let Some(stripped) = rest.strip_prefix('{') {
            if let Some(end) = stripped.find('}') {
                let name = &stripped[..end];
                match Key::parse(name) {
                    Key::Literal(_) => codes.extend(name.chars().map(|c| c.to_string())),
                    key => codes.push(key.webdriver_code()),
                }
                rest = &stripped[end + 1..];
                continue;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            codes.push(c.to_string());
        }
        rest = chars.as_str();
    }
    codes
}
