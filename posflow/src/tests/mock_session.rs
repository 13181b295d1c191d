//! Scripted in-memory session used by the unit tests.

use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::element::{Rect, UIElement, WindowSize};
use crate::errors::AutomationError;
use crate::platforms::{AutomationSession, SessionConnector, W3C_ELEMENT_KEY};
use crate::selector::Selector;

struct Presence {
    id: String,
    misses_remaining: u32,
}

#[derive(Default)]
struct MockState {
    present: HashMap<Selector, Presence>,
    many: HashMap<Selector, Vec<String>>,
    attributes: HashMap<(String, String), String>,
    rects: HashMap<String, Rect>,
    failing: HashSet<String>,
    lookups: Vec<Selector>,
    calls: Vec<String>,
    script_results: HashMap<String, Value>,
    dead: bool,
}

pub struct MockSession {
    state: Mutex<MockState>,
    window: WindowSize,
}

impl MockSession {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            window: WindowSize {
                width: 1024.0,
                height: 768.0,
            },
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn with_element(self, selector: Selector, id: &str) -> Self {
        self.with_element_after(selector, id, 0)
    }

    /// Element that only shows up after `misses` failed lookups.
    pub fn with_element_after(self, selector: Selector, id: &str, misses: u32) -> Self {
        self.add_element(selector, id, misses);
        self
    }

    pub fn add_element(&self, selector: Selector, id: &str, misses: u32) {
        self.state().present.insert(
            selector,
            Presence {
                id: id.to_string(),
                misses_remaining: misses,
            },
        );
    }

    pub fn remove_element(&self, selector: &Selector) {
        self.state().present.remove(selector);
    }

    pub fn with_elements(self, selector: Selector, ids: &[&str]) -> Self {
        self.state()
            .many
            .insert(selector, ids.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_attribute(self, id: &str, name: &str, value: &str) -> Self {
        self.state()
            .attributes
            .insert((id.to_string(), name.to_string()), value.to_string());
        self
    }

    pub fn with_rect(self, id: &str, rect: Rect) -> Self {
        self.state().rects.insert(id.to_string(), rect);
        self
    }

    pub fn with_script_result(self, script: &str, result: Value) -> Self {
        self.state().script_results.insert(script.to_string(), result);
        self
    }

    /// Make every call of the named operation fail.
    pub fn failing(self, op: &str) -> Self {
        self.state().failing.insert(op.to_string());
        self
    }

    pub fn kill(&self) {
        self.state().dead = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Number of recorded calls starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn lookups_of(&self, selector: &Selector) -> usize {
        self.state().lookups.iter().filter(|s| *s == selector).count()
    }

    fn record(&self, op: &str, detail: &str) -> Result<(), AutomationError> {
        let mut state = self.state();
        if state.dead {
            return Err(AutomationError::SessionInvalid("mock session closed".into()));
        }
        state.calls.push(format!("{op}:{detail}"));
        if state.failing.contains(op) {
            return Err(AutomationError::PlatformError(format!("{op} refused")));
        }
        Ok(())
    }
}

impl AutomationSession for MockSession {
    fn title(&self) -> Result<String, AutomationError> {
        if self.state().dead {
            return Err(AutomationError::SessionInvalid("mock session closed".into()));
        }
        Ok("SimiPOS".to_string())
    }

    fn find_element(
        &self,
        selector: &Selector,
        _timeout: Duration,
    ) -> Result<UIElement, AutomationError> {
        let mut state = self.state();
        if state.dead {
            return Err(AutomationError::SessionInvalid("mock session closed".into()));
        }
        state.lookups.push(selector.clone());
        match state.present.get_mut(selector) {
            Some(presence) if presence.misses_remaining == 0 => Ok(UIElement::new(&presence.id)),
            Some(presence) => {
                presence.misses_remaining -= 1;
                Err(AutomationError::ElementNotFound(selector.to_string()))
            }
            None => Err(AutomationError::ElementNotFound(selector.to_string())),
        }
    }

    fn find_elements(&self, selector: &Selector) -> Result<Vec<UIElement>, AutomationError> {
        let mut state = self.state();
        if state.dead {
            return Err(AutomationError::SessionInvalid("mock session closed".into()));
        }
        state.lookups.push(selector.clone());
        if let Some(ids) = state.many.get(selector) {
            return Ok(ids.iter().map(UIElement::new).collect());
        }
        Ok(state
            .present
            .get(selector)
            .filter(|p| p.misses_remaining == 0)
            .map(|p| vec![UIElement::new(&p.id)])
            .unwrap_or_default())
    }

    fn focused_element(&self) -> Result<UIElement, AutomationError> {
        self.record("focused", "")?;
        Ok(UIElement::new("focused"))
    }

    fn click(&self, element: &UIElement) -> Result<(), AutomationError> {
        self.record("click", element.id())
    }

    fn native_click(&self, element: &UIElement) -> Result<(), AutomationError> {
        self.record("native_click", element.id())
    }

    fn script_click(&self, element: &UIElement) -> Result<(), AutomationError> {
        self.record("script_click", element.id())
    }

    fn focus(&self, element: &UIElement) -> Result<(), AutomationError> {
        self.record("focus", element.id())
    }

    fn clear(&self, element: &UIElement) -> Result<(), AutomationError> {
        self.record("clear", element.id())
    }

    fn send_text(&self, element: &UIElement, text: &str) -> Result<(), AutomationError> {
        self.record("send_text", &format!("{}={}", element.id(), text))
    }

    fn send_keys_to_active(&self, keys: &str) -> Result<(), AutomationError> {
        self.record("active_keys", keys)
    }

    fn inject_keys(&self, keys: &str) -> Result<(), AutomationError> {
        self.record("inject_keys", keys)
    }

    fn attribute(
        &self,
        element: &UIElement,
        name: &str,
    ) -> Result<Option<String>, AutomationError> {
        Ok(self
            .state()
            .attributes
            .get(&(element.id().to_string(), name.to_string()))
            .cloned())
    }

    fn rect(&self, element: &UIElement) -> Result<Rect, AutomationError> {
        Ok(self
            .state()
            .rects
            .get(element.id())
            .copied()
            .unwrap_or_default())
    }

    fn window_size(&self) -> Result<WindowSize, AutomationError> {
        Ok(self.window)
    }

    fn click_at(&self, x: f64, y: f64) -> Result<(), AutomationError> {
        self.record("click_at", &format!("{x},{y}"))
    }

    fn execute_script(&self, script: &str, args: Value) -> Result<Value, AutomationError> {
        self.record("script", &format!("{script} {args}"))?;
        Ok(self
            .state()
            .script_results
            .get(script)
            .cloned()
            .unwrap_or(Value::Null))
    }
}

/// Element reference as a scripted command would return it.
pub fn element_json(id: &str) -> Value {
    json!({ W3C_ELEMENT_KEY: id })
}

/// Connector handing out a prepared session and counting connects.
pub struct MockConnector {
    session: Arc<MockSession>,
    pub connects: AtomicUsize,
    fail: bool,
}

impl MockConnector {
    pub fn new(session: Arc<MockSession>) -> Self {
        Self {
            session,
            connects: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            session: Arc::new(MockSession::new()),
            connects: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl SessionConnector for MockConnector {
    fn connect(&self) -> Result<Arc<dyn AutomationSession>, AutomationError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AutomationError::SessionInvalid("window not found".into()));
        }
        Ok(self.session.clone())
    }
}
