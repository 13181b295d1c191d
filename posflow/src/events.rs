use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::recovery::Resolution;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Notification pushed to operators.
///
/// Serialises to `{"type":"log","level":..,"message":..}` or
/// `{"type":"status","status":..,"data":{..}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEvent {
    Log { level: LogLevel, message: String },
    Status { status: String, data: Value },
}

impl FlowEvent {
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        FlowEvent::Log {
            level,
            message: message.into(),
        }
    }

    pub fn status(status: impl Into<String>, data: Value) -> Self {
        FlowEvent::Status {
            status: status.into(),
            data,
        }
    }

    pub fn status_name(&self) -> Option<&str> {
        match self {
            FlowEvent::Status { status, .. } => Some(status),
            FlowEvent::Log { .. } => None,
        }
    }
}

/// Describes a failed step to the operator who has to decide on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEvent {
    pub step_index: usize,
    #[serde(rename = "step_description")]
    pub description: String,
    #[serde(rename = "error")]
    pub error_message: String,
    pub selector_type: Option<String>,
    pub selector_value: Option<String>,
    pub action_type: String,
}

impl FailureEvent {
    pub fn to_event(&self) -> FlowEvent {
        FlowEvent::status(
            "step_failed",
            serde_json::to_value(self).unwrap_or(Value::Null),
        )
    }
}

/// Outbound side of the operator channel.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: FlowEvent);

    /// Mirror a log line to `tracing` and publish it.
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info | LogLevel::Success => info!("{}", message),
            LogLevel::Warning => warn!("{}", message),
            LogLevel::Error => error!("{}", message),
        }
        self.publish(FlowEvent::log(level, message));
    }

    fn status(&self, status: &str, data: Value) {
        self.publish(FlowEvent::status(status, data));
    }
}

/// Event channel backed by a tokio broadcast channel.
///
/// Publishing never blocks; with no subscribers the event is dropped.
#[derive(Clone)]
pub struct BroadcastEventBus {
    sender: broadcast::Sender<FlowEvent>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _rx) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for BroadcastEventBus {
    fn publish(&self, event: FlowEvent) {
        if self.sender.send(event).is_err() {
            debug!("No event subscribers; event dropped");
        }
    }
}

/// Messages accepted from operators.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    StepResponse(Resolution),
    Ping,
}

impl InboundMessage {
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str(text) {
            Ok(message) => Some(message),
            Err(e) => {
                debug!("Ignoring unrecognised message: {}", e);
                None
            }
        }
    }
}
