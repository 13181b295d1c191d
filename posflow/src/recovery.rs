use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::events::{EventSink, FailureEvent, LogLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionAction {
    Retry,
    Skip,
    /// Unknown or missing actions mean stop.
    #[default]
    #[serde(other)]
    Stop,
}

/// Where a resolution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionSource {
    #[default]
    Operator,
    /// Nobody answered within the recovery window.
    Timeout,
    /// The run was stopped while waiting.
    Cancelled,
}

/// An operator decision about a failed step.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Resolution {
    #[serde(default)]
    pub action: ResolutionAction,
    #[serde(default)]
    pub selector_type: Option<String>,
    #[serde(default)]
    pub selector_value: Option<String>,
    #[serde(skip)]
    pub source: ResolutionSource,
}

impl Resolution {
    pub fn retry() -> Self {
        Self {
            action: ResolutionAction::Retry,
            ..Default::default()
        }
    }

    pub fn retry_with(selector_type: impl Into<String>, selector_value: impl Into<String>) -> Self {
        Self {
            action: ResolutionAction::Retry,
            selector_type: Some(selector_type.into()),
            selector_value: Some(selector_value.into()),
            source: ResolutionSource::Operator,
        }
    }

    pub fn skip() -> Self {
        Self {
            action: ResolutionAction::Skip,
            ..Default::default()
        }
    }

    pub fn stop() -> Self {
        Self::default()
    }

    fn implicit_stop(source: ResolutionSource) -> Self {
        Self {
            source,
            ..Default::default()
        }
    }

    /// The corrected selector carried by a retry, if any.
    pub fn correction(&self) -> Option<(Option<String>, String)> {
        if self.action != ResolutionAction::Retry {
            return None;
        }
        self.selector_value
            .as_ref()
            .filter(|v| !v.trim().is_empty())
            .map(|v| (self.selector_type.clone(), v.clone()))
    }
}

/// Suspends a failed step until an operator decides what to do with it.
///
/// At most one wait is outstanding; the pending sender is never held across
/// an await point.
pub struct RecoveryCoordinator {
    pending: Mutex<Option<oneshot::Sender<Resolution>>>,
    events: Arc<dyn EventSink>,
}

impl RecoveryCoordinator {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            pending: Mutex::new(None),
            events,
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<oneshot::Sender<Resolution>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_waiting(&self) -> bool {
        self.slot().is_some()
    }

    /// Publish the failure and wait for a resolution, a stop, or the timeout.
    #[instrument(level = "debug", skip(self, event, stop), fields(step = event.step_index))]
    pub async fn await_resolution(
        &self,
        event: &FailureEvent,
        timeout: Duration,
        stop: &CancellationToken,
    ) -> Resolution {
        let (tx, rx) = oneshot::channel();
        if self.slot().replace(tx).is_some() {
            warn!("Replaced a stale pending resolution");
        }

        // The waiter is installed before the event goes out so a fast reply
        // cannot be lost.
        self.events.publish(event.to_event());
        self.events.log(
            LogLevel::Error,
            &format!(
                "Step {} failed ({}): {}. Waiting for operator decision...",
                event.step_index + 1,
                event.description,
                event.error_message
            ),
        );

        let resolution = tokio::select! {
            received = rx => match received {
                Ok(resolution) => Resolution {
                    source: ResolutionSource::Operator,
                    ..resolution
                },
                Err(_) => Resolution::implicit_stop(ResolutionSource::Cancelled),
            },
            _ = stop.cancelled() => {
                debug!("Stop requested while waiting for operator");
                Resolution::implicit_stop(ResolutionSource::Cancelled)
            }
            _ = tokio::time::sleep(timeout) => {
                self.events.log(
                    LogLevel::Error,
                    &format!(
                        "No operator response for step {} within {}s; stopping",
                        event.step_index + 1,
                        timeout.as_secs()
                    ),
                );
                Resolution::implicit_stop(ResolutionSource::Timeout)
            }
        };

        self.slot().take();
        resolution
    }

    /// Hand an operator decision to the pending wait.
    ///
    /// Returns `false` when nothing is waiting; the resolution is discarded.
    pub fn deliver(&self, resolution: Resolution) -> bool {
        match self.slot().take() {
            Some(tx) => tx.send(resolution).is_ok(),
            None => {
                warn!("Discarding {:?} resolution: no step is waiting", resolution.action);
                false
            }
        }
    }
}
