use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::config::FlowConfig;
use crate::control::interruptible_sleep;
use crate::element::UIElement;
use crate::errors::{AutomationError, FlowError};
use crate::platforms::{blocking, AutomationSession};
use crate::selector::Selector;

// Upper bound for each fallback lookup of an AutomationId xpath.
const FALLBACK_LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Bounded retry settings for element resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub timeout_per_attempt: Duration,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, timeout_per_attempt: Duration, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            timeout_per_attempt,
            delay,
        }
    }

    pub fn from_config(config: &FlowConfig) -> Self {
        Self::new(
            config.retry_attempts,
            config.element_timeout(),
            config.retry_delay(),
        )
    }

    /// One attempt, no delay.
    pub fn once(timeout: Duration) -> Self {
        Self::new(1, timeout, Duration::ZERO)
    }
}

/// Locates UI elements by selector with retries and selector-specific fallbacks.
#[derive(Clone)]
pub struct ElementResolver {
    session: Arc<dyn AutomationSession>,
}

impl ElementResolver {
    pub fn new(session: Arc<dyn AutomationSession>) -> Self {
        Self { session }
    }

    /// Resolve `selector`, making at most `policy.attempts` attempts.
    ///
    /// A dead session aborts with `SessionInvalid`, a stop request during the
    /// delay between attempts aborts with `UserStopped`.
    #[instrument(level = "debug", skip(self, policy, token), fields(selector = %selector))]
    pub async fn resolve(
        &self,
        selector: &Selector,
        policy: &RetryPolicy,
        token: &CancellationToken,
    ) -> Result<UIElement, FlowError> {
        let attempts = policy.attempts.max(1);
        for attempt in 1..=attempts {
            if token.is_cancelled() {
                return Err(FlowError::UserStopped);
            }
            if let Some(element) = self.find_once(selector, policy.timeout_per_attempt).await? {
                debug!("Resolved {} on attempt {}/{}", selector, attempt, attempts);
                return Ok(element);
            }
            debug!("Attempt {}/{} for {} failed", attempt, attempts, selector);
            if attempt < attempts {
                interruptible_sleep(token, policy.delay).await?;
            }
        }
        Err(FlowError::ElementNotFound {
            selector: selector.to_string(),
            attempts,
        })
    }

    /// A single attempt: the primary lookup followed by any fallbacks.
    /// `Ok(None)` means the element was not found.
    pub async fn find_once(
        &self,
        selector: &Selector,
        timeout: Duration,
    ) -> Result<Option<UIElement>, FlowError> {
        let selector = selector.clone();
        let result = blocking(&self.session, move |session| {
            match session.find_element(&selector, timeout) {
                Ok(element) => return Ok(Some(element)),
                Err(e @ AutomationError::SessionInvalid(_)) => return Err(e),
                Err(e) if !e.is_not_found() => {
                    warn!("Lookup of {} failed: {}", selector, e);
                }
                Err(_) => {}
            }

            let fallback_timeout = timeout.min(FALLBACK_LOOKUP_TIMEOUT);
            for fallback in selector.fallbacks() {
                debug!("Trying fallback {}", fallback);
                match session.find_element(&fallback, fallback_timeout) {
                    Ok(element) => return Ok(Some(element)),
                    Err(e @ AutomationError::SessionInvalid(_)) => return Err(e),
                    Err(e) => debug!("Fallback {} failed: {}", fallback, e),
                }
            }
            Ok(None)
        })
        .await;

        match result {
            Ok(found) => Ok(found),
            Err(AutomationError::SessionInvalid(msg)) => Err(FlowError::SessionInvalid(msg)),
            Err(e) => Err(FlowError::Automation(e)),
        }
    }

    /// Best-effort presence probe for optional dialogs.
    pub async fn probe(&self, selector: &Selector, timeout: Duration) -> Option<UIElement> {
        match self.find_once(selector, timeout).await {
            Ok(found) => found,
            Err(e) => {
                debug!("Probe for {} failed: {}", selector, e);
                None
            }
        }
    }
}
