use thiserror::Error;

/// Errors raised by an automation session (the driver level).
#[derive(Error, Debug, Clone)]
pub enum AutomationError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Session is no longer valid: {0}")]
    SessionInvalid(String),

    #[error("Platform-specific error: {0}")]
    PlatformError(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),
}

impl AutomationError {
    /// Lookup failures that a retry may cure.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AutomationError::ElementNotFound(_) | AutomationError::Timeout(_)
        )
    }
}

/// Errors raised while executing a flow step.
#[derive(Error, Debug, Clone)]
pub enum FlowError {
    #[error("Automation session is not valid: {0}")]
    SessionInvalid(String),

    #[error("Element not found after {attempts} attempts: {selector}")]
    ElementNotFound { selector: String, attempts: u32 },

    #[error("Input field not found: {0}")]
    FieldNotFound(String),

    #[error("All activation strategies failed for '{0}'")]
    ActivationExhausted(String),

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Execution stopped by user")]
    UserStopped,

    #[error("Timeout waiting for operator response")]
    RecoveryTimeout,

    #[error("A flow is already running")]
    AlreadyRunning,

    #[error("Invalid step: {0}")]
    InvalidStep(String),

    #[error(transparent)]
    Automation(#[from] AutomationError),
}

impl FlowError {
    /// Errors that end the run immediately instead of entering recovery.
    pub fn is_stop(&self) -> bool {
        matches!(self, FlowError::UserStopped)
    }

    pub fn is_session_invalid(&self) -> bool {
        matches!(
            self,
            FlowError::SessionInvalid(_) | FlowError::Automation(AutomationError::SessionInvalid(_))
        )
    }
}
