mod executor_tests;
mod mock_session;
mod selector_tests;

use std::time::Duration;

use crate::config::FlowConfig;

// Initialize tracing for tests
#[allow(dead_code)]
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()))
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_test_writer()
        .try_init();
}

/// Configuration with delays shrunk to keep tests fast.
pub fn fast_config() -> FlowConfig {
    FlowConfig {
        retry_attempts: 3,
        retry_delay: 5,
        element_timeout: 0,
        radio_poll_interval: 5,
        settle_delay: 0,
        product_load_delay: 0,
        recovery_timeout: 2_000,
        ..FlowConfig::default()
    }
}

pub const SHORT: Duration = Duration::from_millis(20);
