//! Unattended flow execution for point-of-sale UI automation
//!
//! Flows are ordered lists of steps (click, type, select, search products...)
//! run against a live UI-automation session. Elements are resolved with
//! bounded retries, stubborn controls go through a chain of activation
//! strategies, and failed steps are suspended until an operator decides to
//! retry, skip or stop.

pub mod actions;
pub mod batch;
pub mod click_strategies;
pub mod config;
pub mod control;
pub mod element;
pub mod errors;
pub mod events;
pub mod executor;
pub mod flow;
pub mod helpers;
pub mod keys;
pub mod locator;
pub mod platforms;
pub mod products;
pub mod recovery;
pub mod selector;
pub mod setup;
#[cfg(test)]
mod tests;

pub use actions::{ActionDispatcher, ActionOutcome};
pub use click_strategies::{ActivationStrategy, ClickChain, UnfocusableControl, UnfocusableRegistry};
pub use config::FlowConfig;
pub use control::{ExecutionControl, ExecutionState, ExecutionStatus};
pub use element::UIElement;
pub use errors::{AutomationError, FlowError};
pub use events::{BroadcastEventBus, EventSink, FailureEvent, FlowEvent, InboundMessage, LogLevel};
pub use executor::{ExecutionContext, FlowExecutor, FlowOutcome, OutcomeStatus};
pub use flow::{ActionType, Flow, Step};
pub use locator::{ElementResolver, RetryPolicy};
pub use platforms::{AppiumConfig, AppiumConnector, AutomationSession, SessionConnector};
pub use products::Product;
pub use recovery::{Resolution, ResolutionAction};
pub use selector::{Selector, SelectorKind};
pub use setup::{initialize, InitReport, InitRequest};
