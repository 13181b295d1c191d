use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::FlowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Idle,
    Running,
    Paused,
    StepFailed,
    Stopped,
    Completed,
    Error,
}

/// Consistent snapshot of the execution state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub status: ExecutionStatus,
    pub current_index: usize,
    pub stop_requested: bool,
    pub paused: bool,
}

/// Shared run state: stop token, pause flag, status and step index.
///
/// Control requests (stop, pause, resume) may come from any task while a
/// run is in progress.
pub struct ExecutionControl {
    token: Mutex<CancellationToken>,
    paused: watch::Sender<bool>,
    status: watch::Sender<ExecutionStatus>,
    current_index: AtomicUsize,
    running: AtomicBool,
}

/// Marks the single active run; dropping it frees the slot.
pub struct RunGuard<'a> {
    control: &'a ExecutionControl,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.control.running.store(false, Ordering::SeqCst);
    }
}

impl Default for ExecutionControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        let (status, _) = watch::channel(ExecutionStatus::Idle);
        Self {
            token: Mutex::new(CancellationToken::new()),
            paused,
            status,
            current_index: AtomicUsize::new(0),
            running: AtomicBool::new(false),
        }
    }

    /// Claim the run slot and reset the per-run state.
    pub fn begin_run(&self) -> Result<RunGuard<'_>, FlowError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(FlowError::AlreadyRunning);
        }
        *self.lock_token() = CancellationToken::new();
        self.paused.send_replace(false);
        self.current_index.store(0, Ordering::SeqCst);
        self.set_status(ExecutionStatus::Running);
        Ok(RunGuard { control: self })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn lock_token(&self) -> std::sync::MutexGuard<'_, CancellationToken> {
        self.token.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Token of the current run.
    pub fn token(&self) -> CancellationToken {
        self.lock_token().clone()
    }

    pub fn request_stop(&self) {
        info!("Stop requested");
        self.lock_token().cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.lock_token().is_cancelled()
    }

    pub fn pause(&self) {
        info!("Pause requested");
        self.paused.send_replace(true);
        if self.is_running() && self.status() == ExecutionStatus::Running {
            self.set_status(ExecutionStatus::Paused);
        }
    }

    pub fn resume(&self) {
        info!("Resume requested");
        self.paused.send_replace(false);
        if self.status() == ExecutionStatus::Paused {
            self.set_status(ExecutionStatus::Running);
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn set_status(&self, status: ExecutionStatus) {
        self.status.send_replace(status);
    }

    pub fn status(&self) -> ExecutionStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ExecutionStatus> {
        self.status.subscribe()
    }

    pub fn set_index(&self, index: usize) {
        self.current_index.store(index, Ordering::SeqCst);
    }

    pub fn current_index(&self) -> usize {
        self.current_index.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> ExecutionState {
        ExecutionState {
            status: self.status(),
            current_index: self.current_index(),
            stop_requested: self.is_stop_requested(),
            paused: self.is_paused(),
        }
    }

    /// Block while paused. A stop request ends the wait with `UserStopped`.
    pub async fn wait_while_paused(&self, token: &CancellationToken) -> Result<(), FlowError> {
        let mut rx = self.paused.subscribe();
        loop {
            if token.is_cancelled() {
                return Err(FlowError::UserStopped);
            }
            if !*rx.borrow_and_update() {
                return Ok(());
            }
            debug!("Execution paused; waiting for resume");
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
                _ = token.cancelled() => return Err(FlowError::UserStopped),
            }
        }
    }

    /// Honour pause, then stop. Called before every step and every inner
    /// batch iteration.
    pub async fn checkpoint(&self, token: &CancellationToken) -> Result<(), FlowError> {
        self.wait_while_paused(token).await?;
        if token.is_cancelled() {
            return Err(FlowError::UserStopped);
        }
        Ok(())
    }
}

/// Sleep that ends early with `UserStopped` when the run is stopped.
pub async fn interruptible_sleep(
    token: &CancellationToken,
    duration: Duration,
) -> Result<(), FlowError> {
    if duration.is_zero() {
        return if token.is_cancelled() {
            Err(FlowError::UserStopped)
        } else {
            Ok(())
        };
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = token.cancelled() => Err(FlowError::UserStopped),
    }
}
