//! Deadlines and cancellation for external calls.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

use crate::config::TimeoutsConfig;

/// Per-call deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    pub verify: Duration,
    pub generate: Duration,
    pub render: Duration,
}

impl Deadlines {
    /// Uses `timeout` for every kind of call.
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            verify: timeout,
            generate: timeout,
            render: timeout,
        }
    }
}

impl From<&TimeoutsConfig> for Deadlines {
    fn from(config: &TimeoutsConfig) -> Self {
        Self {
            verify: config.verify_timeout(),
            generate: config.generation_timeout(),
            render: config.render_timeout(),
        }
    }
}

/// How a bounded external call ended.
#[derive(Debug)]
pub enum CallOutcome<T> {
    Completed(T),
    /// The deadline passed; the call was dropped.
    TimedOut(Duration),
    /// Cancellation was signalled; the call was dropped.
    Cancelled,
}

/// Deadlines plus the cancellation signal of one operation.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    deadlines: Deadlines,
    cancel: watch::Receiver<bool>,
}

impl ExecutionContext {
    pub fn new(deadlines: Deadlines, cancel: watch::Receiver<bool>) -> Self {
        Self { deadlines, cancel }
    }

    /// A context that can never be cancelled.
    pub fn detached(deadlines: Deadlines) -> Self {
        let (_tx, rx) = watch::channel(false);
        Self::new(deadlines, rx)
    }

    pub fn deadlines(&self) -> Deadlines {
        self.deadlines
    }

    /// Returns true once cancellation was signalled.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Runs `call` until it finishes, `deadline` passes, or the operation is
    /// cancelled. A dropped call future kills any process it spawned.
    pub async fn bounded<F, T>(&self, deadline: Duration, call: F) -> CallOutcome<T>
    where
        F: Future<Output = T>,
    {
        let mut cancel = self.cancel.clone();
        if *cancel.borrow_and_update() {
            return CallOutcome::Cancelled;
        }

        tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => CallOutcome::Cancelled,
            result = tokio::time::timeout(deadline, call) => match result {
                Ok(value) => CallOutcome::Completed(value),
                Err(_) => CallOutcome::TimedOut(deadline),
            },
        }
    }
}

/// Resolves once the flag turns true. Never resolves if the sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        if *rx.borrow_and_update() {
            return;
        }
    }
}
