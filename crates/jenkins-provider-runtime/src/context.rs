//! Per-pass execution context: a deadline plus the process shutdown signal.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::ExternalError;

#[derive(Debug, Clone)]
pub struct PassContext {
    deadline: Instant,
    shutdown: watch::Receiver<bool>,
}

impl PassContext {
    pub fn new(timeout: Duration, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            shutdown,
        }
    }

    /// Context that can only end by deadline
    pub fn with_timeout(timeout: Duration) -> Self {
        let (_tx, rx) = watch::channel(false);
        Self::new(timeout, rx)
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Run an external call bound to this context.
    ///
    /// Deadline expiry yields [`ExternalError::Transient`]; shutdown yields
    /// [`ExternalError::Cancelled`]. Either way the call future is dropped.
    pub async fn run<T, F>(&self, call: F) -> Result<T, ExternalError>
    where
        F: Future<Output = Result<T, ExternalError>>,
    {
        if self.is_shutting_down() {
            return Err(ExternalError::Cancelled);
        }
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => Err(ExternalError::Cancelled),
            result = tokio::time::timeout_at(self.deadline, call) => match result {
                Ok(result) => result,
                Err(_) => Err(ExternalError::transient("deadline exceeded")),
            },
        }
    }
}

/// Resolves once shutdown is signalled. A dropped sender never signals.
pub(crate) async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
