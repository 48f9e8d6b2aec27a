// Per-operation deadline and cancellation

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;

/// Bounds a single store operation.
///
/// Every store call takes one of these. The backend future is raced against
/// the deadline and the token; whichever fires first drops the future, which
/// is how cancellation reaches the driver.
#[derive(Debug, Clone)]
pub struct OpContext {
    deadline: Instant,
    cancel: CancellationToken,
}

#[derive(Debug, thiserror::Error)]
#[error("deadline of {0:?} exceeded")]
pub struct DeadlineExceeded(pub Duration);

impl OpContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Same deadline, but cancelled together with `parent`.
    pub fn with_cancellation(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Drive `fut` to completion unless the context is cancelled or expires first.
    pub async fn run<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        if self.is_cancelled() {
            return Err(StoreError::Cancelled { op });
        }
        let budget = self.remaining();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StoreError::Cancelled { op }),
            res = tokio::time::timeout_at(self.deadline, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(StoreError::StorageUnavailable {
                    op,
                    source: Box::new(DeadlineExceeded(budget)),
                }),
            },
        }
    }
}
