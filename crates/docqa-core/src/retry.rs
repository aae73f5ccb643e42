//! Timeout and bounded-retry policy for calls to external model services.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{DocqaError, Result};

/// Which external service a call targets; decides how a timeout is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Embedding,
    Generation,
}

impl ServiceKind {
    pub fn name(&self) -> &'static str {
        match self {
            ServiceKind::Embedding => "embedding",
            ServiceKind::Generation => "generation",
        }
    }

    fn timeout_error(&self, timeout: Duration) -> DocqaError {
        let message = format!("timed out after {} ms", timeout.as_millis());
        match self {
            ServiceKind::Embedding => DocqaError::unavailable(self.name(), message),
            ServiceKind::Generation => DocqaError::GenerationFailed(message),
        }
    }
}

/// Per-attempt timeout plus a bounded number of retries with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    /// Retries after the first attempt; total attempts is `max_retries + 1`.
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 1,
            initial_backoff: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn new(timeout: Duration, max_retries: u32) -> Self {
        Self {
            timeout,
            max_retries,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff * 2u32.pow(attempt.min(5))
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// retry budget is spent. Each attempt is bounded by `timeout`.
    pub async fn run<T, F, Fut>(&self, service: ServiceKind, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            let outcome = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(service.timeout_error(self.timeout)),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.backoff(attempt);
                    attempt += 1;
                    warn!(
                        service = service.name(),
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "External call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
