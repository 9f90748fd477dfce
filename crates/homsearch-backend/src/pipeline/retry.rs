//! Bounded retry with fixed backoff

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Default number of attempts, the first one included
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default pause between attempts in milliseconds
pub const DEFAULT_BACKOFF_MS: u64 = 2_000;

/// How often a retryable invocation is attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_backoff_ms() -> u64 {
    DEFAULT_BACKOFF_MS
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_ms: DEFAULT_BACKOFF_MS,
        }
    }
}

impl RetryPolicy {
    /// Run the policy once, without retrying
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Run `operation` until it succeeds or the attempts are used up
    ///
    /// The operation receives the 1-based attempt number. The last error is
    /// returned when every attempt fails.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts => {
                    warn!(
                        operation = what,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        backoff_ms = self.backoff_ms,
                        error = %e,
                        "Attempt failed, retrying..."
                    );
                    tokio::time::sleep(self.backoff()).await;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }
}
