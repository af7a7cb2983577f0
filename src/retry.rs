//! Bounded retry with fixed backoff.
//!
//! Every retried operation in the bot (trade confirmation, reconnection,
//! readiness polling, amount computation, reference price, alert delivery)
//! runs through [`RetryPolicy::run`] so the attempt budget is explicit.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::sync::StopSignal;

/// Result of one attempt.
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// Finished; stop retrying.
    Done(T),
    /// Failed in a retryable way.
    Retry(String),
    /// Failed in a way retrying cannot fix.
    Abort(E),
}

/// Result of the whole retry loop.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// An attempt succeeded.
    Succeeded {
        /// Value produced.
        value: T,
        /// Attempt number that succeeded (1-based).
        attempts: u32,
    },
    /// Budget spent without success.
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Reason given by the last attempt.
        last_reason: String,
    },
    /// An attempt aborted the loop.
    Aborted(E),
    /// The stop signal was raised between attempts.
    Stopped {
        /// Attempts made before stopping.
        attempts: u32,
    },
}

impl<T, E> RetryOutcome<T, E> {
    /// The produced value, if any.
    pub fn value(self) -> Option<T> {
        match self {
            RetryOutcome::Succeeded { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// Attempt budget and the fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts, at least one.
    pub attempts: u32,
    /// Delay after a failed attempt.
    pub delay: Duration,
}

impl RetryPolicy {
    /// Create a policy; zero attempts is treated as one.
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    /// Create a policy with the delay in milliseconds.
    pub fn from_millis(attempts: u32, delay_ms: u64) -> Self {
        Self::new(attempts, Duration::from_millis(delay_ms))
    }

    /// Run `op` until it finishes, aborts, the budget is spent, or `stop` is raised.
    ///
    /// `op` receives the 1-based attempt number. The stop signal is checked
    /// before every attempt, never in the middle of one.
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        stop: Option<&StopSignal>,
        mut op: F,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Attempt<T, E>>,
    {
        let mut last_reason = String::new();

        for attempt in 1..=self.attempts {
            if stop.is_some_and(StopSignal::is_set) {
                debug!(label, attempt, "Stop signal raised, abandoning retries");
                return RetryOutcome::Stopped {
                    attempts: attempt - 1,
                };
            }

            match op(attempt).await {
                Attempt::Done(value) => {
                    return RetryOutcome::Succeeded {
                        value,
                        attempts: attempt,
                    }
                }
                Attempt::Abort(e) => return RetryOutcome::Aborted(e),
                Attempt::Retry(reason) => {
                    debug!(label, attempt, max = self.attempts, reason = %reason, "Attempt failed");
                    last_reason = reason;
                }
            }

            if attempt < self.attempts {
                tokio::time::sleep(self.delay).await;
            }
        }

        RetryOutcome::Exhausted {
            attempts: self.attempts,
            last_reason,
        }
    }
}
