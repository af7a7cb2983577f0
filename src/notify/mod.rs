//! Out-of-band alerts.
//!
//! [`Alerts`] is the fire-and-forget front door: callers hand it an
//! [`Alert`] and move on, delivery runs on its own task with a bounded number
//! of attempts and failures end up in the log.

pub mod alert;
pub mod telegram;

use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::error::NotifyError;
use crate::retry::{Attempt, RetryOutcome, RetryPolicy};

pub use alert::{Alert, AlertContext};
pub use telegram::TelegramNotifier;

/// Alert transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one message.
    async fn send(&self, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// Writes alerts to the log when no transport is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        info!(subject, body, "Alert");
        Ok(())
    }
}

/// Keeps alerts in memory; optionally fails the first few sends.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<(String, String)>>,
    failures: Mutex<u32>,
    attempts: Mutex<u32>,
}

impl MemoryNotifier {
    /// Create an empty notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` sends.
    pub fn fail_next(&self, n: u32) {
        *self.failures.lock().unwrap_or_else(|e| e.into_inner()) = n;
    }

    /// Delivered (subject, body) pairs in order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Delivered subjects in order.
    pub fn subjects(&self) -> Vec<String> {
        self.sent().into_iter().map(|(s, _)| s).collect()
    }

    /// Send attempts, successful or not.
    pub fn attempts(&self) -> u32 {
        *self.attempts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        *self.attempts.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        {
            let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
            if *failures > 0 {
                *failures -= 1;
                return Err(NotifyError::Failed("scripted failure".into()));
            }
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((subject.to_string(), body.to_string()));
        Ok(())
    }
}

/// Fire-and-forget alert dispatcher.
#[derive(Clone)]
pub struct Alerts {
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
    context: Arc<RwLock<AlertContext>>,
}

impl std::fmt::Debug for Alerts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Alerts")
            .field("policy", &self.policy)
            .field("context", &self.context())
            .finish()
    }
}

impl Alerts {
    /// Create a dispatcher.
    pub fn new(notifier: Arc<dyn Notifier>, policy: RetryPolicy, host: impl Into<String>) -> Self {
        Self {
            notifier,
            policy,
            context: Arc::new(RwLock::new(AlertContext {
                host: host.into(),
                pair: String::new(),
            })),
        }
    }

    /// Update the trading pair shown in subjects.
    pub fn set_pair(&self, pair: impl Into<String>) {
        if let Ok(mut ctx) = self.context.write() {
            ctx.pair = pair.into();
        }
    }

    /// Current host and pair labels.
    pub fn context(&self) -> AlertContext {
        self.context
            .read()
            .map(|ctx| ctx.clone())
            .unwrap_or_default()
    }

    /// Deliver in the background.
    pub fn dispatch(&self, alert: Alert) {
        let this = self.clone();
        tokio::spawn(async move {
            this.deliver(alert).await;
        });
    }

    /// Deliver now with bounded retries; returns whether it went out.
    pub async fn deliver(&self, alert: Alert) -> bool {
        let notifier = &self.notifier;
        let outcome: RetryOutcome<(), NotifyError> = self
            .policy
            .run("notify", None, |attempt| {
                let alert = &alert;
                async move {
                    match notifier.send(&alert.subject, &alert.body).await {
                        Ok(()) => Attempt::Done(()),
                        Err(e) => {
                            warn!(attempt, error = %e, subject = %alert.subject, "Alert delivery failed");
                            Attempt::Retry(e.to_string())
                        }
                    }
                }
            })
            .await;

        match outcome {
            RetryOutcome::Succeeded { .. } => true,
            RetryOutcome::Exhausted { attempts, last_reason } => {
                error!(attempts, reason = %last_reason, subject = %alert.subject, "Alert dropped");
                false
            }
            RetryOutcome::Aborted(e) => {
                error!(error = %e, subject = %alert.subject, "Alert dropped");
                false
            }
            RetryOutcome::Stopped { .. } => false,
        }
    }
}
