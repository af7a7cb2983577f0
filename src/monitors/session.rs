//! Session liveness, URL drift, page refresh and element health.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{names, MonitorContext};
use crate::error::BotError;
use crate::market::clean_url;
use crate::notify::Alert;
use crate::scheduler::{Monitor, MonitorScheduler};

/// Delay before URL drift checks resume after a re-login.
pub const URL_DRIFT_RESUME: Duration = Duration::from_secs(15);

/// Delay before page refreshes resume after a re-login.
pub const PAGE_REFRESH_RESUME: Duration = Duration::from_secs(240);

/// Re-enable `name` after `delay`, if the scheduler still exists.
fn enable_later(ctx: &MonitorContext, name: &'static str, delay: Duration) {
    let scheduler = ctx.scheduler.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Some(scheduler) = scheduler.upgrade() {
            scheduler.enable(name);
        }
    });
}

/// Logs back in when the session has dropped its login.
#[derive(Debug)]
pub struct SessionCheck {
    ctx: Arc<MonitorContext>,
    url_resume: Duration,
    refresh_resume: Duration,
}

impl SessionCheck {
    /// Create the task with the standard resume delays.
    pub fn new(ctx: Arc<MonitorContext>) -> Self {
        Self::with_resume_delays(ctx, URL_DRIFT_RESUME, PAGE_REFRESH_RESUME)
    }

    /// Create the task with custom resume delays.
    pub fn with_resume_delays(
        ctx: Arc<MonitorContext>,
        url_resume: Duration,
        refresh_resume: Duration,
    ) -> Self {
        Self {
            ctx,
            url_resume,
            refresh_resume,
        }
    }
}

#[async_trait]
impl Monitor for SessionCheck {
    fn name(&self) -> &'static str {
        names::SESSION_CHECK
    }

    async fn run(&self) -> Result<(), BotError> {
        if self.ctx.market.is_session_alive().await? {
            return Ok(());
        }

        warn!("Session logged out, logging in again");
        self.ctx.with_scheduler(|s: &MonitorScheduler| {
            s.disable(names::URL_DRIFT);
            s.disable(names::PAGE_REFRESH);
        });

        let login = self.ctx.market.login().await;
        enable_later(&self.ctx, names::URL_DRIFT, self.url_resume);
        enable_later(&self.ctx, names::PAGE_REFRESH, self.refresh_resume);

        login?;
        info!("Logged back in");
        Ok(())
    }
}

/// Navigates back when the session wandered off the target market.
#[derive(Debug)]
pub struct UrlDrift {
    ctx: Arc<MonitorContext>,
}

impl UrlDrift {
    /// Create the task.
    pub fn new(ctx: Arc<MonitorContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Monitor for UrlDrift {
    fn name(&self) -> &'static str {
        names::URL_DRIFT
    }

    async fn run(&self) -> Result<(), BotError> {
        let target = clean_url(&self.ctx.target.url());
        if target.is_empty() {
            return Ok(());
        }

        let current = clean_url(&self.ctx.market.current_url().await?);
        if current != target {
            info!(current = %current, target = %target, "Session drifted, navigating back");
            self.ctx.market.navigate(&target).await?;
        }
        Ok(())
    }
}

/// Reloads the market page.
#[derive(Debug)]
pub struct PageRefresh {
    ctx: Arc<MonitorContext>,
}

impl PageRefresh {
    /// Create the task.
    pub fn new(ctx: Arc<MonitorContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Monitor for PageRefresh {
    fn name(&self) -> &'static str {
        names::PAGE_REFRESH
    }

    async fn run(&self) -> Result<(), BotError> {
        self.ctx.market.refresh().await?;
        info!("Session page refreshed");
        Ok(())
    }
}

/// Probes the critical elements and alerts on any that are missing.
#[derive(Debug)]
pub struct SelectorHealth {
    ctx: Arc<MonitorContext>,
}

impl SelectorHealth {
    /// Create the task.
    pub fn new(ctx: Arc<MonitorContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Monitor for SelectorHealth {
    fn name(&self) -> &'static str {
        names::SELECTOR_HEALTH
    }

    async fn run(&self) -> Result<(), BotError> {
        let failed = self.ctx.market.check_selectors().await?;
        if failed.is_empty() {
            info!("All critical elements present");
            return Ok(());
        }

        warn!(count = failed.len(), failed = ?failed, "Critical elements missing");
        self.ctx
            .alerts
            .dispatch(Alert::selector_health(&self.ctx.alerts.context(), &failed));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{fixture, URL};
    use super::*;
    use crate::market::MockCall;

    #[tokio::test]
    async fn url_drift_navigates_back() {
        let f = fixture("drift", vec![], "");
        f.market.set_url("https://polymarket.com/markets/crypto?tab=1");

        UrlDrift::new(f.ctx.clone()).run().await.unwrap();

        assert!(f.market.calls().contains(&MockCall::Navigate(URL.to_string())));
    }

    #[tokio::test]
    async fn url_drift_ignores_query_and_trailing_slash() {
        let f = fixture("no-drift", vec![], "");
        f.market.set_url(&format!("{}/?tid=42", URL));

        UrlDrift::new(f.ctx.clone()).run().await.unwrap();

        assert!(f.market.calls().is_empty());
    }

    #[tokio::test]
    async fn session_check_logs_in_and_pauses_drift() {
        let f = fixture("session", vec![], "");
        f.market.set_session_alive(false);
        let task = SessionCheck::with_resume_delays(
            f.ctx.clone(),
            Duration::from_millis(20),
            Duration::from_secs(60),
        );

        task.run().await.unwrap();

        assert!(f.market.calls().contains(&MockCall::Login));
        assert!(f.scheduler.is_disabled(names::URL_DRIFT));
        assert!(f.scheduler.is_disabled(names::PAGE_REFRESH));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!f.scheduler.is_disabled(names::URL_DRIFT));
        assert!(f.scheduler.is_disabled(names::PAGE_REFRESH));
    }

    #[tokio::test]
    async fn failed_login_still_resumes_paused_tasks() {
        let f = fixture("session-login-fails", vec![], "");
        f.market.set_session_alive(false);
        f.market.set_login_failure(true);
        let task = SessionCheck::with_resume_delays(
            f.ctx.clone(),
            Duration::from_millis(10),
            Duration::from_millis(20),
        );

        let err = task.run().await.unwrap_err();

        assert!(err.is_connectivity());
        assert!(f.scheduler.is_disabled(names::URL_DRIFT));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!f.scheduler.is_disabled(names::URL_DRIFT));
        assert!(!f.scheduler.is_disabled(names::PAGE_REFRESH));
    }

    #[tokio::test]
    async fn healthy_session_does_nothing() {
        let f = fixture("session-ok", vec![], "");
        SessionCheck::new(f.ctx.clone()).run().await.unwrap();
        assert!(f.market.calls().is_empty());
    }

    #[tokio::test]
    async fn selector_health_alerts_on_failures() {
        let f = fixture("selectors", vec![], "");
        f.market.set_failing_selectors(&["Up order book", "Buy button"]);

        SelectorHealth::new(f.ctx.clone()).run().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let sent = f.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("- Buy button"));
    }
}
