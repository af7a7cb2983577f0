//! Connection supervisor.
//!
//! Monitors report connectivity failures to the supervisor, which tears the
//! session down, optionally relaunches it, reconnects with a bounded budget,
//! and either resynchronizes the monitors or gives up and waits for the
//! operator. Only one recovery runs at a time; failures that arrive while
//! one is in progress are folded into it.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Serialize;
use strum::Display;
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

use crate::error::{BotError, MarketError};
use crate::ladder::TradeLadder;
use crate::market::{Coin, MarketInterface};
use crate::metrics;
use crate::notify::{Alert, Alerts};
use crate::retry::{Attempt, RetryOutcome, RetryPolicy};
use crate::scheduler::{ConnectivityFailure, MonitorScheduler};
use crate::sync::ExclusiveFlag;

/// Session health as seen by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
pub enum ConnectionState {
    /// Session is usable.
    Connected,
    /// Recovery in progress.
    Reconnecting,
    /// Recovery gave up; manual start required.
    Failed,
}

/// Result of a recovery request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Another recovery was already running.
    Skipped,
    /// Session reconnected after this many attempts.
    Recovered(u32),
    /// Budget spent; the supervisor is now `Failed`.
    Failed,
}

/// Market URL and coin the session should be on.
#[derive(Debug, Default)]
pub struct SessionTarget {
    url: RwLock<String>,
    coin: RwLock<Coin>,
}

impl SessionTarget {
    /// Target `url` for `coin`.
    pub fn new(url: impl Into<String>, coin: Coin) -> Self {
        Self {
            url: RwLock::new(url.into()),
            coin: RwLock::new(coin),
        }
    }

    /// Current target URL.
    pub fn url(&self) -> String {
        self.url.read().map(|u| u.clone()).unwrap_or_default()
    }

    /// Replace the target URL.
    pub fn set_url(&self, url: impl Into<String>) {
        if let Ok(mut u) = self.url.write() {
            *u = url.into();
        }
    }

    /// Selected coin.
    pub fn coin(&self) -> Coin {
        self.coin.read().map(|c| *c).unwrap_or_default()
    }

    /// Select a coin.
    pub fn set_coin(&self, coin: Coin) {
        if let Ok(mut c) = self.coin.write() {
            *c = coin;
        }
    }
}

/// Restarts whatever hosts the market session.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    /// Relaunch and wait until the session host is ready.
    async fn relaunch(&self) -> Result<(), BotError>;
}

/// Runs a shell script, then polls a readiness URL.
#[derive(Debug, Clone)]
pub struct ScriptLauncher {
    script: PathBuf,
    readiness_url: String,
    http: reqwest::Client,
    readiness: RetryPolicy,
}

impl ScriptLauncher {
    /// Create a launcher.
    pub fn new(
        script: impl Into<PathBuf>,
        readiness_url: impl Into<String>,
        http: reqwest::Client,
        readiness: RetryPolicy,
    ) -> Self {
        Self {
            script: script.into(),
            readiness_url: readiness_url.into(),
            http,
            readiness,
        }
    }
}

#[async_trait]
impl SessionLauncher for ScriptLauncher {
    #[instrument(skip(self), fields(script = %self.script.display()))]
    async fn relaunch(&self) -> Result<(), BotError> {
        // The script backgrounds the session host, so it is not awaited.
        tokio::process::Command::new("sh")
            .arg(&self.script)
            .kill_on_drop(false)
            .spawn()?;
        info!("Relaunch script started, waiting for readiness");

        let http = &self.http;
        let url = self.readiness_url.as_str();
        let outcome: RetryOutcome<(), ()> = self
            .readiness
            .run("readiness", None, |_| async move {
                match http.get(url).send().await {
                    Ok(resp) if resp.status().is_success() => Attempt::Done(()),
                    Ok(resp) => Attempt::Retry(format!("HTTP {}", resp.status())),
                    Err(e) => Attempt::Retry(e.to_string()),
                }
            })
            .await;

        match outcome {
            RetryOutcome::Succeeded { attempts, .. } => {
                info!(attempts, "Session host ready");
                Ok(())
            }
            _ => Err(MarketError::Connectivity(format!(
                "session host not ready at {}",
                self.readiness_url
            ))
            .into()),
        }
    }
}

/// Owns the session recovery state machine.
pub struct ConnectionSupervisor {
    market: Arc<dyn MarketInterface>,
    scheduler: Arc<MonitorScheduler>,
    ladder: Arc<TradeLadder>,
    alerts: Alerts,
    launcher: Option<Arc<dyn SessionLauncher>>,
    target: Arc<SessionTarget>,
    reconnect: RetryPolicy,
    state: RwLock<ConnectionState>,
    restarting: ExclusiveFlag,
}

impl std::fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("state", &self.state())
            .field("restarting", &self.restarting.is_held())
            .finish()
    }
}

impl ConnectionSupervisor {
    /// Create a supervisor in the `Connected` state.
    pub fn new(
        market: Arc<dyn MarketInterface>,
        scheduler: Arc<MonitorScheduler>,
        ladder: Arc<TradeLadder>,
        alerts: Alerts,
        target: Arc<SessionTarget>,
        reconnect: RetryPolicy,
    ) -> Self {
        Self {
            market,
            scheduler,
            ladder,
            alerts,
            launcher: None,
            target,
            reconnect,
            state: RwLock::new(ConnectionState::Connected),
            restarting: ExclusiveFlag::new(),
        }
    }

    /// Relaunch the session host before reconnecting.
    pub fn with_launcher(mut self, launcher: Arc<dyn SessionLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
            .read()
            .map(|s| *s)
            .unwrap_or(ConnectionState::Failed)
    }

    fn set_state(&self, state: ConnectionState) {
        if let Ok(mut s) = self.state.write() {
            *s = state;
        }
    }

    /// Mark the session usable after an operator start.
    pub fn mark_connected(&self) {
        self.set_state(ConnectionState::Connected);
    }

    /// Whether a recovery is running.
    pub fn is_restarting(&self) -> bool {
        self.restarting.is_held()
    }

    /// Recover the session; a no-op if a recovery is already running.
    #[instrument(skip(self))]
    pub async fn recover(&self, reason: &str) -> RecoveryOutcome {
        let Some(_permit) = self.restarting.try_acquire() else {
            info!("Recovery already in progress");
            return RecoveryOutcome::Skipped;
        };

        warn!(reason, "Session lost, recovering");
        self.set_state(ConnectionState::Reconnecting);
        self.scheduler.pause_all();

        let summary = self.ladder.snapshot().await.summary();
        self.alerts
            .dispatch(Alert::connection_lost(&self.alerts.context(), reason, &summary));

        self.market.teardown().await;

        if let Some(launcher) = &self.launcher {
            if let Err(e) = launcher.relaunch().await {
                warn!(error = %e, "Relaunch failed, trying to reconnect anyway");
            }
        }

        let url = self.target.url();
        let market = &self.market;
        let outcome: RetryOutcome<(), MarketError> = self
            .reconnect
            .run("reconnect", None, |attempt| {
                let url = url.as_str();
                async move {
                    match market.connect(url).await {
                        Ok(()) => Attempt::Done(()),
                        Err(e) => {
                            warn!(attempt, error = %e, "Reconnect attempt failed");
                            Attempt::Retry(e.to_string())
                        }
                    }
                }
            })
            .await;

        match outcome {
            RetryOutcome::Succeeded { attempts, .. } => {
                self.set_state(ConnectionState::Connected);
                if self.scheduler.is_stopped() {
                    info!("Monitors were stopped during recovery, leaving them stopped");
                } else {
                    self.scheduler.resync();
                }
                metrics::inc_reconnects(true);
                info!(attempts, url = %url, "Session recovered");
                self.alerts
                    .dispatch(Alert::recovered(&self.alerts.context(), attempts));
                RecoveryOutcome::Recovered(attempts)
            }
            other => {
                let reason = match other {
                    RetryOutcome::Exhausted { last_reason, .. } => last_reason,
                    _ => "recovery interrupted".to_string(),
                };
                self.set_state(ConnectionState::Failed);
                self.scheduler.stop_all();
                self.ladder.set_active(false).await;
                metrics::inc_reconnects(false);
                error!(reason = %reason, "Session recovery failed, manual start required");
                self.alerts
                    .dispatch(Alert::recovery_failed(&self.alerts.context(), &reason));
                RecoveryOutcome::Failed
            }
        }
    }

    /// Consume connectivity failures until the channel closes.
    pub async fn run(self: Arc<Self>, mut failures: mpsc::UnboundedReceiver<ConnectivityFailure>) {
        while let Some(failure) = failures.recv().await {
            if self.state() == ConnectionState::Failed {
                continue;
            }
            let reason = format!("{}: {}", failure.task, failure.reason);
            self.recover(&reason).await;

            // Failures reported against the old session are stale now.
            while failures.try_recv().is_ok() {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::ladder::LadderParams;
    use crate::market::{MockCall, MockMarket};
    use crate::notify::MemoryNotifier;
    use crate::scheduler::{ManualClock, Monitor, Schedule, TaskSpec};
    use crate::sync::StopSignal;
    use chrono::{NaiveDate, NaiveDateTime};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct Noop(&'static str);

    #[async_trait]
    impl Monitor for Noop {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn run(&self) -> Result<(), BotError> {
            Ok(())
        }
    }

    struct SlowLauncher;

    #[async_trait]
    impl SessionLauncher for SlowLauncher {
        async fn relaunch(&self) -> Result<(), BotError> {
            tokio::time::sleep(Duration::from_millis(40)).await;
            Ok(())
        }
    }

    fn morning() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(9, 15, 0)
            .unwrap()
    }

    const URL: &str = "https://polymarket.com/event/bitcoin-up-or-down-on-october-19";

    fn fixture() -> (
        ConnectionSupervisor,
        Arc<MockMarket>,
        Arc<MonitorScheduler>,
        Arc<MemoryNotifier>,
    ) {
        let market = Arc::new(MockMarket::connected(URL, dec!(100)));
        let notifier = Arc::new(MemoryNotifier::new());
        let alerts = Alerts::new(notifier.clone(), RetryPolicy::from_millis(1, 1), "test");
        let stop = StopSignal::new();
        let clock = Arc::new(ManualClock::new(morning()));
        let (scheduler, _rx) = MonitorScheduler::new(clock, stop.clone());
        let scheduler = Arc::new(scheduler);
        scheduler.register(
            Arc::new(Noop("price-poll")),
            TaskSpec::new(Schedule::Every(Duration::from_secs(1))),
        );
        scheduler.register(
            Arc::new(Noop("variance-check")),
            TaskSpec::new(Schedule::daily(23, 0, 0)),
        );
        let ladder = Arc::new(TradeLadder::new(
            market.clone(),
            alerts.clone(),
            LadderParams::from_config(&Config::default()),
            stop,
        ));
        let supervisor = ConnectionSupervisor::new(
            market.clone(),
            scheduler.clone(),
            ladder,
            alerts,
            Arc::new(SessionTarget::new(URL, Coin::Btc)),
            RetryPolicy::from_millis(3, 1),
        );
        (supervisor, market, scheduler, notifier)
    }

    #[tokio::test]
    async fn repeated_failures_recover_with_anchored_timers() {
        let (supervisor, market, scheduler, _) = fixture();
        scheduler.start_all();

        market.fail_connects(2);
        assert_eq!(supervisor.recover("poll failed").await, RecoveryOutcome::Recovered(3));
        market.fail_connects(1);
        assert_eq!(supervisor.recover("poll failed").await, RecoveryOutcome::Recovered(2));

        assert_eq!(supervisor.state(), ConnectionState::Connected);
        assert_eq!(
            scheduler.next_fire("variance-check"),
            Some(morning().date().and_hms_opt(23, 0, 0).unwrap())
        );
        assert_eq!(scheduler.next_fire("price-poll"), Some(morning()));
        let teardowns = market
            .calls()
            .iter()
            .filter(|c| matches!(c, MockCall::Teardown))
            .count();
        assert_eq!(teardowns, 2);
        scheduler.stop_all();
    }

    #[tokio::test]
    async fn exhausted_budget_fails_and_stops_monitors() {
        let (supervisor, market, scheduler, notifier) = fixture();
        scheduler.start_all();
        market.fail_connects(10);

        assert_eq!(supervisor.recover("gone").await, RecoveryOutcome::Failed);
        assert_eq!(supervisor.state(), ConnectionState::Failed);
        assert_eq!(scheduler.next_fire("price-poll"), None);
        let connects = market
            .calls()
            .iter()
            .filter(|c| matches!(c, MockCall::Connect(_)))
            .count();
        assert_eq!(connects, 3);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let subjects = notifier.subjects();
        assert!(subjects.iter().any(|s| s.contains("session failure")));
        assert!(subjects.iter().any(|s| s.contains("recovery failed")));
    }

    #[tokio::test]
    async fn concurrent_failures_collapse() {
        let (supervisor, market, _, _) = fixture();
        let supervisor = supervisor.with_launcher(Arc::new(SlowLauncher));

        let (a, b) = tokio::join!(supervisor.recover("price-poll"), supervisor.recover("balance-poll"));

        assert_eq!(a, RecoveryOutcome::Recovered(1));
        assert_eq!(b, RecoveryOutcome::Skipped);
        let connects = market
            .calls()
            .iter()
            .filter(|c| matches!(c, MockCall::Connect(_)))
            .count();
        assert_eq!(connects, 1);
    }

    #[test]
    fn session_target_updates() {
        let target = SessionTarget::new(URL, Coin::Btc);
        target.set_coin(Coin::Eth);
        target.set_url("https://polymarket.com/event/ethereum-up-or-down-on-october-19");
        assert_eq!(target.coin(), Coin::Eth);
        assert!(target.url().contains("ethereum"));
    }
}
