//! Operator commands.
//!
//! Each command maps to one core operation: start and stop the monitors,
//! change the stake percentages, switch coins, change the default target
//! price, reset the ladder, and report status. Start and stop are
//! serialized; a second one arriving while the first runs is rejected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::{BotError, LadderError};
use crate::feed::ReferenceSnapshot;
use crate::ladder::{LadderAmounts, LadderState};
use crate::market::{slug_from_url, Coin};
use crate::monitors::{switch_market, MonitorContext};
use crate::scheduler::{MonitorScheduler, TaskStatus};
use crate::store::AmountSettings;
use crate::supervisor::{ConnectionState, ConnectionSupervisor};
use crate::sync::ExclusiveFlag;

/// Everything the operator sees.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Whether the monitors are started.
    pub running: bool,
    /// Session health.
    pub connection: ConnectionState,
    /// Whether a reconnection is in progress.
    pub restarting: bool,
    /// Target market URL.
    pub url: String,
    /// Selected coin.
    pub coin: Coin,
    /// Stake percentages.
    pub amount_settings: AmountSettings,
    /// Ladder levels and counters.
    pub ladder: LadderState,
    /// Monitor tasks.
    pub tasks: Vec<TaskStatus>,
    /// Day-open reference price.
    pub reference: ReferenceSnapshot,
}

/// Executes operator commands against the running core.
pub struct Controller {
    ctx: Arc<MonitorContext>,
    scheduler: Arc<MonitorScheduler>,
    supervisor: Arc<ConnectionSupervisor>,
    running: AtomicBool,
    command: ExclusiveFlag,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("running", &self.is_running())
            .field("supervisor", &self.supervisor)
            .finish()
    }
}

impl Controller {
    /// Create a stopped controller.
    pub fn new(
        ctx: Arc<MonitorContext>,
        scheduler: Arc<MonitorScheduler>,
        supervisor: Arc<ConnectionSupervisor>,
    ) -> Self {
        Self {
            ctx,
            scheduler,
            supervisor,
            running: AtomicBool::new(false),
            command: ExclusiveFlag::new(),
        }
    }

    /// Whether the monitors are started and the session is usable.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.supervisor.state() != ConnectionState::Failed
    }

    /// Session health.
    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    fn busy() -> BotError {
        BotError::Rejected("another start/stop command is in progress".to_string())
    }

    /// Open the session on the target URL and start every monitor.
    ///
    /// Also the way out of the `Failed` state after a recovery gave up.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), BotError> {
        let _permit = self.command.try_acquire().ok_or_else(Self::busy)?;
        if self.is_running() {
            return Err(BotError::Rejected("already running".to_string()));
        }

        let mut url = self.ctx.target.url();
        if url.is_empty() {
            url = switch_market(&self.ctx, self.ctx.target.coin(), false).await?;
        }

        self.ctx.market.connect(&url).await?;
        if let Some(slug) = slug_from_url(&url) {
            self.ctx.alerts.set_pair(slug);
        }
        self.supervisor.mark_connected();

        self.ctx.ladder.set_active(true).await;
        self.scheduler.start_all();
        self.running.store(true, Ordering::Release);
        info!(url = %url, "Bot started");
        Ok(())
    }

    /// Stop every monitor and deactivate the ladder.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<(), BotError> {
        let _permit = self.command.try_acquire().ok_or_else(Self::busy)?;
        if !self.running.swap(false, Ordering::AcqRel) {
            return Err(BotError::Rejected("not running".to_string()));
        }

        self.scheduler.stop_all();
        self.ctx.ladder.set_active(false).await;
        self.ctx.persist_ladder().await;
        info!("Bot stopped");
        Ok(())
    }

    /// Store new stake percentages and recompute the level stakes.
    #[instrument(skip(self))]
    pub async fn set_amounts(&self, settings: AmountSettings) -> Result<LadderAmounts, BotError> {
        for (name, pct) in [
            ("initial", settings.initial_amount_pct),
            ("first rebound", settings.first_rebound_pct),
            ("n rebound", settings.n_rebound_pct),
        ] {
            if pct <= Decimal::ZERO {
                return Err(LadderError::InvalidInput(format!(
                    "{} percentage must be positive, got {}",
                    name, pct
                ))
                .into());
            }
        }

        self.ctx
            .document
            .update(|doc| doc.amounts = settings.clone())
            .await?;
        let amounts = self
            .ctx
            .ladder
            .refresh_amounts(
                settings.initial_amount_pct,
                settings.first_rebound_pct,
                settings.n_rebound_pct,
            )
            .await?;
        self.ctx.persist_ladder().await;
        Ok(amounts)
    }

    /// Switch to today's market for `coin`.
    #[instrument(skip(self))]
    pub async fn select_coin(&self, coin: Coin) -> Result<String, BotError> {
        if self.ctx.ladder.trade_in_flight() {
            return Err(LadderError::TradeInFlight.into());
        }

        let url = switch_market(&self.ctx, coin, self.is_running()).await?;
        self.ctx.target.set_coin(coin);
        self.ctx.document.update(|doc| doc.coin = coin).await?;
        info!(coin = %coin, url = %url, "Coin selected");
        Ok(url)
    }

    /// Change the default target price and re-arm level 1.
    #[instrument(skip(self))]
    pub async fn set_default_price(&self, price: Decimal) -> Result<(), BotError> {
        self.ctx.ladder.set_default_price(price).await?;
        self.ctx.persist_ladder().await;
        Ok(())
    }

    /// Reset the ladder; returns whether the reset was counted.
    #[instrument(skip(self))]
    pub async fn reset(&self) -> Result<bool, BotError> {
        let counted = self.ctx.ladder.reset().await?;
        self.ctx.persist_ladder().await;
        Ok(counted)
    }

    /// Current state of the whole bot.
    pub async fn status(&self) -> StatusReport {
        let doc = self.ctx.document.get().await;
        StatusReport {
            running: self.is_running(),
            connection: self.supervisor.state(),
            restarting: self.supervisor.is_restarting(),
            url: self.ctx.target.url(),
            coin: self.ctx.target.coin(),
            amount_settings: doc.amounts,
            ladder: self.ctx.ladder.snapshot().await,
            tasks: self.scheduler.states(),
            reference: self.ctx.reference.snapshot(),
        }
    }

    /// Stop on process shutdown, ignoring "not running".
    pub async fn shutdown(&self) {
        if let Err(e) = self.stop().await {
            if !matches!(e, BotError::Rejected(_)) {
                warn!(error = %e, "Error while stopping");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::market::{MockCall, Side};
    use crate::monitors::names;
    use crate::monitors::testing::{fixture, Fixture, URL};
    use crate::retry::RetryPolicy;
    use crate::supervisor::{RecoveryOutcome, SessionLauncher};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use rust_decimal_macros::dec;
    use tokio_test::{assert_err, assert_ok};

    pub(crate) fn controller(f: &Fixture) -> Controller {
        let supervisor = Arc::new(ConnectionSupervisor::new(
            f.market.clone(),
            f.scheduler.clone(),
            f.ctx.ladder.clone(),
            f.ctx.alerts.clone(),
            f.ctx.target.clone(),
            RetryPolicy::from_millis(2, 1),
        ));
        Controller::new(f.ctx.clone(), f.scheduler.clone(), supervisor)
    }

    #[tokio::test]
    async fn start_then_stop() {
        let f = fixture("ctl-start", vec![], "");
        let ctl = controller(&f);

        assert_ok!(ctl.start().await);
        assert!(ctl.is_running());
        assert!(f.ctx.ladder.snapshot().await.active);
        assert!(f.market.calls().contains(&MockCall::Connect(URL.to_string())));
        assert!(f.scheduler.next_fire(names::PRICE_POLL).is_some());
        assert!(matches!(ctl.start().await, Err(BotError::Rejected(_))));

        assert_ok!(ctl.stop().await);
        assert!(!ctl.is_running());
        assert!(!f.ctx.ladder.snapshot().await.active);
        assert_eq!(f.scheduler.next_fire(names::PRICE_POLL), None);
        assert!(matches!(ctl.stop().await, Err(BotError::Rejected(_))));
    }

    struct SlowRelaunch;

    #[async_trait]
    impl SessionLauncher for SlowRelaunch {
        async fn relaunch(&self) -> Result<(), BotError> {
            tokio::time::sleep(Duration::from_millis(60)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn stop_during_recovery_keeps_monitors_stopped() {
        let f = fixture("ctl-stop-recover", vec![], "");
        let supervisor = Arc::new(
            ConnectionSupervisor::new(
                f.market.clone(),
                f.scheduler.clone(),
                f.ctx.ladder.clone(),
                f.ctx.alerts.clone(),
                f.ctx.target.clone(),
                RetryPolicy::from_millis(2, 1),
            )
            .with_launcher(Arc::new(SlowRelaunch)),
        );
        let ctl = Controller::new(f.ctx.clone(), f.scheduler.clone(), supervisor.clone());
        assert_ok!(ctl.start().await);

        let recovery = tokio::spawn({
            let supervisor = supervisor.clone();
            async move { supervisor.recover("price-poll: session gone").await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_ok!(ctl.stop().await);

        assert_eq!(recovery.await.unwrap(), RecoveryOutcome::Recovered(1));
        assert!(!ctl.is_running());
        assert!(f.ctx.stop.is_set());
        assert_eq!(ctl.connection_state(), ConnectionState::Connected);
        for name in f.scheduler.task_names() {
            assert_eq!(f.scheduler.next_fire(name), None, "{} rescheduled", name);
        }
    }

    #[tokio::test]
    async fn set_amounts_persists_and_applies() {
        let f = fixture("ctl-amounts", vec![], "");
        let ctl = controller(&f);
        let settings = AmountSettings {
            initial_amount_pct: dec!(1),
            ..AmountSettings::default()
        };

        let amounts = ctl.set_amounts(settings).await.unwrap();

        assert_eq!(amounts.l1, dec!(10));
        assert_eq!(amounts.l2, dec!(22));
        assert_eq!(f.ctx.document.get().await.amounts.initial_amount_pct, dec!(1));
        assert_eq!(f.ctx.ladder.snapshot().await.level(Side::Up, 1).stake, Some(dec!(10)));
    }

    #[tokio::test]
    async fn set_amounts_rejects_zero_percentage() {
        let f = fixture("ctl-amounts-bad", vec![], "");
        let ctl = controller(&f);
        let settings = AmountSettings {
            n_rebound_pct: dec!(0),
            ..AmountSettings::default()
        };

        assert_err!(ctl.set_amounts(settings).await);
        assert_eq!(f.ctx.document.get().await.amounts, AmountSettings::default());
    }

    #[tokio::test]
    async fn select_coin_while_stopped_does_not_navigate() {
        let next = "https://polymarket.com/event/ethereum-up-or-down-on-october-19";
        let f = fixture("ctl-coin", vec![], next);
        let ctl = controller(&f);

        let url = ctl.select_coin(Coin::Eth).await.unwrap();

        assert_eq!(url, next);
        assert_eq!(f.ctx.target.coin(), Coin::Eth);
        assert_eq!(f.ctx.target.url(), next);
        assert_eq!(f.ctx.document.get().await.coin, Coin::Eth);
        assert!(!f.market.calls().iter().any(|c| matches!(c, MockCall::Navigate(_))));
    }

    #[tokio::test]
    async fn default_price_and_reset() {
        let f = fixture("ctl-reset", vec![], "");
        let ctl = controller(&f);

        assert!(ctl.set_default_price(dec!(120)).await.is_err());
        ctl.set_default_price(dec!(50)).await.unwrap();
        assert_eq!(f.ctx.document.get().await.default_target_price, dec!(50));

        assert!(ctl.reset().await.unwrap());
        let status = ctl.status().await;
        assert_eq!(status.ladder.reset_count, 1);
        assert_eq!(status.ladder.level(Side::Down, 1).target_price, dec!(50));
        assert_eq!(status.connection, ConnectionState::Connected);
        assert_eq!(status.tasks.len(), 10);
    }
}
