//! Wall-clock anchored tasks: snapshots, variance check, auto-discovery.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use super::{names, MonitorContext};
use crate::error::{BotError, FeedError};
use crate::feed::fetch_with_retry;
use crate::market::{slug_from_url, Coin};
use crate::notify::Alert;
use crate::retry::RetryPolicy;
use crate::scheduler::Monitor;

/// Captures the day's cash and recomputes the stake schedule.
#[derive(Debug)]
pub struct CashSnapshot {
    ctx: Arc<MonitorContext>,
}

impl CashSnapshot {
    /// Create the task.
    pub fn new(ctx: Arc<MonitorContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Monitor for CashSnapshot {
    fn name(&self) -> &'static str {
        names::CASH_SNAPSHOT
    }

    #[instrument(skip(self), name = "cash_snapshot")]
    async fn run(&self) -> Result<(), BotError> {
        let cash = self.ctx.market.get_cash_balance().await?;
        self.ctx.ladder.set_cash_snapshot(cash).await;
        info!(cash = %cash, "Cash snapshot captured");

        let pcts = self.ctx.document.get().await.amounts;
        self.ctx
            .ladder
            .refresh_amounts(
                pcts.initial_amount_pct,
                pcts.first_rebound_pct,
                pcts.n_rebound_pct,
            )
            .await?;
        self.ctx.persist_ladder().await;
        Ok(())
    }
}

fn reference_policy(ctx: &MonitorContext) -> RetryPolicy {
    RetryPolicy::from_millis(ctx.config.reference_retry_attempts, 2000)
}

/// Stores the reference price at the start of the day.
#[derive(Debug)]
pub struct PriceSnapshot {
    ctx: Arc<MonitorContext>,
    policy: RetryPolicy,
}

impl PriceSnapshot {
    /// Create the task.
    pub fn new(ctx: Arc<MonitorContext>) -> Self {
        let policy = reference_policy(&ctx);
        Self { ctx, policy }
    }

    /// Override the retry budget.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Monitor for PriceSnapshot {
    fn name(&self) -> &'static str {
        names::PRICE_SNAPSHOT
    }

    async fn run(&self) -> Result<(), BotError> {
        let symbol = self.ctx.target.coin().ticker_symbol();
        let price = fetch_with_retry(self.ctx.feed.as_ref(), &symbol, self.policy, Some(&self.ctx.stop))
            .await
            .ok_or(FeedError::Closed)?;
        self.ctx.reference.set_zero(&symbol, price);
        Ok(())
    }
}

/// Alerts when the reference price barely moved since the zero price.
#[derive(Debug)]
pub struct VarianceCheck {
    ctx: Arc<MonitorContext>,
    policy: RetryPolicy,
}

impl VarianceCheck {
    /// Create the task.
    pub fn new(ctx: Arc<MonitorContext>) -> Self {
        let policy = reference_policy(&ctx);
        Self { ctx, policy }
    }

    /// Override the retry budget.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Monitor for VarianceCheck {
    fn name(&self) -> &'static str {
        names::VARIANCE_CHECK
    }

    async fn run(&self) -> Result<(), BotError> {
        let snapshot = self.ctx.reference.snapshot();
        let Some(zero) = snapshot.zero_price else {
            warn!("No zero price captured today, skipping variance check");
            return Ok(());
        };

        let symbol = snapshot.symbol.clone();
        let price = fetch_with_retry(self.ctx.feed.as_ref(), &symbol, self.policy, Some(&self.ctx.stop))
            .await
            .ok_or(FeedError::Closed)?;
        self.ctx.reference.set_last(price);

        let Some(change) = self.ctx.reference.snapshot().change_pct() else {
            return Ok(());
        };
        info!(symbol = %symbol, zero = %zero, now = %price, change_pct = %change, "Variance check");

        if change <= self.ctx.config.variance_threshold_pct {
            self.ctx.alerts.dispatch(Alert::low_variance(
                &self.ctx.alerts.context(),
                &symbol,
                zero,
                price,
                change,
            ));
        }
        Ok(())
    }
}

/// Find today's market for `coin`, point the session and the document at it.
///
/// Navigation is skipped when `navigate` is false, for a session that is not
/// open yet.
pub async fn switch_market(
    ctx: &MonitorContext,
    coin: Coin,
    navigate: bool,
) -> Result<String, BotError> {
    let date = ctx.clock.now().date();
    let url = ctx.discovery.find_daily_market(coin, date).await?;

    if navigate {
        ctx.market.navigate(&url).await?;
    }
    ctx.target.set_url(url.clone());
    ctx.document.update(|doc| doc.record_url(&url)).await?;
    if let Some(slug) = slug_from_url(&url) {
        ctx.alerts.set_pair(slug);
    }
    Ok(url)
}

/// Switches the session to the day's market for the selected coin.
#[derive(Debug)]
pub struct AutoDiscovery {
    ctx: Arc<MonitorContext>,
}

impl AutoDiscovery {
    /// Create the task.
    pub fn new(ctx: Arc<MonitorContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Monitor for AutoDiscovery {
    fn name(&self) -> &'static str {
        names::AUTO_DISCOVERY
    }

    #[instrument(skip(self), name = "auto_discovery")]
    async fn run(&self) -> Result<(), BotError> {
        if self.ctx.ladder.trade_in_flight() {
            info!("Trade in flight, skipping market discovery");
            return Ok(());
        }

        self.ctx.with_scheduler(|s| {
            s.disable(names::URL_DRIFT);
            s.disable(names::PAGE_REFRESH);
        });

        let result = switch_market(&self.ctx, self.ctx.target.coin(), true).await;

        self.ctx.with_scheduler(|s| {
            s.enable(names::URL_DRIFT);
            s.enable(names::PAGE_REFRESH);
        });

        let url = result?;
        info!(url = %url, "Switched to today's market");
        self.ctx
            .alerts
            .dispatch(Alert::market_switched(&self.ctx.alerts.context(), &url));
        Ok(())
    }
}
