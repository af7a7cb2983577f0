//! Quote and balance polling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{names, MonitorContext};
use crate::error::{BotError, MarketError};
use crate::ladder::TickOutcome;
use crate::scheduler::Monitor;

/// Reads a quote and feeds it to the ladder.
#[derive(Debug)]
pub struct PricePoll {
    ctx: Arc<MonitorContext>,
}

impl PricePoll {
    /// Create the task.
    pub fn new(ctx: Arc<MonitorContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Monitor for PricePoll {
    fn name(&self) -> &'static str {
        names::PRICE_POLL
    }

    #[instrument(skip(self), name = "price_poll")]
    async fn run(&self) -> Result<(), BotError> {
        let timeout = Duration::from_millis(self.ctx.config.quote_timeout_ms);
        let quote = tokio::time::timeout(timeout, self.ctx.market.get_quote())
            .await
            .map_err(|_| MarketError::Unavailable("quote timed out".into()))??;

        let outcome = self.ctx.ladder.on_tick(quote).await;
        match &outcome {
            Ok(TickOutcome::Bought { .. } | TickOutcome::Exited { .. }) => {
                self.ctx.persist_ladder().await;
            }
            // An exit follow-up can fail after the ladder has already reset.
            Err(_) => self.ctx.persist_ladder().await,
            Ok(other) => debug!(outcome = ?other, "Tick evaluated"),
        }
        outcome.map(|_| ())
    }
}

/// Copies cash and portfolio value into the ladder state.
#[derive(Debug)]
pub struct BalancePoll {
    ctx: Arc<MonitorContext>,
}

impl BalancePoll {
    /// Create the task.
    pub fn new(ctx: Arc<MonitorContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Monitor for BalancePoll {
    fn name(&self) -> &'static str {
        names::BALANCE_POLL
    }

    async fn run(&self) -> Result<(), BotError> {
        let cash = self.ctx.market.get_cash_balance().await?;
        let portfolio = self.ctx.market.get_portfolio_value().await?;
        self.ctx.ladder.update_balances(cash, portfolio).await;
        Ok(())
    }
}
