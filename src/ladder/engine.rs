//! Trade ladder: turns quotes into buys, exits and resets.
//!
//! One tick is evaluated at a time. The trade guard is claimed before
//! anything else, so a tick arriving while a buy/sell sequence is still
//! resolving is deferred rather than queued. Within a tick, buy levels are
//! checked 1 through 4 (Up before Down at each level), then the level-5
//! exits, and the first satisfied condition is the only one acted on.

use std::future::Future;
use std::sync::Arc;

use rust_decimal::Decimal;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use super::amounts::{compute_ladder_amounts, percent, LadderAmounts};
use super::matcher::matches;
use super::state::{FillPrices, LadderState, LevelState, LEVELS};
use crate::config::Config;
use crate::error::{BotError, LadderError, MarketError};
use crate::market::{ExitLiquidity, MarketInterface, Quote, Side, TradeAction};
use crate::metrics;
use crate::notify::{Alert, Alerts};
use crate::retry::{Attempt, RetryOutcome, RetryPolicy};
use crate::sync::{ExclusiveFlag, StopSignal};

/// History entries inspected when confirming a trade.
const VERIFY_DEPTH: usize = 5;

/// Inclusive price band in cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceBand {
    /// Lower bound.
    pub low: Decimal,
    /// Upper bound.
    pub high: Decimal,
}

impl PriceBand {
    /// Create a band.
    pub fn new(low: Decimal, high: Decimal) -> Self {
        Self { low, high }
    }

    /// Whether `value` lies within the band.
    pub fn contains(&self, value: Decimal) -> bool {
        value >= self.low && value <= self.high
    }
}

/// Level-5 exit bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitBands {
    /// Up level-5 targets eligible for the rebound exit.
    pub up_rebound: PriceBand,
    /// Down level-5 targets eligible for the rebound exit.
    pub down_rebound: PriceBand,
    /// Live-minus-target delta accepted by the rebound exit.
    pub rebound_delta: PriceBand,
    /// Minimum level-5 target for the normal exit.
    pub normal_min: Decimal,
    /// Live-minus-target delta accepted by the normal exit.
    pub normal_delta: PriceBand,
    /// Book whose depth gates the exit.
    pub liquidity: ExitLiquidity,
}

impl ExitBands {
    fn rebound(&self, side: Side) -> PriceBand {
        match side {
            Side::Up => self.up_rebound,
            Side::Down => self.down_rebound,
        }
    }
}

/// Quote sanity limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteGuards {
    /// Buys need the ask above this.
    pub buy_min_ask: Decimal,
    /// Buys need the bid below this.
    pub buy_max_bid: Decimal,
    /// Up exits need the bid above this.
    pub up_exit_min_bid: Decimal,
    /// Down exits need the ask below this.
    pub down_exit_max_ask: Decimal,
}

impl QuoteGuards {
    fn allows_buys(&self, quote: &Quote) -> bool {
        quote.ask_price > self.buy_min_ask && quote.bid_price < self.buy_max_bid
    }

    fn allows_exit(&self, quote: &Quote, side: Side) -> bool {
        match side {
            Side::Up => quote.bid_price > self.up_exit_min_bid,
            Side::Down => quote.ask_price < self.down_exit_max_ask,
        }
    }
}

/// Strategy constants the ladder runs with.
#[derive(Debug, Clone)]
pub struct LadderParams {
    /// Matcher tolerance in cents.
    pub premium: Decimal,
    /// Minimum shares for Up quotes.
    pub up_min_shares: Decimal,
    /// Minimum shares for Down quotes.
    pub down_min_shares: Decimal,
    /// Initial default target price.
    pub default_target_price: Decimal,
    /// Level-5 price after a level-4 fill.
    pub rebound_sell: Decimal,
    /// Level-5 price after a level-1 fill.
    pub safe_sell: Decimal,
    /// Exit bands.
    pub bands: ExitBands,
    /// Quote sanity limits.
    pub guards: QuoteGuards,
    /// Budget for confirming one buy or sell.
    pub trade_retry: RetryPolicy,
    /// Budget for computing amounts from a lagging cash reading.
    pub amount_retry: RetryPolicy,
}

impl LadderParams {
    /// Build from runtime settings.
    pub fn from_config(config: &Config) -> Self {
        Self {
            premium: config.price_premium,
            up_min_shares: config.up_min_shares,
            down_min_shares: config.down_min_shares,
            default_target_price: config.default_target_price,
            rebound_sell: config.rebound_sell_price,
            safe_sell: config.safe_sell_price,
            bands: ExitBands {
                up_rebound: PriceBand::new(config.up_rebound_low, config.up_rebound_high),
                down_rebound: PriceBand::new(config.down_rebound_low, config.down_rebound_high),
                rebound_delta: PriceBand::new(config.rebound_delta_low, config.rebound_delta_high),
                normal_min: config.normal_exit_min,
                normal_delta: PriceBand::new(config.normal_delta_low, config.normal_delta_high),
                liquidity: config.exit_liquidity,
            },
            guards: QuoteGuards {
                buy_min_ask: config.buy_min_ask,
                buy_max_bid: config.buy_max_bid,
                up_exit_min_bid: config.up_exit_min_bid,
                down_exit_max_ask: config.down_exit_max_ask,
            },
            trade_retry: RetryPolicy::from_millis(
                config.trade_retry_attempts,
                config.trade_retry_delay_ms,
            ),
            amount_retry: RetryPolicy::from_millis(config.amount_retry_attempts, 2000),
        }
    }
}

/// Which level-5 policy fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Price came back into the rebound band.
    Rebound,
    /// Price reached the high threshold.
    Normal,
}

/// What a tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The ladder is not active.
    Inactive,
    /// Another sequence holds the trade guard.
    Deferred,
    /// No condition held.
    NoAction,
    /// A buy level executed and verified.
    Bought {
        /// Side bought.
        side: Side,
        /// Level filled.
        level: u8,
    },
    /// A buy level triggered but never verified.
    BuyAbandoned {
        /// Side attempted.
        side: Side,
        /// Level attempted.
        level: u8,
    },
    /// A level-5 exit completed.
    Exited {
        /// Side sold.
        side: Side,
        /// Policy that fired.
        kind: ExitKind,
    },
    /// A level-5 exit triggered but the main sell never verified.
    ExitAbandoned {
        /// Side attempted.
        side: Side,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Buy(Side, u8),
    Exit(Side, ExitKind),
}

/// The ladder state machine.
pub struct TradeLadder {
    market: Arc<dyn MarketInterface>,
    alerts: Alerts,
    params: LadderParams,
    state: RwLock<LadderState>,
    trade_guard: ExclusiveFlag,
    stop: StopSignal,
}

impl std::fmt::Debug for TradeLadder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeLadder")
            .field("params", &self.params)
            .field("trade_in_flight", &self.trade_guard.is_held())
            .finish()
    }
}

impl TradeLadder {
    /// Create an inactive ladder with every level disabled.
    pub fn new(
        market: Arc<dyn MarketInterface>,
        alerts: Alerts,
        params: LadderParams,
        stop: StopSignal,
    ) -> Self {
        let state = LadderState::new(
            params.default_target_price,
            params.up_min_shares,
            params.down_min_shares,
        );
        Self {
            market,
            alerts,
            params,
            state: RwLock::new(state),
            trade_guard: ExclusiveFlag::new(),
            stop,
        }
    }

    /// Strategy constants.
    pub fn params(&self) -> &LadderParams {
        &self.params
    }

    /// Whether a buy/sell sequence is resolving.
    pub fn trade_in_flight(&self) -> bool {
        self.trade_guard.is_held()
    }

    /// Copy of the current state.
    pub async fn snapshot(&self) -> LadderState {
        self.state.read().await.clone()
    }

    /// Mutate state outside of a tick (startup restore, persistence).
    pub async fn with_state<R>(&self, f: impl FnOnce(&mut LadderState) -> R) -> R {
        let mut state = self.state.write().await;
        f(&mut state)
    }

    /// Start or stop evaluating ticks.
    pub async fn set_active(&self, active: bool) {
        self.state.write().await.active = active;
    }

    /// Record the latest balances.
    pub async fn update_balances(&self, cash: Decimal, portfolio: Decimal) {
        let mut state = self.state.write().await;
        state.cash = Some(cash);
        state.portfolio = Some(portfolio);
    }

    /// Record the day's opening cash.
    pub async fn set_cash_snapshot(&self, cash: Decimal) {
        self.state.write().await.cash_snapshot = Some(cash);
    }

    /// Change the default target price and re-arm level 1 on both sides.
    pub async fn set_default_price(&self, price: Decimal) -> Result<(), LadderError> {
        if price <= Decimal::ZERO || price >= Decimal::ONE_HUNDRED {
            return Err(LadderError::InvalidPrice(price));
        }
        let mut state = self.state.write().await;
        state.default_target_price = price;
        state.arm_entry();
        info!(price = %price, "Default target price updated");
        Ok(())
    }

    /// Write stakes into levels 1-4 and arm level 1 at the default price.
    pub async fn apply_amounts(&self, amounts: LadderAmounts) {
        let mut state = self.state.write().await;
        state.apply_amounts(amounts);
        state.arm_entry();
        info!(
            l1 = %amounts.l1, l2 = %amounts.l2, l3 = %amounts.l3, l4 = %amounts.l4,
            "Ladder amounts applied"
        );
    }

    /// Compute stakes from the cash snapshot (or live cash) and apply them.
    ///
    /// Percentages are in percent (`2.5` for 2.5%). The cash reading can lag
    /// behind the snapshot task, so a non-positive reading is retried.
    #[instrument(skip(self))]
    pub async fn refresh_amounts(
        &self,
        initial_pct: Decimal,
        first_rebound_pct: Decimal,
        n_rebound_pct: Decimal,
    ) -> Result<LadderAmounts, BotError> {
        let outcome = self
            .params
            .amount_retry
            .run("amounts", Some(&self.stop), |_| async move {
                let snapshot = self.state.read().await.cash_snapshot;
                let cash = match snapshot {
                    Some(cash) if cash > Decimal::ZERO => cash,
                    _ => match self.market.get_cash_balance().await {
                        Ok(cash) => cash,
                        Err(e) => return Attempt::Retry(e.to_string()),
                    },
                };

                match compute_ladder_amounts(
                    cash,
                    percent(initial_pct),
                    percent(first_rebound_pct),
                    percent(n_rebound_pct),
                ) {
                    Ok(amounts) => Attempt::Done(amounts),
                    Err(LadderError::InvalidInput(reason)) if cash <= Decimal::ZERO => {
                        Attempt::Retry(reason)
                    }
                    Err(e) => Attempt::Abort(e),
                }
            })
            .await;

        match outcome {
            RetryOutcome::Succeeded { value, .. } => {
                self.apply_amounts(value).await;
                Ok(value)
            }
            RetryOutcome::Aborted(e) => Err(e.into()),
            RetryOutcome::Exhausted { attempts, .. } | RetryOutcome::Stopped { attempts } => {
                warn!(attempts, "Cash balance never became usable");
                Err(LadderError::CashUnavailable { attempts }.into())
            }
        }
    }

    /// Operator reset; fails if a trade is resolving.
    pub async fn reset(&self) -> Result<bool, LadderError> {
        let _permit = self
            .trade_guard
            .try_acquire()
            .ok_or(LadderError::TradeInFlight)?;
        Ok(self.reset_locked("Manual reset").await)
    }

    async fn reset_locked(&self, event: &str) -> bool {
        let (counted, summary, price) = {
            let mut state = self.state.write().await;
            let counted = state.reset();
            (counted, state.summary(), state.default_target_price)
        };

        metrics::inc_ladder_resets(counted);
        info!(counted, reset_count = summary.reset_count, "Ladder reset");
        self.alerts.dispatch(Alert::trade(
            &self.alerts.context(),
            event,
            price,
            None,
            &summary,
        ));
        counted
    }

    /// Evaluate one quote.
    #[instrument(skip(self, quote), fields(ask = %quote.ask_price, bid = %quote.bid_price))]
    pub async fn on_tick(&self, quote: Quote) -> Result<TickOutcome, BotError> {
        let Some(_permit) = self.trade_guard.try_acquire() else {
            debug!("Trade in flight, deferring tick");
            return Ok(TickOutcome::Deferred);
        };
        let _timer = metrics::timer_tick();

        let decisions = {
            let state = self.state.read().await;
            if !state.active {
                return Ok(TickOutcome::Inactive);
            }
            self.decide(&state, &quote)
        };

        for decision in decisions {
            match decision {
                Decision::Buy(side, level) => return self.execute_buy(side, level).await,
                Decision::Exit(side, kind) => {
                    if !self.market.has_open_position(side).await? {
                        debug!(side = %side, "Exit condition without a position");
                        continue;
                    }
                    return self.execute_exit(side, kind).await;
                }
            }
        }

        Ok(TickOutcome::NoAction)
    }

    /// Candidate actions in priority order: at most one buy, else the exits.
    fn decide(&self, state: &LadderState, quote: &Quote) -> Vec<Decision> {
        if self.params.guards.allows_buys(quote) {
            for n in 1..LEVELS {
                for side in Side::ALL {
                    let level = state.level(side, n);
                    if level.is_live()
                        && matches(
                            quote.ask_price,
                            quote.bid_price,
                            level.target_price,
                            side,
                            quote.entry_shares(side),
                            level.min_liquidity,
                            self.params.premium,
                        )
                    {
                        return vec![Decision::Buy(side, n)];
                    }
                }
            }
        }

        Side::ALL
            .into_iter()
            .filter_map(|side| self.exit_kind(state, quote, side).map(|k| Decision::Exit(side, k)))
            .collect()
    }

    fn exit_kind(&self, state: &LadderState, quote: &Quote, side: Side) -> Option<ExitKind> {
        let level = state.level(side, LEVELS);
        if !level.is_live() || !self.params.guards.allows_exit(quote, side) {
            return None;
        }
        if quote.exit_shares(side, self.params.bands.liquidity) <= level.min_liquidity {
            return None;
        }

        let target = level.target_price;
        let delta = quote.sell_value(side) - target;
        let bands = &self.params.bands;

        if bands.rebound(side).contains(target) && bands.rebound_delta.contains(delta) {
            Some(ExitKind::Rebound)
        } else if target >= bands.normal_min && bands.normal_delta.contains(delta) {
            Some(ExitKind::Normal)
        } else {
            None
        }
    }

    fn fill_prices(&self, state: &LadderState) -> FillPrices {
        FillPrices {
            default_price: state.default_target_price,
            rebound_sell: self.params.rebound_sell,
            safe_sell: self.params.safe_sell,
        }
    }

    async fn set_level_state(&self, side: Side, n: u8, to: LevelState) {
        self.state.write().await.level_mut(side, n).state = to;
    }

    #[instrument(skip(self), fields(side = %side, level))]
    async fn execute_buy(&self, side: Side, level: u8) -> Result<TickOutcome, BotError> {
        let (stake, target) = {
            let mut state = self.state.write().await;
            let lvl = state.level_mut(side, level);
            let stake = lvl.stake.unwrap_or_default();
            if stake <= Decimal::ZERO {
                warn!(side = %side, level, "Level triggered without a stake, skipping");
                return Ok(TickOutcome::NoAction);
            }
            lvl.state = LevelState::Triggered;
            (stake, lvl.target_price)
        };

        info!(side = %side, level, stake = %stake, target = %target, "Level triggered, buying");
        metrics::inc_trades_attempted();

        let label = format!("buy {}{}", side, level);
        let verified = match self
            .confirm(&label, TradeAction::Bought, side, || self.market.buy(side, stake))
            .await
        {
            Ok(verified) => verified,
            Err(e) => {
                self.set_level_state(side, level, LevelState::Armed).await;
                return Err(e);
            }
        };

        if !verified {
            self.set_level_state(side, level, LevelState::Armed).await;
            metrics::inc_trades_failed();
            warn!(side = %side, level, "Buy never verified, abandoning");
            return Ok(TickOutcome::BuyAbandoned { side, level });
        }

        let summary = {
            let mut state = self.state.write().await;
            let prices = self.fill_prices(&state);
            state.record_fill(side, level, prices);
            state.summary()
        };

        metrics::inc_trades_executed();
        info!(side = %side, level, trade_count = summary.trade_count, "Buy verified");
        self.alerts.dispatch(Alert::trade(
            &self.alerts.context(),
            &format!("Buy {}{}", side, level),
            target,
            Some(stake),
            &summary,
        ));

        Ok(TickOutcome::Bought { side, level })
    }

    #[instrument(skip(self), fields(side = %side, kind = ?kind))]
    async fn execute_exit(&self, side: Side, kind: ExitKind) -> Result<TickOutcome, BotError> {
        let target = {
            let mut state = self.state.write().await;
            let lvl = state.level_mut(side, LEVELS);
            lvl.state = LevelState::Triggered;
            lvl.target_price
        };
        info!(side = %side, kind = ?kind, target = %target, "Exit triggered, selling");

        let label = format!("sell {}", side);
        let sold = match self
            .confirm(&label, TradeAction::Sold, side, || self.market.sell(side))
            .await
        {
            Ok(sold) => sold,
            Err(e) => {
                self.set_level_state(side, LEVELS, LevelState::Armed).await;
                return Err(e);
            }
        };

        if !sold {
            self.set_level_state(side, LEVELS, LevelState::Armed).await;
            metrics::inc_trades_failed();
            warn!(side = %side, "Exit sell never verified, abandoning");
            return Ok(TickOutcome::ExitAbandoned { side });
        }

        self.record_sell(side, target).await;

        let follow_up = match kind {
            ExitKind::Rebound => self.finish_rebound(side).await,
            ExitKind::Normal => self.finish_normal(side).await,
        };

        if let Err(e) = follow_up {
            warn!(side = %side, error = %e, "Exit follow-up failed after the main sell");
            return Err(e);
        }

        Ok(TickOutcome::Exited { side, kind })
    }

    async fn record_sell(&self, side: Side, price: Decimal) {
        let summary = {
            let mut state = self.state.write().await;
            state.sell_count += 1;
            state.summary()
        };
        metrics::inc_sells();
        self.alerts.dispatch(Alert::trade(
            &self.alerts.context(),
            &format!("Sell {}", side),
            price,
            None,
            &summary,
        ));
    }

    /// Partial hedge sale, then a fresh cycle that keeps level 2 of `side`.
    async fn finish_rebound(&self, side: Side) -> Result<(), BotError> {
        let other = side.opposite();
        let (stake, default_price) = {
            let state = self.state.read().await;
            (
                state.level(other, 3).stake.unwrap_or_default(),
                state.default_target_price,
            )
        };

        let mut escalate = None;
        if default_price > Decimal::ZERO && stake > Decimal::ZERO {
            let shares = (stake / percent(default_price)).round_dp(2);
            let label = format!("sell partial {}", other);
            match self
                .confirm(&label, TradeAction::Sold, other, || {
                    self.market.sell_partial(other, shares)
                })
                .await
            {
                Ok(true) => self.record_sell(other, default_price).await,
                Ok(false) => warn!(side = %other, shares = %shares, "Partial sell never verified"),
                Err(e) => escalate = Some(e),
            }
        }

        let summary = {
            let mut state = self.state.write().await;
            let safe = self.params.safe_sell;
            state.level_mut(Side::Up, LEVELS).arm(safe);
            state.level_mut(Side::Down, LEVELS).arm(safe);
            state.reset_count += 1;
            state.trade_count = 0;
            state.sell_count = 0;
            state.level_mut(side, 2).arm(default_price);
            state.summary()
        };

        metrics::inc_ladder_resets(true);
        info!(side = %side, reset_count = summary.reset_count, "Rebound exit complete");
        self.alerts.dispatch(Alert::trade(
            &self.alerts.context(),
            &format!("Rebound {}", side),
            default_price,
            None,
            &summary,
        ));

        escalate.map_or(Ok(()), Err)
    }

    /// Close the opposite side if held, then reset the ladder.
    async fn finish_normal(&self, side: Side) -> Result<(), BotError> {
        let other = side.opposite();
        let mut escalate = None;

        match self.market.has_open_position(other).await {
            Ok(true) => {
                let label = format!("sell {}", other);
                match self
                    .confirm(&label, TradeAction::Sold, other, || self.market.sell(other))
                    .await
                {
                    Ok(true) => {
                        let price = self.state.read().await.level(other, LEVELS).target_price;
                        self.record_sell(other, price).await;
                    }
                    Ok(false) => warn!(side = %other, "Opposite sell never verified"),
                    Err(e) => escalate = Some(e),
                }
            }
            Ok(false) => {}
            Err(e) => escalate = Some(e.into()),
        }

        self.state.write().await.clear_buy_levels();
        self.reset_locked("Reset").await;

        escalate.map_or(Ok(()), Err)
    }

    /// Run `op` with bounded retries until the trade history confirms it.
    ///
    /// Returns `Ok(false)` when the budget is spent or the stop signal was
    /// raised, and the error when the session is lost.
    async fn confirm<F, Fut>(
        &self,
        label: &str,
        action: TradeAction,
        side: Side,
        op: F,
    ) -> Result<bool, BotError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<bool, MarketError>>,
    {
        let start = std::time::Instant::now();
        let outcome = self
            .params
            .trade_retry
            .run(label, Some(&self.stop), |attempt| {
                let started = OffsetDateTime::now_utc();
                let submitted = op();
                async move {
                    match submitted.await {
                        Err(e) if e.is_connectivity() => return Attempt::Abort(e),
                        Err(e) => return Attempt::Retry(e.to_string()),
                        Ok(false) => return Attempt::Retry("order not accepted".to_string()),
                        Ok(true) => {}
                    }

                    match self.market.recent_trades().await {
                        Ok(history) => {
                            let confirmed = history
                                .iter()
                                .take(VERIFY_DEPTH)
                                .any(|r| r.confirms(action, side, started));
                            if confirmed {
                                Attempt::Done(attempt)
                            } else {
                                Attempt::Retry(format!("no {} {} record yet", action, side))
                            }
                        }
                        Err(e) if e.is_connectivity() => Attempt::Abort(e),
                        Err(e) => Attempt::Retry(e.to_string()),
                    }
                }
            })
            .await;

        metrics::record_verify_latency(start);

        match outcome {
            RetryOutcome::Succeeded { attempts, .. } => {
                debug!(label, attempts, "Trade verified");
                Ok(true)
            }
            RetryOutcome::Exhausted {
                attempts,
                last_reason,
            } => {
                warn!(label, attempts, reason = %last_reason, "Trade verification exhausted");
                Ok(false)
            }
            RetryOutcome::Stopped { attempts } => {
                info!(label, attempts, "Stop requested during trade verification");
                Ok(false)
            }
            RetryOutcome::Aborted(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::mock::MockConfig;
    use crate::market::MockMarket;
    use crate::notify::MemoryNotifier;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn params() -> LadderParams {
        let mut params = LadderParams::from_config(&Config::default());
        params.trade_retry = RetryPolicy::from_millis(3, 1);
        params.amount_retry = RetryPolicy::from_millis(3, 1);
        params
    }

    fn amounts() -> LadderAmounts {
        LadderAmounts {
            l1: dec!(2.5),
            l2: dec!(5.5),
            l3: dec!(6.6),
            l4: dec!(7.92),
        }
    }

    async fn ladder_with(market: Arc<MockMarket>) -> (TradeLadder, Arc<MemoryNotifier>) {
        let notifier = Arc::new(MemoryNotifier::new());
        let alerts = Alerts::new(notifier.clone(), RetryPolicy::from_millis(2, 1), "test");
        let ladder = TradeLadder::new(market, alerts, params(), StopSignal::new());
        ladder.apply_amounts(amounts()).await;
        ladder.set_active(true).await;
        (ladder, notifier)
    }

    fn quote(ask: Decimal, bid: Decimal) -> Quote {
        Quote {
            ask_price: ask,
            bid_price: bid,
            ask_shares: dec!(500),
            bid_shares: dec!(500),
        }
    }

    #[tokio::test]
    async fn up_fill_arms_next_down_level() {
        let market = Arc::new(MockMarket::connected("u", dec!(100)));
        let (ladder, _) = ladder_with(market.clone()).await;

        let q = quote(dec!(53), dec!(60));
        market.set_quote(q);
        let outcome = ladder.on_tick(q).await.unwrap();

        assert_eq!(outcome, TickOutcome::Bought { side: Side::Up, level: 1 });
        let state = ladder.snapshot().await;
        assert_eq!(state.level(Side::Up, 1).state, LevelState::Consumed);
        assert_eq!(state.level(Side::Down, 2).target_price, dec!(52));
        assert_eq!(state.level(Side::Down, 1).target_price, dec!(0));
        assert_eq!(state.trade_count, 1);
        assert_eq!(market.buy_calls(), 1);
    }

    #[tokio::test]
    async fn down_fill_arms_next_up_level() {
        let market = Arc::new(MockMarket::connected("u", dec!(100)));
        let (ladder, _) = ladder_with(market.clone()).await;

        // Ask outside the Up band, bid at the Down target.
        let q = quote(dec!(58), dec!(50));
        market.set_quote(q);
        assert_eq!(
            ladder.on_tick(q).await.unwrap(),
            TickOutcome::Bought { side: Side::Down, level: 1 }
        );

        let q = quote(dec!(54), dec!(60));
        market.set_quote(q);
        assert_eq!(
            ladder.on_tick(q).await.unwrap(),
            TickOutcome::Bought { side: Side::Up, level: 2 }
        );

        let state = ladder.snapshot().await;
        assert_eq!(state.level(Side::Down, 3).target_price, dec!(52));
        assert_eq!(state.level(Side::Up, 2).state, LevelState::Consumed);
        assert_eq!(state.trade_count, 2);
    }

    #[tokio::test]
    async fn unverified_buy_retries_then_succeeds() {
        let market = Arc::new(MockMarket::connected("u", dec!(100)));
        let (ladder, _) = ladder_with(market.clone()).await;
        market.drop_confirmations(2);

        let q = quote(dec!(53), dec!(60));
        market.set_quote(q);
        let outcome = ladder.on_tick(q).await.unwrap();

        assert_eq!(outcome, TickOutcome::Bought { side: Side::Up, level: 1 });
        assert_eq!(market.buy_calls(), 3);
    }

    #[tokio::test]
    async fn exhausted_buy_leaves_state_untouched() {
        let market = Arc::new(MockMarket::connected("u", dec!(100)));
        let (ladder, _) = ladder_with(market.clone()).await;
        market.drop_confirmations(10);
        let before = ladder.snapshot().await;

        let q = quote(dec!(53), dec!(60));
        market.set_quote(q);
        let outcome = ladder.on_tick(q).await.unwrap();

        assert_eq!(outcome, TickOutcome::BuyAbandoned { side: Side::Up, level: 1 });
        assert_eq!(market.buy_calls(), 3);
        assert_eq!(ladder.snapshot().await, before);
    }

    #[tokio::test]
    async fn stop_signal_ends_retries_between_attempts() {
        let market = Arc::new(MockMarket::connected("u", dec!(100)));
        let notifier = Arc::new(MemoryNotifier::new());
        let stop = StopSignal::new();
        let alerts = Alerts::new(notifier, RetryPolicy::from_millis(2, 1), "test");
        let ladder = TradeLadder::new(market.clone(), alerts, params(), stop.clone());
        ladder.apply_amounts(amounts()).await;
        ladder.set_active(true).await;

        market.drop_confirmations(10);
        stop.trigger();
        let q = quote(dec!(53), dec!(60));
        market.set_quote(q);

        let outcome = ladder.on_tick(q).await.unwrap();
        assert_eq!(outcome, TickOutcome::BuyAbandoned { side: Side::Up, level: 1 });
        assert_eq!(market.buy_calls(), 0);
    }

    #[tokio::test]
    async fn quote_guards_block_buys() {
        let market = Arc::new(MockMarket::connected("u", dec!(100)));
        let (ladder, _) = ladder_with(market.clone()).await;

        assert_eq!(
            ladder.on_tick(quote(dec!(53), dec!(97))).await.unwrap(),
            TickOutcome::NoAction
        );
        assert_eq!(market.buy_calls(), 0);
    }

    #[tokio::test]
    async fn concurrent_ticks_execute_once() {
        let market = Arc::new(MockMarket::with_config(MockConfig {
            cash: dec!(100),
            trade_latency: Duration::from_millis(50),
        }));
        let (ladder, _) = ladder_with(market.clone()).await;

        let up = quote(dec!(53), dec!(60));
        let down = quote(dec!(58), dec!(50));
        market.set_quote(up);

        let (first, second) = tokio::join!(ladder.on_tick(up), ladder.on_tick(down));

        assert_eq!(first.unwrap(), TickOutcome::Bought { side: Side::Up, level: 1 });
        assert_eq!(second.unwrap(), TickOutcome::Deferred);
        assert_eq!(market.buy_calls(), 1);
        assert!(!ladder.trade_in_flight());
    }

    #[tokio::test]
    async fn connectivity_error_propagates_and_rearms() {
        let market = Arc::new(MockMarket::connected("u", dec!(100)));
        let (ladder, _) = ladder_with(market.clone()).await;
        market.set_trade_connectivity_failure(true);

        let q = quote(dec!(53), dec!(60));
        market.set_quote(q);
        let err = ladder.on_tick(q).await.unwrap_err();

        assert!(err.is_connectivity());
        assert_eq!(market.buy_calls(), 1);
        let state = ladder.snapshot().await;
        assert_eq!(state.level(Side::Up, 1).state, LevelState::Armed);
        assert_eq!(state.level(Side::Up, 1).target_price, dec!(52));
        assert_eq!(state.trade_count, 0);
    }

    #[tokio::test]
    async fn rebound_exit_sells_hedge_and_restarts_cycle() {
        let market = Arc::new(MockMarket::connected("u", dec!(1000)));
        let (ladder, notifier) = ladder_with(market.clone()).await;

        ladder
            .with_state(|s| {
                s.level_mut(Side::Up, 5).arm(dec!(47));
                s.level_mut(Side::Down, 5).arm(dec!(52));
                s.trade_count = 4;
            })
            .await;
        market.set_position(Side::Up, dec!(30));
        market.set_position(Side::Down, dec!(40));

        // Up bid 46 vs target 47: delta -1 inside the rebound band.
        let q = quote(dec!(48), dec!(46));
        market.set_quote(q);
        let outcome = ladder.on_tick(q).await.unwrap();

        assert_eq!(outcome, TickOutcome::Exited { side: Side::Up, kind: ExitKind::Rebound });
        assert_eq!(market.position(Side::Up), dec!(0));
        // 6.6 / 0.52 rounded to cents of a share.
        assert_eq!(market.position(Side::Down), dec!(40) - dec!(12.69));

        let state = ladder.snapshot().await;
        assert_eq!(state.level(Side::Up, 5).target_price, dec!(99));
        assert_eq!(state.level(Side::Down, 5).target_price, dec!(99));
        assert_eq!(state.level(Side::Up, 2).target_price, dec!(52));
        assert_eq!(state.reset_count, 1);
        assert_eq!(state.trade_count, 0);
        assert_eq!(state.sell_count, 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(notifier.subjects().iter().any(|s| s.contains("Rebound Up")));
    }

    #[tokio::test]
    async fn normal_exit_closes_both_sides_and_resets_cleanly() {
        let market = Arc::new(MockMarket::connected("u", dec!(1000)));
        let (ladder, _) = ladder_with(market.clone()).await;

        let q = quote(dec!(53), dec!(60));
        market.set_quote(q);
        ladder.on_tick(q).await.unwrap();
        market.set_position(Side::Down, dec!(5));

        // Market resolving Up: bid 99.5 against the safe target 99.
        let q = quote(dec!(99.8), dec!(99.5));
        market.set_quote(q);
        let outcome = ladder.on_tick(q).await.unwrap();

        assert_eq!(outcome, TickOutcome::Exited { side: Side::Up, kind: ExitKind::Normal });
        assert_eq!(market.position(Side::Up), dec!(0));
        assert_eq!(market.position(Side::Down), dec!(0));

        let state = ladder.snapshot().await;
        assert_eq!(state.reset_count, 0);
        assert_eq!(state.trade_count, 0);
        assert_eq!(state.level(Side::Up, 1).target_price, dec!(52));
        assert_eq!(state.level(Side::Down, 1).target_price, dec!(52));
        assert_eq!(state.level(Side::Up, 5).target_price, dec!(0));
    }

    #[tokio::test]
    async fn exit_liquidity_book_is_configurable() {
        // Down sells at 100 - 53 = 47 into a thin ask book.
        let thin_asks = Quote {
            ask_price: dec!(53),
            bid_price: dec!(50),
            ask_shares: dec!(50),
            bid_shares: dec!(500),
        };

        for (book, expected) in [
            (ExitLiquidity::Counterparty, TickOutcome::NoAction),
            (
                ExitLiquidity::Bids,
                TickOutcome::Exited { side: Side::Down, kind: ExitKind::Rebound },
            ),
        ] {
            let market = Arc::new(MockMarket::connected("u", dec!(1000)));
            let mut params = params();
            params.bands.liquidity = book;
            let alerts = Alerts::new(
                Arc::new(MemoryNotifier::new()),
                RetryPolicy::from_millis(1, 1),
                "test",
            );
            let ladder = TradeLadder::new(market.clone(), alerts, params, StopSignal::new());
            ladder
                .with_state(|s| s.level_mut(Side::Down, 5).arm(dec!(47)))
                .await;
            ladder.set_active(true).await;
            market.set_position(Side::Down, dec!(10));
            market.set_quote(thin_asks);

            assert_eq!(ladder.on_tick(thin_asks).await.unwrap(), expected, "book {}", book);
        }
    }

    #[tokio::test]
    async fn exit_without_position_is_skipped() {
        let market = Arc::new(MockMarket::connected("u", dec!(1000)));
        let (ladder, _) = ladder_with(market.clone()).await;
        ladder
            .with_state(|s| s.level_mut(Side::Up, 5).arm(dec!(99)))
            .await;

        let q = quote(dec!(99.8), dec!(99.5));
        market.set_quote(q);
        assert_eq!(ladder.on_tick(q).await.unwrap(), TickOutcome::NoAction);
    }

    #[tokio::test]
    async fn manual_reset_is_idempotent_on_counts() {
        let market = Arc::new(MockMarket::connected("u", dec!(100)));
        let (ladder, _) = ladder_with(market.clone()).await;
        let q = quote(dec!(53), dec!(60));
        market.set_quote(q);
        ladder.on_tick(q).await.unwrap();

        ladder.reset().await.unwrap();
        let first = ladder.snapshot().await;
        ladder.reset().await.unwrap();
        let second = ladder.snapshot().await;

        assert_eq!((first.trade_count, first.sell_count), (0, 0));
        assert_eq!((second.trade_count, second.sell_count), (0, 0));
        assert_eq!(first.level(Side::Up, 1), second.level(Side::Up, 1));
    }

    #[tokio::test]
    async fn refresh_amounts_uses_snapshot() {
        let market = Arc::new(MockMarket::connected("u", dec!(0)));
        let (ladder, _) = ladder_with(market.clone()).await;
        ladder.set_cash_snapshot(dec!(200)).await;

        let amounts = ladder
            .refresh_amounts(dec!(2.5), dec!(220), dec!(120))
            .await
            .unwrap();

        assert_eq!(amounts.l1, dec!(5));
        assert_eq!(ladder.snapshot().await.level(Side::Down, 4).stake, Some(dec!(15.84)));
    }

    #[tokio::test]
    async fn refresh_amounts_gives_up_on_zero_cash() {
        let market = Arc::new(MockMarket::connected("u", dec!(0)));
        let (ladder, _) = ladder_with(market).await;

        let err = ladder
            .refresh_amounts(dec!(2.5), dec!(220), dec!(120))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BotError::Ladder(LadderError::CashUnavailable { attempts: 3 })
        ));
    }

    #[tokio::test]
    async fn set_default_price_validates() {
        let market = Arc::new(MockMarket::connected("u", dec!(100)));
        let (ladder, _) = ladder_with(market).await;

        assert!(ladder.set_default_price(dec!(0)).await.is_err());
        assert!(ladder.set_default_price(dec!(100)).await.is_err());
        ladder.set_default_price(dec!(55)).await.unwrap();
        assert_eq!(ladder.snapshot().await.level(Side::Up, 1).target_price, dec!(55));
    }
}
