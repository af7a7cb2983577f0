//! Scripted market interface for tests.
//!
//! [`MockMarket`] keeps a tiny in-memory ledger, records every call, and can
//! be told to drop buy confirmations, fail connects or report a lost session.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use time::OffsetDateTime;

use crate::error::MarketError;

use super::types::{Quote, Side, TradeAction, TradeRecord};
use super::MarketInterface;

/// A recorded call against the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `buy(side, stake)`.
    Buy(Side, Decimal),
    /// `sell(side)`.
    Sell(Side),
    /// `sell_partial(side, shares)`.
    SellPartial(Side, Decimal),
    /// `navigate(url)`.
    Navigate(String),
    /// `refresh()`.
    Refresh,
    /// `login()`.
    Login,
    /// `connect(url)`.
    Connect(String),
    /// `teardown()`.
    Teardown,
}

/// Configuration for mock behavior.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Starting cash.
    pub cash: Decimal,
    /// Simulated latency of buy/sell calls.
    pub trade_latency: Duration,
}

#[derive(Debug, Default)]
struct MockState {
    quote: Option<Quote>,
    cash: Decimal,
    positions: HashMap<Side, Decimal>,
    history: Vec<TradeRecord>,
    unconfirmed_trades: u32,
    connect_failures: u32,
    quote_connectivity_failure: bool,
    trade_connectivity_failure: bool,
    partial_sell_connectivity_failure: bool,
    session_alive: bool,
    login_failure: bool,
    url: Option<String>,
    failing_selectors: Vec<String>,
    calls: Vec<MockCall>,
}

/// Mock market for testing.
#[derive(Debug)]
pub struct MockMarket {
    config: MockConfig,
    state: Mutex<MockState>,
}

impl MockMarket {
    /// Create a mock with no cash and no session.
    pub fn new() -> Self {
        Self::with_config(MockConfig::default())
    }

    /// Create a mock with custom configuration.
    pub fn with_config(config: MockConfig) -> Self {
        let state = MockState {
            cash: config.cash,
            session_alive: true,
            ..MockState::default()
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    /// Create a mock already connected to `url` with `cash`.
    pub fn connected(url: &str, cash: Decimal) -> Self {
        let mock = Self::with_config(MockConfig {
            cash,
            ..MockConfig::default()
        });
        mock.state().url = Some(url.to_string());
        mock
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        // A panic while holding the lock only happens inside a failing test.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Set the quote returned by `get_quote`.
    pub fn set_quote(&self, quote: Quote) {
        self.state().quote = Some(quote);
    }

    /// Make `get_quote` report a transient miss.
    pub fn clear_quote(&self) {
        self.state().quote = None;
    }

    /// Set the cash balance.
    pub fn set_cash(&self, cash: Decimal) {
        self.state().cash = cash;
    }

    /// Set a position directly.
    pub fn set_position(&self, side: Side, shares: Decimal) {
        self.state().positions.insert(side, shares);
    }

    /// Shares held on `side`.
    pub fn position(&self, side: Side) -> Decimal {
        self.state().positions.get(&side).copied().unwrap_or_default()
    }

    /// The next `n` buys/sells are accepted but never show up in history.
    pub fn drop_confirmations(&self, n: u32) {
        self.state().unconfirmed_trades = n;
    }

    /// The next `n` connects fail with a connectivity error.
    pub fn fail_connects(&self, n: u32) {
        self.state().connect_failures = n;
    }

    /// Make `get_quote` raise a connectivity error until cleared.
    pub fn set_quote_connectivity_failure(&self, failing: bool) {
        self.state().quote_connectivity_failure = failing;
    }

    /// Make buys and sells raise a connectivity error until cleared.
    pub fn set_trade_connectivity_failure(&self, failing: bool) {
        self.state().trade_connectivity_failure = failing;
    }

    /// Make only `sell_partial` raise a connectivity error until cleared.
    pub fn set_partial_sell_connectivity_failure(&self, failing: bool) {
        self.state().partial_sell_connectivity_failure = failing;
    }

    /// Set whether the session reports itself logged in.
    pub fn set_session_alive(&self, alive: bool) {
        self.state().session_alive = alive;
    }

    /// Make `login` raise a connectivity error until cleared.
    pub fn set_login_failure(&self, failing: bool) {
        self.state().login_failure = failing;
    }

    /// Set the URL the session points at, without recording a call.
    pub fn set_url(&self, url: &str) {
        self.state().url = Some(url.to_string());
    }

    /// Elements `check_selectors` reports as missing.
    pub fn set_failing_selectors(&self, names: &[&str]) {
        self.state().failing_selectors = names.iter().map(|n| n.to_string()).collect();
    }

    /// All calls recorded so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    /// Number of `buy` calls recorded.
    pub fn buy_calls(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| matches!(c, MockCall::Buy(..)))
            .count()
    }

    /// Trade history, newest first.
    pub fn history(&self) -> Vec<TradeRecord> {
        self.state().history.iter().rev().cloned().collect()
    }

    fn price_for(state: &MockState, side: Side, action: TradeAction) -> Decimal {
        let quote = state.quote.unwrap_or_default();
        match action {
            TradeAction::Bought => quote.buy_cost(side),
            TradeAction::Sold => quote.sell_value(side),
        }
    }

    fn record(&self, state: &mut MockState, action: TradeAction, side: Side, shares: Decimal) {
        if state.unconfirmed_trades > 0 {
            state.unconfirmed_trades -= 1;
            return;
        }

        let price = Self::price_for(state, side, action);
        let cents = Decimal::ONE_HUNDRED;
        match action {
            TradeAction::Bought => {
                *state.positions.entry(side).or_default() += shares;
                state.cash -= shares * price / cents;
            }
            TradeAction::Sold => {
                let held = state.positions.entry(side).or_default();
                let sold = shares.min(*held);
                *held -= sold;
                state.cash += shares * price / cents;
            }
        }
        state.history.push(TradeRecord {
            action,
            side,
            price,
            shares,
            at: OffsetDateTime::now_utc(),
        });
    }

    async fn latency(&self) {
        if !self.config.trade_latency.is_zero() {
            tokio::time::sleep(self.config.trade_latency).await;
        }
    }
}

impl Default for MockMarket {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketInterface for MockMarket {
    async fn get_quote(&self) -> Result<Quote, MarketError> {
        let state = self.state();
        if state.quote_connectivity_failure {
            return Err(MarketError::Connectivity("mock session lost".into()));
        }
        state
            .quote
            .ok_or_else(|| MarketError::Unavailable("no quote scripted".into()))
    }

    async fn get_cash_balance(&self) -> Result<Decimal, MarketError> {
        Ok(self.state().cash)
    }

    async fn get_portfolio_value(&self) -> Result<Decimal, MarketError> {
        let state = self.state();
        let quote = state.quote.unwrap_or_default();
        let marked: Decimal = state
            .positions
            .iter()
            .map(|(side, shares)| *shares * quote.sell_value(*side) / Decimal::ONE_HUNDRED)
            .sum();
        Ok(state.cash + marked)
    }

    async fn buy(&self, side: Side, stake: Decimal) -> Result<bool, MarketError> {
        self.latency().await;
        let mut state = self.state();
        state.calls.push(MockCall::Buy(side, stake));
        if state.trade_connectivity_failure {
            return Err(MarketError::Connectivity("mock session lost".into()));
        }

        let cost = Self::price_for(&state, side, TradeAction::Bought);
        if cost <= Decimal::ZERO {
            return Ok(false);
        }
        let shares = (stake * Decimal::ONE_HUNDRED / cost).round_dp(2);
        self.record(&mut state, TradeAction::Bought, side, shares);
        Ok(true)
    }

    async fn sell(&self, side: Side) -> Result<bool, MarketError> {
        self.latency().await;
        let mut state = self.state();
        state.calls.push(MockCall::Sell(side));
        if state.trade_connectivity_failure {
            return Err(MarketError::Connectivity("mock session lost".into()));
        }

        let held = state.positions.get(&side).copied().unwrap_or_default();
        if held <= Decimal::ZERO {
            return Ok(false);
        }
        self.record(&mut state, TradeAction::Sold, side, held);
        Ok(true)
    }

    async fn sell_partial(&self, side: Side, shares: Decimal) -> Result<bool, MarketError> {
        self.latency().await;
        let mut state = self.state();
        state.calls.push(MockCall::SellPartial(side, shares));
        if state.trade_connectivity_failure || state.partial_sell_connectivity_failure {
            return Err(MarketError::Connectivity("mock session lost".into()));
        }

        let held = state.positions.get(&side).copied().unwrap_or_default();
        if held <= Decimal::ZERO || shares <= Decimal::ZERO {
            return Ok(false);
        }
        self.record(&mut state, TradeAction::Sold, side, shares.min(held));
        Ok(true)
    }

    async fn has_open_position(&self, side: Side) -> Result<bool, MarketError> {
        Ok(self.position(side) > Decimal::ZERO)
    }

    async fn recent_trades(&self) -> Result<Vec<TradeRecord>, MarketError> {
        Ok(self.history())
    }

    async fn is_session_alive(&self) -> Result<bool, MarketError> {
        Ok(self.state().session_alive)
    }

    async fn login(&self) -> Result<(), MarketError> {
        let mut state = self.state();
        state.calls.push(MockCall::Login);
        if state.login_failure {
            return Err(MarketError::Connectivity("mock login page unreachable".into()));
        }
        state.session_alive = true;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, MarketError> {
        self.state().url.clone().ok_or(MarketError::NoSession)
    }

    async fn navigate(&self, url: &str) -> Result<(), MarketError> {
        let mut state = self.state();
        state.calls.push(MockCall::Navigate(url.to_string()));
        state.url = Some(url.to_string());
        Ok(())
    }

    async fn refresh(&self) -> Result<(), MarketError> {
        self.state().calls.push(MockCall::Refresh);
        Ok(())
    }

    async fn check_selectors(&self) -> Result<Vec<String>, MarketError> {
        Ok(self.state().failing_selectors.clone())
    }

    async fn connect(&self, url: &str) -> Result<(), MarketError> {
        let mut state = self.state();
        state.calls.push(MockCall::Connect(url.to_string()));
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(MarketError::Connectivity("mock connect refused".into()));
        }
        state.url = Some(url.to_string());
        state.session_alive = true;
        state.quote_connectivity_failure = false;
        state.trade_connectivity_failure = false;
        Ok(())
    }

    async fn teardown(&self) {
        let mut state = self.state();
        state.calls.push(MockCall::Teardown);
        state.url = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn quote() -> Quote {
        Quote {
            ask_price: dec!(50),
            bid_price: dec!(48),
            ask_shares: dec!(200),
            bid_shares: dec!(200),
        }
    }

    #[tokio::test]
    async fn buy_records_history_and_position() {
        let mock = MockMarket::connected("https://polymarket.com/event/x", dec!(100));
        mock.set_quote(quote());

        assert!(mock.buy(Side::Up, dec!(10)).await.unwrap());
        assert_eq!(mock.position(Side::Up), dec!(20));
        assert_eq!(mock.get_cash_balance().await.unwrap(), dec!(90));

        let history = mock.recent_trades().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, TradeAction::Bought);
    }

    #[tokio::test]
    async fn dropped_confirmations_leave_no_record() {
        let mock = MockMarket::connected("https://polymarket.com/event/x", dec!(100));
        mock.set_quote(quote());
        mock.drop_confirmations(1);

        assert!(mock.buy(Side::Down, dec!(5)).await.unwrap());
        assert!(mock.recent_trades().await.unwrap().is_empty());
        assert!(mock.buy(Side::Down, dec!(5)).await.unwrap());
        assert_eq!(mock.recent_trades().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn quote_errors_are_classified() {
        let mock = MockMarket::new();
        assert!(mock.get_quote().await.unwrap_err().is_transient());

        mock.set_quote_connectivity_failure(true);
        assert!(mock.get_quote().await.unwrap_err().is_connectivity());
    }

    #[tokio::test]
    async fn connect_failures_are_counted_down() {
        let mock = MockMarket::new();
        mock.fail_connects(1);
        assert!(mock.connect("u").await.is_err());
        assert!(mock.connect("u").await.is_ok());
        assert_eq!(mock.current_url().await.unwrap(), "u");
    }
}
