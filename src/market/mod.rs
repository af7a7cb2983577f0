//! Market interface: quotes, execution and session state.
//!
//! The ladder and the monitors only see [`MarketInterface`]; how quotes are
//! sourced and orders placed is up to the implementation.

pub mod clob;
pub mod discovery;
pub mod mock;
pub mod types;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::MarketError;

pub use clob::ClobMarket;
pub use discovery::{clean_url, slug_from_url, GammaDiscovery, MarketDiscovery};
pub use mock::{MockCall, MockMarket};
pub use types::{Coin, ExitLiquidity, MarketSession, Quote, Side, TradeAction, TradeRecord};

/// Capability the trading core drives.
///
/// Implementations must report a lost session as
/// [`MarketError::Connectivity`] (or `NoSession`) and a quote that is simply
/// not there yet as [`MarketError::Unavailable`].
#[async_trait]
pub trait MarketInterface: Send + Sync {
    /// Current best prices and sizes.
    async fn get_quote(&self) -> Result<Quote, MarketError>;

    /// Cash available for new stakes.
    async fn get_cash_balance(&self) -> Result<Decimal, MarketError>;

    /// Cash plus marked value of open positions.
    async fn get_portfolio_value(&self) -> Result<Decimal, MarketError>;

    /// Spend `stake` on `side`. `true` means the order was accepted, not that it filled.
    async fn buy(&self, side: Side, stake: Decimal) -> Result<bool, MarketError>;

    /// Sell the whole position on `side`.
    async fn sell(&self, side: Side) -> Result<bool, MarketError>;

    /// Sell up to `shares` of the position on `side`.
    async fn sell_partial(&self, side: Side, shares: Decimal) -> Result<bool, MarketError>;

    /// Whether a position is held on `side`.
    async fn has_open_position(&self, side: Side) -> Result<bool, MarketError>;

    /// Recent trade history, newest first.
    async fn recent_trades(&self) -> Result<Vec<TradeRecord>, MarketError>;

    /// Whether the session is still logged in.
    async fn is_session_alive(&self) -> Result<bool, MarketError>;

    /// Re-establish the login on the current session.
    async fn login(&self) -> Result<(), MarketError>;

    /// URL the session currently points at.
    async fn current_url(&self) -> Result<String, MarketError>;

    /// Point the session at `url`.
    async fn navigate(&self, url: &str) -> Result<(), MarketError>;

    /// Reload the current market.
    async fn refresh(&self) -> Result<(), MarketError>;

    /// Names of critical elements that could not be located.
    async fn check_selectors(&self) -> Result<Vec<String>, MarketError>;

    /// Open a fresh session on `url`.
    async fn connect(&self, url: &str) -> Result<(), MarketError>;

    /// Drop the current session.
    async fn teardown(&self);
}
