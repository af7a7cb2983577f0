//! Reference spot prices for the daily snapshot and variance check.

pub mod binance;

use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::FeedError;
use crate::retry::{Attempt, RetryOutcome, RetryPolicy};
use crate::sync::StopSignal;

pub use binance::BinanceTicker;

/// Source of a spot price for a symbol such as `BTCUSDT`.
#[async_trait]
pub trait ReferencePriceSource: Send + Sync {
    /// Latest traded price.
    async fn last_price(&self, symbol: &str) -> Result<Decimal, FeedError>;
}

/// Fetch a price with bounded retries; `None` once the budget is spent.
pub async fn fetch_with_retry(
    source: &dyn ReferencePriceSource,
    symbol: &str,
    policy: RetryPolicy,
    stop: Option<&StopSignal>,
) -> Option<Decimal> {
    let outcome: RetryOutcome<Decimal, FeedError> = policy
        .run("reference price", stop, |_| async move {
            match source.last_price(symbol).await {
                Ok(price) if price > Decimal::ZERO => Attempt::Done(price),
                Ok(price) => Attempt::Retry(format!("non-positive price {}", price)),
                Err(e) => Attempt::Retry(e.to_string()),
            }
        })
        .await;

    match outcome {
        RetryOutcome::Succeeded { value, .. } => Some(value),
        RetryOutcome::Exhausted { attempts, last_reason } => {
            warn!(symbol, attempts, reason = %last_reason, "Reference price unavailable");
            None
        }
        _ => None,
    }
}

/// The day's opening reference price and the latest reading.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReferenceSnapshot {
    /// Symbol the prices belong to.
    pub symbol: String,
    /// Price captured at the start of the day.
    pub zero_price: Option<Decimal>,
    /// Most recent price read.
    pub last: Option<Decimal>,
}

impl ReferenceSnapshot {
    /// Absolute change from the zero price, in percent.
    pub fn change_pct(&self) -> Option<Decimal> {
        let zero = self.zero_price.filter(|z| !z.is_zero())?;
        let last = self.last?;
        Some(((last - zero) / zero).abs() * Decimal::ONE_HUNDRED)
    }
}

/// Shared reference state written by the snapshot and variance monitors.
#[derive(Debug, Default)]
pub struct ReferenceState {
    inner: Mutex<ReferenceSnapshot>,
}

impl ReferenceState {
    /// Create empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the day's zero price for `symbol`.
    pub fn set_zero(&self, symbol: &str, price: Decimal) {
        let mut snap = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        snap.symbol = symbol.to_string();
        snap.zero_price = Some(price);
        snap.last = Some(price);
        info!(symbol, price = %price, "Reference zero price captured");
    }

    /// Record the latest price.
    pub fn set_last(&self, price: Decimal) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).last = Some(price);
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> ReferenceSnapshot {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Fixed or scripted prices for tests and dry runs.
#[derive(Debug, Default)]
pub struct StaticPrice {
    prices: Mutex<Vec<Decimal>>,
}

impl StaticPrice {
    /// Serve `prices` in order, repeating the last one.
    pub fn new(prices: Vec<Decimal>) -> Self {
        Self {
            prices: Mutex::new(prices),
        }
    }
}

#[async_trait]
impl ReferencePriceSource for StaticPrice {
    async fn last_price(&self, _symbol: &str) -> Result<Decimal, FeedError> {
        let mut prices = self.prices.lock().unwrap_or_else(|e| e.into_inner());
        match prices.len() {
            0 => Err(FeedError::Closed),
            1 => Ok(prices[0]),
            _ => Ok(prices.remove(0)),
        }
    }
}
