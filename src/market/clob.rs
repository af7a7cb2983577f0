//! Market interface over the public Polymarket CLOB with paper execution.
//!
//! Quotes come from the live `/book` endpoint for the session's Up token;
//! buys and sells settle against an in-memory ledger priced at the quote.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::MarketError;
use crate::metrics;

use super::discovery::{clean_url, resolve_session};
use super::types::{MarketSession, Quote, Side, TradeAction, TradeRecord};
use super::MarketInterface;

/// History entries kept by the paper ledger.
const HISTORY_LIMIT: usize = 50;

/// Order book response from API.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookResponse {
    /// Bid levels.
    pub bids: Option<Vec<OrderLevel>>,
    /// Ask levels.
    pub asks: Option<Vec<OrderLevel>>,
}

/// Single price level in order book.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderLevel {
    /// Price at this level, in dollars.
    pub price: String,
    /// Size available at this level.
    pub size: String,
}

impl OrderBookResponse {
    /// Best bid and best ask as (price, size) in dollars.
    pub fn best_levels(&self) -> (Option<(Decimal, Decimal)>, Option<(Decimal, Decimal)>) {
        let parse = |levels: &Option<Vec<OrderLevel>>| -> Vec<(Decimal, Decimal)> {
            levels
                .as_deref()
                .unwrap_or_default()
                .iter()
                .filter_map(|level| {
                    let price: Decimal = level.price.parse().ok()?;
                    let size: Decimal = level.size.parse().ok()?;
                    (size > Decimal::ZERO).then_some((price, size))
                })
                .collect()
        };

        let best_bid = parse(&self.bids).into_iter().max_by(|a, b| a.0.cmp(&b.0));
        let best_ask = parse(&self.asks).into_iter().min_by(|a, b| a.0.cmp(&b.0));
        (best_bid, best_ask)
    }

    /// Convert to a cents quote.
    pub fn to_quote(&self) -> Option<Quote> {
        let (bid, ask) = self.best_levels();
        let (bid_price, bid_shares) = bid?;
        let (ask_price, ask_shares) = ask?;
        Some(Quote {
            ask_price: ask_price * Decimal::ONE_HUNDRED,
            bid_price: bid_price * Decimal::ONE_HUNDRED,
            ask_shares,
            bid_shares,
        })
    }
}

/// Paper-trading ledger.
#[derive(Debug, Clone, Default)]
struct PaperLedger {
    cash: Decimal,
    positions: HashMap<Side, Decimal>,
    cost_basis: HashMap<Side, Decimal>,
    history: Vec<TradeRecord>,
}

impl PaperLedger {
    fn push(&mut self, record: TradeRecord) {
        self.history.push(record);
        if self.history.len() > HISTORY_LIMIT {
            let excess = self.history.len() - HISTORY_LIMIT;
            self.history.drain(..excess);
        }
    }

    fn held(&self, side: Side) -> Decimal {
        self.positions.get(&side).copied().unwrap_or_default()
    }

    fn sell(&mut self, side: Side, shares: Decimal, price: Decimal) -> bool {
        let held = self.held(side);
        let shares = shares.min(held);
        if shares <= Decimal::ZERO || price <= Decimal::ZERO {
            return false;
        }

        let basis = self.cost_basis.get(&side).copied().unwrap_or_default();
        let released = if held.is_zero() { basis } else { basis * shares / held };

        self.positions.insert(side, held - shares);
        self.cost_basis.insert(side, basis - released);
        self.cash += shares * price / Decimal::ONE_HUNDRED;
        self.push(TradeRecord {
            action: TradeAction::Sold,
            side,
            price,
            shares,
            at: OffsetDateTime::now_utc(),
        });
        true
    }
}

/// Polymarket CLOB-backed market interface.
#[derive(Debug)]
pub struct ClobMarket {
    /// HTTP client for API requests.
    http: reqwest::Client,
    /// Base URL for CLOB API.
    clob_url: String,
    /// Base URL for Gamma API.
    gamma_url: String,
    /// Resolved session, if connected.
    session: RwLock<Option<MarketSession>>,
    /// Paper execution state.
    ledger: RwLock<PaperLedger>,
}

impl ClobMarket {
    /// Create a market interface from config.
    pub fn new(config: &Config, http: reqwest::Client) -> Self {
        Self {
            http,
            clob_url: config.polymarket_clob_url.clone(),
            gamma_url: config.polymarket_gamma_url.clone(),
            session: RwLock::new(None),
            ledger: RwLock::new(PaperLedger {
                cash: config.sim_balance,
                ..PaperLedger::default()
            }),
        }
    }

    /// Build the shared HTTP client with the configured timeout.
    pub fn http_client(config: &Config) -> Result<reqwest::Client, MarketError> {
        reqwest::Client::builder()
            .timeout(Duration::from_millis(config.http_timeout_ms))
            .connect_timeout(Duration::from_millis(1500))
            .tcp_nodelay(true)
            .tcp_keepalive(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(MarketError::HttpError)
    }

    /// Get the HTTP client reference.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    async fn session(&self) -> Result<MarketSession, MarketError> {
        self.session.read().await.clone().ok_or(MarketError::NoSession)
    }

    /// Get order book for a token.
    #[instrument(skip(self), fields(token_id = %token_id))]
    pub async fn get_order_book(&self, token_id: &str) -> Result<OrderBookResponse, MarketError> {
        let start = std::time::Instant::now();
        let url = format!("{}/book", self.clob_url);

        let response = self
            .http
            .get(&url)
            .query(&[("token_id", token_id)])
            .send()
            .await
            .map_err(classify_transport)?;

        metrics::record_http_latency(start, "book");

        if !response.status().is_success() {
            return Err(MarketError::FetchFailed {
                slug: token_id.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        response
            .json()
            .await
            .map_err(|e| MarketError::ParseError(format!("Failed to parse order book: {}", e)))
    }

    async fn current_quote(&self) -> Result<Quote, MarketError> {
        let session = self.session().await?;
        let book = self.get_order_book(&session.up_token_id).await?;
        book.to_quote()
            .ok_or_else(|| MarketError::Unavailable("order book has an empty side".to_string()))
    }
}

/// Connect and timeout failures mean the upstream is unreachable.
fn classify_transport(e: reqwest::Error) -> MarketError {
    if e.is_connect() || e.is_timeout() {
        MarketError::Connectivity(e.to_string())
    } else {
        MarketError::HttpError(e)
    }
}

#[async_trait]
impl MarketInterface for ClobMarket {
    async fn get_quote(&self) -> Result<Quote, MarketError> {
        self.current_quote().await
    }

    async fn get_cash_balance(&self) -> Result<Decimal, MarketError> {
        Ok(self.ledger.read().await.cash)
    }

    async fn get_portfolio_value(&self) -> Result<Decimal, MarketError> {
        let quote = self.current_quote().await.ok();
        let ledger = self.ledger.read().await;

        let marked: Decimal = Side::ALL
            .iter()
            .map(|side| match quote {
                Some(q) => ledger.held(*side) * q.sell_value(*side) / Decimal::ONE_HUNDRED,
                None => ledger.cost_basis.get(side).copied().unwrap_or_default(),
            })
            .sum();

        Ok(ledger.cash + marked)
    }

    #[instrument(skip(self))]
    async fn buy(&self, side: Side, stake: Decimal) -> Result<bool, MarketError> {
        let quote = self.current_quote().await?;
        let cost = quote.buy_cost(side);
        if cost <= Decimal::ZERO || stake <= Decimal::ZERO {
            return Ok(false);
        }

        let mut ledger = self.ledger.write().await;
        if ledger.cash < stake {
            warn!(cash = %ledger.cash, stake = %stake, "Paper cash below stake");
            return Ok(false);
        }

        let shares = (stake * Decimal::ONE_HUNDRED / cost).round_dp(2);
        ledger.cash -= stake;
        *ledger.positions.entry(side).or_default() += shares;
        *ledger.cost_basis.entry(side).or_default() += stake;
        ledger.push(TradeRecord {
            action: TradeAction::Bought,
            side,
            price: cost,
            shares,
            at: OffsetDateTime::now_utc(),
        });

        info!(side = %side, shares = %shares, price = %cost, "[PAPER] Bought");
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn sell(&self, side: Side) -> Result<bool, MarketError> {
        let quote = self.current_quote().await?;
        let mut ledger = self.ledger.write().await;
        let held = ledger.held(side);
        let sold = ledger.sell(side, held, quote.sell_value(side));
        if sold {
            info!(side = %side, shares = %held, price = %quote.sell_value(side), "[PAPER] Sold");
        }
        Ok(sold)
    }

    #[instrument(skip(self))]
    async fn sell_partial(&self, side: Side, shares: Decimal) -> Result<bool, MarketError> {
        let quote = self.current_quote().await?;
        let mut ledger = self.ledger.write().await;
        let sold = ledger.sell(side, shares, quote.sell_value(side));
        if sold {
            info!(side = %side, shares = %shares, "[PAPER] Sold partial");
        }
        Ok(sold)
    }

    async fn has_open_position(&self, side: Side) -> Result<bool, MarketError> {
        Ok(self.ledger.read().await.held(side) > Decimal::ZERO)
    }

    async fn recent_trades(&self) -> Result<Vec<TradeRecord>, MarketError> {
        let ledger = self.ledger.read().await;
        Ok(ledger.history.iter().rev().cloned().collect())
    }

    async fn is_session_alive(&self) -> Result<bool, MarketError> {
        Ok(self.session.read().await.is_some())
    }

    async fn login(&self) -> Result<(), MarketError> {
        let url = self.session().await?.url;
        self.connect(&url).await
    }

    async fn current_url(&self) -> Result<String, MarketError> {
        Ok(self.session().await?.url)
    }

    async fn navigate(&self, url: &str) -> Result<(), MarketError> {
        self.connect(url).await
    }

    async fn refresh(&self) -> Result<(), MarketError> {
        let session = self.session().await?;
        let refreshed = resolve_session(&self.http, &self.gamma_url, &session.url).await?;
        *self.session.write().await = Some(refreshed);
        debug!(slug = %session.slug, "Session refreshed");
        Ok(())
    }

    async fn check_selectors(&self) -> Result<Vec<String>, MarketError> {
        let session = self.session().await?;
        let mut failed = Vec::new();

        for side in Side::ALL {
            match self.get_order_book(session.token_id(side)).await {
                Ok(book) if book.to_quote().is_some() => {}
                Ok(_) => failed.push(format!("{} order book (empty)", side)),
                Err(e) if e.is_connectivity() => return Err(e),
                Err(e) => failed.push(format!("{} order book ({})", side, e)),
            }
        }

        if let Err(e) = resolve_session(&self.http, &self.gamma_url, &session.url).await {
            if e.is_connectivity() {
                return Err(e);
            }
            failed.push(format!("event metadata ({})", e));
        }

        Ok(failed)
    }

    #[instrument(skip(self))]
    async fn connect(&self, url: &str) -> Result<(), MarketError> {
        let session = resolve_session(&self.http, &self.gamma_url, &clean_url(url))
            .await
            .map_err(|e| match e {
                MarketError::HttpError(inner) => classify_transport(inner),
                other => other,
            })?;

        info!(slug = %session.slug, up = %session.up_token_id, down = %session.down_token_id, "Session connected");
        *self.session.write().await = Some(session);
        Ok(())
    }

    async fn teardown(&self) {
        if self.session.write().await.take().is_some() {
            info!("Session torn down");
        }
    }
}
