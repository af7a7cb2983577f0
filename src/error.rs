//! Unified error types for the ladder bot.

use rust_decimal::Decimal;
use thiserror::Error;

/// Unified error type for the ladder bot.
#[derive(Error, Debug)]
pub enum BotError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Trading document persistence error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Market interface error.
    #[error("market error: {0}")]
    Market(#[from] MarketError),

    /// Ladder evaluation or reconfiguration error.
    #[error("ladder error: {0}")]
    Ladder(#[from] LadderError),

    /// Alert delivery error.
    #[error("notify error: {0}")]
    Notify(#[from] NotifyError),

    /// Reference price feed error.
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    /// Operator command rejected in the current state.
    #[error("command rejected: {0}")]
    Rejected(String),

    /// HTTP request error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BotError {
    /// Whether this failure means the market session is unreachable and
    /// must be handed to the connection supervisor.
    pub fn is_connectivity(&self) -> bool {
        match self {
            BotError::Market(e) => e.is_connectivity(),
            BotError::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    /// Whether this failure is a transient miss that should be skipped silently.
    pub fn is_transient(&self) -> bool {
        matches!(self, BotError::Market(e) if e.is_transient())
    }
}

/// Market interface errors.
///
/// `Unavailable` is the transient "not there yet" miss, `Connectivity` and
/// `NoSession` mean the session itself is gone.
#[derive(Error, Debug)]
pub enum MarketError {
    /// Quote or element not available yet.
    #[error("not available yet: {0}")]
    Unavailable(String),

    /// Session or upstream unreachable.
    #[error("connectivity lost: {0}")]
    Connectivity(String),

    /// No session has been established.
    #[error("no active session")]
    NoSession,

    /// No market could be found for the requested coin and day.
    #[error("no active market found for {coin}")]
    NoActiveMarketFound {
        /// Coin symbol searched for.
        coin: String,
    },

    /// Failed to fetch market information.
    #[error("failed to fetch market {slug}: {reason}")]
    FetchFailed {
        /// The market slug that failed.
        slug: String,
        /// Reason for failure.
        reason: String,
    },

    /// The URL does not point at a market event.
    #[error("invalid market url: {0}")]
    InvalidUrl(String),

    /// Failed to parse market data.
    #[error("failed to parse market data: {0}")]
    ParseError(String),

    /// HTTP request failed.
    #[error("http request failed: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl MarketError {
    /// Connectivity-class failures escalate to the supervisor.
    pub fn is_connectivity(&self) -> bool {
        match self {
            MarketError::Connectivity(_) | MarketError::NoSession => true,
            MarketError::HttpError(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    /// Transient misses are swallowed by the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, MarketError::Unavailable(_))
    }
}

/// Ladder evaluation and reconfiguration errors.
#[derive(Error, Debug)]
pub enum LadderError {
    /// Input rejected by the amount calculator or a setter.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Another buy/sell sequence is still resolving.
    #[error("a trade is already in flight")]
    TradeInFlight,

    /// Level index outside 1..=5.
    #[error("invalid level {0}")]
    InvalidLevel(u8),

    /// Target price outside (0, 100) cents.
    #[error("invalid target price {0}")]
    InvalidPrice(Decimal),

    /// Cash reading never became usable.
    #[error("cash balance unavailable after {attempts} attempts")]
    CashUnavailable {
        /// Attempts made.
        attempts: u32,
    },
}

/// Trading document persistence errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Reading or writing the document failed.
    #[error("io error on {path}: {source}")]
    Io {
        /// Document path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Document could not be serialized.
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Alert delivery errors.
#[derive(Error, Debug)]
pub enum NotifyError {
    /// Transport failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote end refused the message.
    #[error("rejected with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Delivery failed for another reason.
    #[error("delivery failed: {0}")]
    Failed(String),
}

/// Reference price feed errors.
#[derive(Error, Debug)]
pub enum FeedError {
    /// Connection failed.
    #[error("feed connection failed: {0}")]
    ConnectionFailed(String),

    /// Stream closed before a price arrived.
    #[error("feed closed before a price arrived")]
    Closed,

    /// No price within the timeout.
    #[error("feed timed out after {0}ms")]
    Timeout(u64),

    /// Message parsing failed.
    #[error("failed to parse feed message: {0}")]
    ParseError(String),

    /// Tungstenite error.
    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, BotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_classification() {
        let lost: BotError = MarketError::Connectivity("socket closed".into()).into();
        assert!(lost.is_connectivity());
        assert!(!lost.is_transient());

        let no_session: BotError = MarketError::NoSession.into();
        assert!(no_session.is_connectivity());

        let miss: BotError = MarketError::Unavailable("empty book".into()).into();
        assert!(miss.is_transient());
        assert!(!miss.is_connectivity());

        let ladder: BotError = LadderError::TradeInFlight.into();
        assert!(!ladder.is_connectivity());
        assert!(!ladder.is_transient());
    }
}
