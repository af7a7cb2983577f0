//! One-shot reader for the Binance `@ticker` stream.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, instrument};

use super::ReferencePriceSource;
use crate::error::FeedError;

/// 24h rolling ticker frame; only the last price is used.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerFrame {
    /// Symbol, e.g. `BTCUSDT`.
    #[serde(rename = "s")]
    pub symbol: Option<String>,
    /// Last price as a string.
    #[serde(rename = "c")]
    pub last_price: String,
}

impl TickerFrame {
    /// Parse the last price.
    pub fn price(&self) -> Result<Decimal, FeedError> {
        self.last_price
            .parse()
            .map_err(|e| FeedError::ParseError(format!("bad price {:?}: {}", self.last_price, e)))
    }
}

/// Reads one ticker frame per request.
#[derive(Debug, Clone)]
pub struct BinanceTicker {
    base_url: String,
    timeout: Duration,
}

impl BinanceTicker {
    /// Create a reader against `base_url` (e.g. `wss://stream.binance.com:9443/ws`).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
        }
    }

    /// Stream URL for `symbol`.
    pub fn stream_url(&self, symbol: &str) -> String {
        format!(
            "{}/{}@ticker",
            self.base_url.trim_end_matches('/'),
            symbol.to_lowercase()
        )
    }

    async fn read_one(&self, url: &str) -> Result<Decimal, FeedError> {
        let (mut ws, _) = connect_async(url)
            .await
            .map_err(|e| FeedError::ConnectionFailed(e.to_string()))?;

        while let Some(msg) = ws.next().await {
            match msg? {
                Message::Text(text) => {
                    let frame: TickerFrame = serde_json::from_str(&text)
                        .map_err(|e| FeedError::ParseError(e.to_string()))?;
                    return frame.price();
                }
                Message::Close(_) => return Err(FeedError::Closed),
                _ => continue,
            }
        }

        Err(FeedError::Closed)
    }
}

#[async_trait]
impl ReferencePriceSource for BinanceTicker {
    #[instrument(skip(self))]
    async fn last_price(&self, symbol: &str) -> Result<Decimal, FeedError> {
        let url = self.stream_url(symbol);
        debug!(url = %url, "Reading reference ticker");

        tokio::time::timeout(self.timeout, self.read_one(&url))
            .await
            .map_err(|_| FeedError::Timeout(self.timeout.as_millis() as u64))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_ticker_frame() {
        let raw = r#"{"e":"24hrTicker","s":"BTCUSDT","c":"64012.51000000","o":"63000.00"}"#;
        let frame: TickerFrame = serde_json::from_str(raw).unwrap();
        assert_eq!(frame.symbol.as_deref(), Some("BTCUSDT"));
        assert_eq!(frame.price().unwrap(), dec!(64012.51));
    }

    #[test]
    fn stream_url_lowercases_symbol() {
        let ticker = BinanceTicker::new("wss://stream.binance.com:9443/ws/", Duration::from_secs(5));
        assert_eq!(
            ticker.stream_url("ETHUSDT"),
            "wss://stream.binance.com:9443/ws/ethusdt@ticker"
        );
    }
}
