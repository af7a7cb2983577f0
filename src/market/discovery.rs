//! Daily market discovery and URL helpers.
//!
//! Each coin has one "<Coin> Up or Down on <Month> <day>?" event per day.
//! Discovery computes today's slug and falls back to scanning open events
//! by title.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, instrument};

use super::types::{Coin, GammaEvent, MarketSession};
use crate::error::MarketError;

/// Polymarket event base URL.
pub const POLYMARKET_EVENT_URL: &str = "https://polymarket.com/event";

static EVENT_SLUG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/event/([^/?#]+)").expect("valid regex"));

/// Strip the query, fragment and trailing slash so URLs compare by market.
pub fn clean_url(raw: &str) -> String {
    match url::Url::parse(raw.trim()) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.as_str().trim_end_matches('/').to_string()
        }
        Err(_) => raw
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim()
            .trim_end_matches('/')
            .to_string(),
    }
}

/// Event slug of a market URL, e.g. `bitcoin-up-or-down-on-october-19`.
pub fn slug_from_url(raw: &str) -> Option<String> {
    EVENT_SLUG
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Event URL for a slug.
pub fn event_url(slug: &str) -> String {
    format!("{}/{}", POLYMARKET_EVENT_URL, slug)
}

fn month_name(date: NaiveDate) -> &'static str {
    const MONTHS: [&str; 12] = [
        "January", "February", "March", "April", "May", "June", "July", "August", "September",
        "October", "November", "December",
    ];
    MONTHS[date.month0() as usize]
}

/// Slug of the daily event for `coin` on `date`.
pub fn daily_slug(coin: Coin, date: NaiveDate) -> String {
    format!(
        "{}-up-or-down-on-{}-{}",
        coin.slug_name(),
        month_name(date).to_lowercase(),
        date.day()
    )
}

/// Title of the daily event for `coin` on `date`.
pub fn daily_title(coin: Coin, date: NaiveDate) -> String {
    let name = match coin {
        Coin::Btc => "Bitcoin",
        Coin::Eth => "Ethereum",
        Coin::Sol => "Solana",
        Coin::Xrp => "XRP",
    };
    format!("{} Up or Down on {} {}?", name, month_name(date), date.day())
}

/// Finds the market URL to trade for a coin and day.
#[async_trait]
pub trait MarketDiscovery: Send + Sync {
    /// URL of the daily market for `coin` on `date`.
    async fn find_daily_market(&self, coin: Coin, date: NaiveDate) -> Result<String, MarketError>;
}

/// Discovery through the Gamma events API.
#[derive(Debug, Clone)]
pub struct GammaDiscovery {
    http: reqwest::Client,
    gamma_url: String,
}

impl GammaDiscovery {
    /// Create a discovery client.
    pub fn new(http: reqwest::Client, gamma_url: impl Into<String>) -> Self {
        Self {
            http,
            gamma_url: gamma_url.into(),
        }
    }

    /// Try the computed slug for the day.
    #[instrument(skip(self))]
    async fn try_computed_slug(&self, coin: Coin, date: NaiveDate) -> Result<String, MarketError> {
        let slug = daily_slug(coin, date);
        debug!(slug = %slug, "Checking computed slug");

        let events = fetch_events_by_slug(&self.http, &self.gamma_url, &slug).await?;
        match events.into_iter().find(|e| e.closed != Some(true)) {
            Some(_) => Ok(event_url(&slug)),
            None => Err(MarketError::NoActiveMarketFound {
                coin: coin.to_string(),
            }),
        }
    }

    /// Scan open events for today's title.
    #[instrument(skip(self))]
    async fn try_title_scan(&self, coin: Coin, date: NaiveDate) -> Result<String, MarketError> {
        let url = format!("{}/events", self.gamma_url.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .query(&[
                ("closed", "false"),
                ("limit", "500"),
                ("order", "startDate"),
                ("ascending", "false"),
            ])
            .header("User-Agent", "Mozilla/5.0")
            .send()
            .await?;

        let events: Vec<GammaEvent> = response.json().await.map_err(|e| {
            MarketError::ParseError(format!("Failed to parse Gamma events: {}", e))
        })?;

        let title = daily_title(coin, date);
        events
            .into_iter()
            .find(|e| e.title.as_deref().map(str::trim) == Some(title.as_str()))
            .and_then(|e| e.slug)
            .map(|slug| event_url(&slug))
            .ok_or(MarketError::NoActiveMarketFound {
                coin: coin.to_string(),
            })
    }
}

#[async_trait]
impl MarketDiscovery for GammaDiscovery {
    #[instrument(skip(self))]
    async fn find_daily_market(&self, coin: Coin, date: NaiveDate) -> Result<String, MarketError> {
        if let Ok(url) = self.try_computed_slug(coin, date).await {
            info!(url = %url, "Found market via computed slug");
            return Ok(url);
        }

        let url = self.try_title_scan(coin, date).await?;
        info!(url = %url, "Found market via title scan");
        Ok(url)
    }
}

/// Fetch events matching `slug` from Gamma.
pub async fn fetch_events_by_slug(
    http: &reqwest::Client,
    gamma_url: &str,
    slug: &str,
) -> Result<Vec<GammaEvent>, MarketError> {
    let url = format!("{}/events", gamma_url.trim_end_matches('/'));
    let response = http
        .get(&url)
        .query(&[("slug", slug)])
        .header("User-Agent", "Mozilla/5.0")
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(MarketError::FetchFailed {
            slug: slug.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    response
        .json()
        .await
        .map_err(|e| MarketError::ParseError(format!("Failed to parse event {}: {}", slug, e)))
}

/// Resolve an event URL into a tradable session.
#[instrument(skip(http))]
pub async fn resolve_session(
    http: &reqwest::Client,
    gamma_url: &str,
    url: &str,
) -> Result<MarketSession, MarketError> {
    let slug = slug_from_url(url).ok_or_else(|| MarketError::InvalidUrl(url.to_string()))?;
    let events = fetch_events_by_slug(http, gamma_url, &slug).await?;

    let market = events
        .into_iter()
        .flat_map(|e| e.markets)
        .find(|m| m.closed != Some(true) && m.token_pair().is_some())
        .ok_or_else(|| MarketError::FetchFailed {
            slug: slug.clone(),
            reason: "no open market with token ids".to_string(),
        })?;

    let (up_token_id, down_token_id) = market
        .token_pair()
        .ok_or_else(|| MarketError::ParseError("missing clobTokenIds".to_string()))?;

    Ok(MarketSession {
        url: clean_url(url),
        slug,
        up_token_id,
        down_token_id,
        question: market.question,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_url_drops_query_and_trailing_slash() {
        assert_eq!(
            clean_url("https://polymarket.com/event/bitcoin-up-or-down-on-october-19/?tid=123"),
            "https://polymarket.com/event/bitcoin-up-or-down-on-october-19"
        );
        assert_eq!(
            clean_url("https://polymarket.com/event/x#comments"),
            "https://polymarket.com/event/x"
        );
        assert_eq!(clean_url("not a url/?a=b"), "not a url");
    }

    #[test]
    fn slug_extraction() {
        assert_eq!(
            slug_from_url("https://polymarket.com/event/solana-up-or-down-on-may-2?tid=1"),
            Some("solana-up-or-down-on-may-2".to_string())
        );
        assert_eq!(slug_from_url("https://polymarket.com/markets/crypto"), None);
    }

    #[test]
    fn daily_slug_and_title() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 9).unwrap();
        assert_eq!(daily_slug(Coin::Btc, date), "bitcoin-up-or-down-on-october-9");
        assert_eq!(daily_title(Coin::Xrp, date), "XRP Up or Down on October 9?");
    }
}
