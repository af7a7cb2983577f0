//! Market-related types for daily Up/Down prediction markets.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use time::OffsetDateTime;

/// One of the two complementary outcomes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
pub enum Side {
    /// Price closes higher (YES token).
    #[strum(to_string = "Up", serialize = "up", serialize = "UP", serialize = "yes")]
    #[default]
    Up,
    /// Price closes lower (NO token).
    #[strum(to_string = "Down", serialize = "down", serialize = "DOWN", serialize = "no")]
    Down,
}

impl Side {
    /// Both sides, Up first.
    pub const ALL: [Side; 2] = [Side::Up, Side::Down];

    /// Get the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Up => Side::Down,
            Side::Down => Side::Up,
        }
    }
}

/// Supported underlying coins.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[strum(ascii_case_insensitive)]
pub enum Coin {
    /// Bitcoin.
    #[default]
    #[serde(rename = "BTC")]
    #[strum(serialize = "BTC")]
    Btc,
    /// Ether.
    #[serde(rename = "ETH")]
    #[strum(serialize = "ETH")]
    Eth,
    /// Solana.
    #[serde(rename = "SOL")]
    #[strum(serialize = "SOL")]
    Sol,
    /// XRP.
    #[serde(rename = "XRP")]
    #[strum(serialize = "XRP")]
    Xrp,
}

impl Coin {
    /// Long name used in event slugs.
    pub fn slug_name(&self) -> &'static str {
        match self {
            Coin::Btc => "bitcoin",
            Coin::Eth => "ethereum",
            Coin::Sol => "solana",
            Coin::Xrp => "xrp",
        }
    }

    /// Reference ticker symbol against USDT.
    pub fn ticker_symbol(&self) -> String {
        format!("{}USDT", self)
    }
}

/// Best-price snapshot, prices in cents.
///
/// `ask_price`/`bid_price` are the Up token's best ask and bid. Buying Down
/// costs `100 - bid_price`; selling Down fetches `100 - ask_price`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Quote {
    /// Up best ask in cents.
    pub ask_price: Decimal,
    /// Up best bid in cents.
    pub bid_price: Decimal,
    /// Shares at the best ask.
    pub ask_shares: Decimal,
    /// Shares at the best bid.
    pub bid_shares: Decimal,
}

impl Quote {
    /// Price the matcher compares against a level target for a buy.
    pub fn entry_price(&self, side: Side) -> Decimal {
        match side {
            Side::Up => self.ask_price,
            Side::Down => self.bid_price,
        }
    }

    /// Shares gating a buy on `side`.
    pub fn entry_shares(&self, side: Side) -> Decimal {
        match side {
            Side::Up => self.ask_shares,
            Side::Down => self.bid_shares,
        }
    }

    /// Cost in cents of one share of `side`.
    pub fn buy_cost(&self, side: Side) -> Decimal {
        match side {
            Side::Up => self.ask_price,
            Side::Down => Decimal::ONE_HUNDRED - self.bid_price,
        }
    }

    /// Proceeds in cents of selling one share of `side`.
    pub fn sell_value(&self, side: Side) -> Decimal {
        match side {
            Side::Up => self.bid_price,
            Side::Down => Decimal::ONE_HUNDRED - self.ask_price,
        }
    }

    /// Shares gating an exit on `side` under `book`.
    pub fn exit_shares(&self, side: Side, book: ExitLiquidity) -> Decimal {
        match (book, side) {
            (ExitLiquidity::Counterparty, Side::Down) => self.ask_shares,
            _ => self.bid_shares,
        }
    }
}

/// Book whose depth gates a level-5 exit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExitLiquidity {
    /// The book the sale fills against: bids for Up, asks for Down.
    #[default]
    Counterparty,
    /// Bid depth for both sides.
    Bids,
}

/// Direction of a recorded trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum TradeAction {
    /// A buy.
    Bought,
    /// A sell.
    Sold,
}

/// One entry of the session's recent trade history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Buy or sell.
    pub action: TradeAction,
    /// Side traded.
    pub side: Side,
    /// Execution price in cents.
    pub price: Decimal,
    /// Shares traded.
    pub shares: Decimal,
    /// When the record was written.
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

impl TradeRecord {
    /// Whether this record confirms `action` on `side` at or after `since`.
    pub fn confirms(&self, action: TradeAction, side: Side, since: OffsetDateTime) -> bool {
        self.action == action && self.side == side && self.at >= since
    }
}

impl std::fmt::Display for TradeRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}@{}¢", self.action, self.side, self.shares, self.price)
    }
}

/// Resolved market behind the session URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketSession {
    /// Event URL the session is pointed at.
    pub url: String,
    /// Event slug.
    pub slug: String,
    /// UP (YES) token ID for CLOB.
    pub up_token_id: String,
    /// DOWN (NO) token ID for CLOB.
    pub down_token_id: String,
    /// Market question text.
    pub question: Option<String>,
}

impl MarketSession {
    /// Get the token ID for a given side.
    pub fn token_id(&self, side: Side) -> &str {
        match side {
            Side::Up => &self.up_token_id,
            Side::Down => &self.down_token_id,
        }
    }
}

/// Gamma event payload, trimmed to what session resolution needs.
#[derive(Debug, Clone, Deserialize)]
pub struct GammaEvent {
    /// Event slug.
    pub slug: Option<String>,
    /// Event title.
    pub title: Option<String>,
    /// Whether the event is closed.
    pub closed: Option<bool>,
    /// Markets under the event.
    #[serde(default)]
    pub markets: Vec<GammaMarket>,
}

/// Gamma market payload.
///
/// `clobTokenIds` and `outcomes` arrive as JSON-encoded strings.
#[derive(Debug, Clone, Deserialize)]
pub struct GammaMarket {
    /// Market question.
    pub question: Option<String>,
    /// CLOB token IDs, JSON-encoded.
    #[serde(rename = "clobTokenIds")]
    pub clob_token_ids: Option<serde_json::Value>,
    /// Outcome labels, JSON-encoded.
    pub outcomes: Option<serde_json::Value>,
    /// Whether the market is closed.
    pub closed: Option<bool>,
}

impl GammaMarket {
    /// Decode the (Up, Down) token pair, following the outcome labels when present.
    pub fn token_pair(&self) -> Option<(String, String)> {
        let ids = decode_string_list(self.clob_token_ids.as_ref()?)?;
        if ids.len() != 2 {
            return None;
        }
        let labels = self
            .outcomes
            .as_ref()
            .and_then(decode_string_list)
            .unwrap_or_default();

        let down_first = labels
            .first()
            .is_some_and(|l| l.eq_ignore_ascii_case("down") || l.eq_ignore_ascii_case("no"));
        if down_first {
            Some((ids[1].clone(), ids[0].clone()))
        } else {
            Some((ids[0].clone(), ids[1].clone()))
        }
    }
}

fn decode_string_list(value: &serde_json::Value) -> Option<Vec<String>> {
    match value {
        serde_json::Value::String(s) => serde_json::from_str(s).ok(),
        serde_json::Value::Array(_) => serde_json::from_value(value.clone()).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn side_opposite_works() {
        assert_eq!(Side::Up.opposite(), Side::Down);
        assert_eq!(Side::Down.opposite(), Side::Up);
    }

    #[test]
    fn side_from_string_works() {
        use std::str::FromStr;
        assert_eq!(Side::from_str("up").unwrap(), Side::Up);
        assert_eq!(Side::from_str("no").unwrap(), Side::Down);
        assert_eq!(Side::Up.to_string(), "Up");
    }

    #[test]
    fn coin_parsing_and_symbols() {
        use std::str::FromStr;
        assert_eq!(Coin::from_str("eth").unwrap(), Coin::Eth);
        assert_eq!(Coin::Sol.ticker_symbol(), "SOLUSDT");
        assert_eq!(Coin::Btc.slug_name(), "bitcoin");
    }

    #[test]
    fn quote_prices_per_side() {
        let quote = Quote {
            ask_price: dec!(53),
            bid_price: dec!(51),
            ask_shares: dec!(150),
            bid_shares: dec!(80),
        };

        assert_eq!(quote.entry_price(Side::Up), dec!(53));
        assert_eq!(quote.entry_shares(Side::Down), dec!(80));
        assert_eq!(quote.buy_cost(Side::Down), dec!(49));
        assert_eq!(quote.sell_value(Side::Up), dec!(51));
        assert_eq!(quote.sell_value(Side::Down), dec!(47));
        assert_eq!(quote.exit_shares(Side::Up, ExitLiquidity::Counterparty), dec!(80));
        assert_eq!(quote.exit_shares(Side::Down, ExitLiquidity::Counterparty), dec!(150));
        assert_eq!(quote.exit_shares(Side::Down, ExitLiquidity::Bids), dec!(80));
    }

    #[test]
    fn gamma_token_pair_decodes_encoded_strings() {
        let market: GammaMarket = serde_json::from_value(serde_json::json!({
            "question": "Bitcoin Up or Down on October 19?",
            "clobTokenIds": "[\"111\", \"222\"]",
            "outcomes": "[\"Down\", \"Up\"]"
        }))
        .unwrap();

        assert_eq!(market.token_pair(), Some(("222".to_string(), "111".to_string())));
    }

    #[test]
    fn trade_record_confirmation_window() {
        let start = OffsetDateTime::now_utc();
        let record = TradeRecord {
            action: TradeAction::Bought,
            side: Side::Up,
            price: dec!(53),
            shares: dec!(4.7),
            at: start,
        };

        assert!(record.confirms(TradeAction::Bought, Side::Up, start));
        assert!(!record.confirms(TradeAction::Sold, Side::Up, start));
        assert!(!record.confirms(TradeAction::Bought, Side::Down, start));
        assert!(!record.confirms(
            TradeAction::Bought,
            Side::Up,
            start + time::Duration::seconds(1)
        ));
    }
}
