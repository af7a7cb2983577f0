//! Persisted trading document.
//!
//! The document keeps per-level targets and stakes, the stake percentages,
//! the market URL and its history, the default target price and the coin.
//! Loads are lenient: missing keys take defaults and malformed numbers fall
//! back to zero with a warning. Saves write a temp file and rename it over
//! the original.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{error, info, instrument, warn};

use crate::error::StoreError;
use crate::ladder::{LadderAmounts, LadderState, LevelState, LEVELS};
use crate::market::{Coin, Side};

/// Accept numbers, numeric strings and null; anything else becomes zero.
fn lenient_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(parse_lenient(&value).unwrap_or_else(|| {
        warn!(value = %value, "Malformed number in trading document, using 0");
        Decimal::ZERO
    }))
}

fn lenient_optional_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    Ok(Some(parse_lenient(&value).unwrap_or_else(|| {
        warn!(value = %value, "Malformed amount in trading document, using 0");
        Decimal::ZERO
    })))
}

fn parse_lenient(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Null => Some(Decimal::ZERO),
        serde_json::Value::Number(n) => n.to_string().parse().ok(),
        serde_json::Value::String(s) if s.trim().is_empty() => Some(Decimal::ZERO),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Market the session should point at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Website {
    /// Event URL.
    #[serde(default)]
    pub url: String,
}

/// Stored target and stake of one level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelEntry {
    /// Target price in cents.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub target_price: Decimal,
    /// Stake; `null` for level 5.
    #[serde(default, deserialize_with = "lenient_optional_decimal")]
    pub amount: Option<Decimal>,
}

/// Stake percentages, in percent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountSettings {
    /// Level-1 stake as a share of cash.
    #[serde(default = "default_initial_pct", deserialize_with = "lenient_decimal")]
    pub initial_amount_pct: Decimal,
    /// Level-2 stake relative to level 1.
    #[serde(default = "default_first_rebound_pct", deserialize_with = "lenient_decimal")]
    pub first_rebound_pct: Decimal,
    /// Level-3/4 stake relative to the previous level.
    #[serde(default = "default_n_rebound_pct", deserialize_with = "lenient_decimal")]
    pub n_rebound_pct: Decimal,
    /// Stored and displayed only.
    #[serde(default = "default_margin_pct", deserialize_with = "lenient_decimal")]
    pub margin_pct: Decimal,
}

fn default_initial_pct() -> Decimal {
    dec!(2.5)
}

fn default_first_rebound_pct() -> Decimal {
    dec!(220)
}

fn default_n_rebound_pct() -> Decimal {
    dec!(120)
}

fn default_margin_pct() -> Decimal {
    dec!(2.2)
}

fn default_target_price() -> Decimal {
    dec!(52)
}

impl Default for AmountSettings {
    fn default() -> Self {
        Self {
            initial_amount_pct: default_initial_pct(),
            first_rebound_pct: default_first_rebound_pct(),
            n_rebound_pct: default_n_rebound_pct(),
            margin_pct: default_margin_pct(),
        }
    }
}

/// The whole persisted document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingDocument {
    /// Market URL.
    #[serde(default)]
    pub website: Website,
    /// Level entries keyed `Up1`..`Down5`.
    #[serde(default)]
    pub trading: BTreeMap<String, LevelEntry>,
    /// Previously traded URLs, newest only.
    #[serde(default)]
    pub url_history: Vec<String>,
    /// Stake percentages.
    #[serde(default)]
    pub amounts: AmountSettings,
    /// Default target price in cents.
    #[serde(default = "default_target_price", deserialize_with = "lenient_decimal")]
    pub default_target_price: Decimal,
    /// Selected coin.
    #[serde(default)]
    pub coin: Coin,
}

/// Key of level `n` on `side` in the `trading` map.
pub fn level_key(side: Side, n: u8) -> String {
    format!("{}{}", side, n)
}

impl Default for TradingDocument {
    fn default() -> Self {
        let mut doc = Self {
            website: Website::default(),
            trading: BTreeMap::new(),
            url_history: Vec::new(),
            amounts: AmountSettings::default(),
            default_target_price: default_target_price(),
            coin: Coin::default(),
        };
        doc.fill_missing_levels();
        doc
    }
}

impl TradingDocument {
    /// Insert defaults for any level key the document lacks.
    pub fn fill_missing_levels(&mut self) {
        for side in Side::ALL {
            for n in 1..=LEVELS {
                self.trading.entry(level_key(side, n)).or_insert(LevelEntry {
                    target_price: Decimal::ZERO,
                    amount: (n < LEVELS).then_some(Decimal::ZERO),
                });
            }
        }
    }

    /// Entry for level `n` on `side`.
    pub fn level(&self, side: Side, n: u8) -> Option<&LevelEntry> {
        self.trading.get(&level_key(side, n))
    }

    /// Point at `url`, keeping only the newest history entry.
    pub fn record_url(&mut self, url: &str) {
        self.website.url = url.to_string();
        self.url_history = vec![url.to_string()];
    }

    /// Stakes stored for levels 1-4 (Up side; both sides share one schedule).
    pub fn stored_amounts(&self) -> Option<LadderAmounts> {
        let stake = |n| self.level(Side::Up, n).and_then(|e| e.amount);
        let amounts = LadderAmounts {
            l1: stake(1)?,
            l2: stake(2)?,
            l3: stake(3)?,
            l4: stake(4)?,
        };
        (amounts.total() > Decimal::ZERO).then_some(amounts)
    }

    /// Copy level targets and stakes out of the ladder.
    ///
    /// Consumed levels are stored disabled so a restart cannot buy them twice.
    pub fn capture(&mut self, state: &LadderState) {
        for side in Side::ALL {
            for level in &state.side(side).levels {
                self.trading.insert(
                    level_key(side, level.index),
                    LevelEntry {
                        target_price: match level.state {
                            LevelState::Consumed => Decimal::ZERO,
                            _ => level.target_price,
                        },
                        amount: level.stake,
                    },
                );
            }
        }
        self.default_target_price = state.default_target_price;
    }

    /// Restore level targets and stakes into the ladder.
    pub fn restore(&self, state: &mut LadderState) {
        state.default_target_price = self.default_target_price;
        for side in Side::ALL {
            for n in 1..=LEVELS {
                if let Some(entry) = self.level(side, n) {
                    let level = state.level_mut(side, n);
                    level.arm(entry.target_price);
                    if n < LEVELS {
                        level.stake = entry.amount;
                    }
                }
            }
        }
        state.amounts = self.stored_amounts();
    }
}

/// Loads and saves the trading document at a fixed path.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    path: PathBuf,
}

impl DocumentStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Document path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    /// Load the document, creating or replacing it with defaults when needed.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn load(&self) -> Result<TradingDocument, StoreError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Trading document missing, writing defaults");
                let doc = TradingDocument::default();
                self.save(&doc).await?;
                return Ok(doc);
            }
            Err(e) => return Err(self.io_error(e)),
        };

        match serde_json::from_str::<TradingDocument>(&raw) {
            Ok(mut doc) => {
                doc.fill_missing_levels();
                Ok(doc)
            }
            Err(e) => {
                error!(error = %e, "Trading document is corrupt, replacing with defaults");
                let doc = TradingDocument::default();
                self.save(&doc).await?;
                Ok(doc)
            }
        }
    }

    /// Write the document atomically.
    pub async fn save(&self, doc: &TradingDocument) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(doc)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        Ok(())
    }
}

/// The loaded document plus its store; every mutation is saved.
#[derive(Debug)]
pub struct SharedDocument {
    store: DocumentStore,
    doc: tokio::sync::Mutex<TradingDocument>,
}

impl SharedDocument {
    /// Wrap an already loaded document.
    pub fn new(store: DocumentStore, doc: TradingDocument) -> Self {
        Self {
            store,
            doc: tokio::sync::Mutex::new(doc),
        }
    }

    /// Load from `store`.
    pub async fn load(store: DocumentStore) -> Result<Self, StoreError> {
        let doc = store.load().await?;
        Ok(Self::new(store, doc))
    }

    /// Copy of the current document.
    pub async fn get(&self) -> TradingDocument {
        self.doc.lock().await.clone()
    }

    /// Apply `f` and save the result.
    pub async fn update<R>(&self, f: impl FnOnce(&mut TradingDocument) -> R) -> Result<R, StoreError> {
        let mut doc = self.doc.lock().await;
        let out = f(&mut doc);
        self.store.save(&doc).await?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "ladder-store-{}-{}.json",
            name,
            std::process::id()
        ))
    }

    #[test]
    fn defaults_have_every_level() {
        let doc = TradingDocument::default();
        assert_eq!(doc.trading.len(), 10);
        assert_eq!(doc.level(Side::Down, 5).unwrap().amount, None);
        assert_eq!(doc.level(Side::Up, 4).unwrap().amount, Some(Decimal::ZERO));
        assert_eq!(doc.amounts.first_rebound_pct, dec!(220));
    }

    #[test]
    fn malformed_numbers_fall_back_to_zero() {
        let raw = r#"{
            "trading": {"Up1": {"target_price": "abc", "amount": "2.5"}},
            "amounts": {"initial_amount_pct": "", "first_rebound_pct": 200},
            "coin": "ETH"
        }"#;
        let mut doc: TradingDocument = serde_json::from_str(raw).unwrap();
        doc.fill_missing_levels();

        let up1 = doc.level(Side::Up, 1).unwrap();
        assert_eq!(up1.target_price, Decimal::ZERO);
        assert_eq!(up1.amount, Some(dec!(2.5)));
        assert_eq!(doc.amounts.initial_amount_pct, Decimal::ZERO);
        assert_eq!(doc.amounts.first_rebound_pct, dec!(200));
        assert_eq!(doc.amounts.n_rebound_pct, dec!(120));
        assert_eq!(doc.coin, Coin::Eth);
        assert_eq!(doc.trading.len(), 10);
    }

    #[test]
    fn url_history_keeps_one_entry() {
        let mut doc = TradingDocument::default();
        doc.record_url("https://polymarket.com/event/a");
        doc.record_url("https://polymarket.com/event/b");
        assert_eq!(doc.url_history, vec!["https://polymarket.com/event/b".to_string()]);
        assert_eq!(doc.website.url, "https://polymarket.com/event/b");
    }

    #[test]
    fn capture_and_restore_levels() {
        let mut state = LadderState::new(dec!(52), dec!(100), dec!(100));
        state.apply_amounts(LadderAmounts {
            l1: dec!(1),
            l2: dec!(2),
            l3: dec!(3),
            l4: dec!(4),
        });
        state.arm_entry();
        state.level_mut(Side::Down, 5).arm(dec!(99));

        let mut doc = TradingDocument::default();
        doc.capture(&state);
        assert_eq!(doc.level(Side::Up, 3).unwrap().amount, Some(dec!(3)));

        let mut restored = LadderState::new(dec!(0), dec!(100), dec!(100));
        doc.restore(&mut restored);
        assert_eq!(restored.level(Side::Down, 5).target_price, dec!(99));
        assert_eq!(restored.level(Side::Up, 1).target_price, dec!(52));
        assert_eq!(restored.amounts.map(|a| a.l4), Some(dec!(4)));
    }

    #[tokio::test]
    async fn missing_file_is_created() {
        let path = temp_path("missing");
        let _ = tokio::fs::remove_file(&path).await;
        let store = DocumentStore::new(&path);

        let doc = store.load().await.unwrap();
        assert_eq!(doc, TradingDocument::default());
        assert!(tokio::fs::metadata(&path).await.is_ok());
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn corrupt_file_is_replaced() {
        let path = temp_path("corrupt");
        tokio::fs::write(&path, "{ not json").await.unwrap();
        let store = DocumentStore::new(&path);

        let doc = store.load().await.unwrap();
        assert_eq!(doc, TradingDocument::default());
        let reread = store.load().await.unwrap();
        assert_eq!(reread, doc);
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn shared_document_saves_updates() {
        let path = temp_path("shared");
        let _ = tokio::fs::remove_file(&path).await;
        let shared = SharedDocument::load(DocumentStore::new(&path)).await.unwrap();

        shared.update(|doc| doc.coin = Coin::Xrp).await.unwrap();

        let reloaded = DocumentStore::new(&path).load().await.unwrap();
        assert_eq!(reloaded.coin, Coin::Xrp);
        assert_eq!(shared.get().await.coin, Coin::Xrp);
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn save_then_load() {
        let path = temp_path("roundtrip");
        let store = DocumentStore::new(&path);
        let mut doc = TradingDocument::default();
        doc.record_url("https://polymarket.com/event/bitcoin-up-or-down-on-october-19");
        doc.coin = Coin::Sol;

        store.save(&doc).await.unwrap();
        assert_eq!(store.load().await.unwrap(), doc);
        let _ = tokio::fs::remove_file(&path).await;
    }
}
