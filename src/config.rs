//! Runtime settings loaded from environment variables.
//!
//! Per-level prices and stakes live in the trading document (see
//! [`crate::store`]); this struct carries the strategy constants, retry
//! budgets and monitor cadences that only change between deployments.

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::market::ExitLiquidity;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Endpoints ===
    /// CLOB API base URL.
    #[serde(default = "default_clob_url")]
    pub polymarket_clob_url: String,

    /// Gamma API base URL.
    #[serde(default = "default_gamma_url")]
    pub polymarket_gamma_url: String,

    /// Reference price WebSocket base URL.
    #[serde(default = "default_reference_ws_url")]
    pub reference_ws_url: String,

    /// Path of the persisted trading document.
    #[serde(default = "default_ladder_config_path")]
    pub ladder_config_path: String,

    // === Strategy ===
    /// Price slack above the nominal target, in cents.
    #[serde(default = "default_price_premium")]
    pub price_premium: Decimal,

    /// Minimum counter-party shares for Up quotes.
    #[serde(default = "default_min_shares")]
    pub up_min_shares: Decimal,

    /// Minimum counter-party shares for Down quotes.
    #[serde(default = "default_min_shares")]
    pub down_min_shares: Decimal,

    /// Default target price in cents, used until the document overrides it.
    #[serde(default = "default_target_price")]
    pub default_target_price: Decimal,

    /// Level-5 price armed on the side that filled level 4.
    #[serde(default = "default_rebound_sell_price")]
    pub rebound_sell_price: Decimal,

    /// Level-5 price armed on both sides after a level-1 fill.
    #[serde(default = "default_safe_sell_price")]
    pub safe_sell_price: Decimal,

    // === Exit bands ===
    /// Lower bound of the Up rebound band.
    #[serde(default = "default_up_rebound_low")]
    pub up_rebound_low: Decimal,

    /// Upper bound of the Up rebound band.
    #[serde(default = "default_rebound_high")]
    pub up_rebound_high: Decimal,

    /// Lower bound of the Down rebound band.
    #[serde(default = "default_down_rebound_low")]
    pub down_rebound_low: Decimal,

    /// Upper bound of the Down rebound band.
    #[serde(default = "default_rebound_high")]
    pub down_rebound_high: Decimal,

    /// Lowest live-minus-target delta accepted by the rebound exit.
    #[serde(default = "default_rebound_delta_low")]
    pub rebound_delta_low: Decimal,

    /// Highest live-minus-target delta accepted by the rebound exit.
    #[serde(default = "default_rebound_delta_high")]
    pub rebound_delta_high: Decimal,

    /// Minimum level-5 target for the normal exit.
    #[serde(default = "default_normal_exit_min")]
    pub normal_exit_min: Decimal,

    /// Lowest delta accepted by the normal exit.
    #[serde(default)]
    pub normal_delta_low: Decimal,

    /// Highest delta accepted by the normal exit.
    #[serde(default = "default_normal_delta_high")]
    pub normal_delta_high: Decimal,

    /// Book depth checked before a level-5 exit (`counterparty` or `bids`).
    #[serde(default)]
    pub exit_liquidity: ExitLiquidity,

    // === Quote sanity guards ===
    /// Buys are skipped unless the Up ask is above this.
    #[serde(default = "default_buy_min_ask")]
    pub buy_min_ask: Decimal,

    /// Buys are skipped unless the Up bid is below this.
    #[serde(default = "default_buy_max_bid")]
    pub buy_max_bid: Decimal,

    /// Up exits are skipped unless the bid is above this.
    #[serde(default = "default_up_exit_min_bid")]
    pub up_exit_min_bid: Decimal,

    /// Down exits are skipped unless the ask is below this.
    #[serde(default = "default_down_exit_max_ask")]
    pub down_exit_max_ask: Decimal,

    // === Retry budgets ===
    /// Attempts per buy/sell before abandoning.
    #[serde(default = "default_trade_retry_attempts")]
    pub trade_retry_attempts: u32,

    /// Delay between buy/sell attempts in milliseconds.
    #[serde(default = "default_one_second_ms")]
    pub trade_retry_delay_ms: u64,

    /// Reconnect attempts after a connectivity failure.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    /// Delay between reconnect attempts in milliseconds.
    #[serde(default = "default_two_seconds_ms")]
    pub reconnect_delay_ms: u64,

    /// Readiness polls after a relaunch.
    #[serde(default = "default_readiness_attempts")]
    pub readiness_attempts: u32,

    /// Attempts to compute ladder amounts from the cash snapshot.
    #[serde(default = "default_amount_attempts")]
    pub amount_retry_attempts: u32,

    /// Attempts to read the daily reference price.
    #[serde(default = "default_reference_attempts")]
    pub reference_retry_attempts: u32,

    /// Alert delivery attempts.
    #[serde(default = "default_notify_attempts")]
    pub notify_attempts: u32,

    /// Timeout for hot-path market calls in milliseconds.
    #[serde(default = "default_quote_timeout_ms")]
    pub quote_timeout_ms: u64,

    /// HTTP timeout for REST calls in milliseconds.
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    // === Monitor cadences ===
    /// Price poll interval in milliseconds.
    #[serde(default = "default_one_second_ms")]
    pub price_poll_interval_ms: u64,

    /// Balance poll interval in milliseconds.
    #[serde(default = "default_one_second_ms")]
    pub balance_poll_interval_ms: u64,

    /// Session check interval in seconds.
    #[serde(default = "default_session_check_s")]
    pub session_check_interval_s: u64,

    /// URL drift check interval in seconds.
    #[serde(default = "default_url_check_s")]
    pub url_check_interval_s: u64,

    /// Shortest page refresh delay in seconds.
    #[serde(default = "default_refresh_min_s")]
    pub refresh_min_s: u64,

    /// Longest page refresh delay in seconds.
    #[serde(default = "default_refresh_max_s")]
    pub refresh_max_s: u64,

    /// Selector health check interval in seconds.
    #[serde(default = "default_selector_check_s")]
    pub selector_check_interval_s: u64,

    /// Relative change (percent) at or below which the variance check alerts.
    #[serde(default = "default_variance_threshold_pct")]
    pub variance_threshold_pct: Decimal,

    // === Session relaunch ===
    /// Script that relaunches the session host, if any.
    #[serde(default)]
    pub relaunch_script: Option<String>,

    /// URL polled for readiness after a relaunch.
    #[serde(default = "default_readiness_url")]
    pub readiness_url: String,

    // === Notifications ===
    /// Telegram bot token.
    #[serde(default)]
    pub telegram_bot_token: Option<String>,

    /// Telegram chat id.
    #[serde(default)]
    pub telegram_chat_id: Option<String>,

    /// Host label used in alert subjects.
    #[serde(default = "default_host_label")]
    pub host_label: String,

    // === Paper execution ===
    /// Starting cash for the paper ledger.
    #[serde(default = "default_sim_balance")]
    pub sim_balance: Decimal,

    // === Server Configuration ===
    /// HTTP server port for health/metrics/operator endpoints.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,

    /// Enable verbose logging.
    #[serde(default)]
    pub verbose: bool,
}

fn default_clob_url() -> String {
    "https://clob.polymarket.com".to_string()
}

fn default_gamma_url() -> String {
    "https://gamma-api.polymarket.com".to_string()
}

fn default_reference_ws_url() -> String {
    "wss://stream.binance.com:9443/ws".to_string()
}

fn default_ladder_config_path() -> String {
    "config.json".to_string()
}

fn default_price_premium() -> Decimal {
    Decimal::new(3, 0)
}

fn default_min_shares() -> Decimal {
    Decimal::new(100, 0)
}

fn default_target_price() -> Decimal {
    Decimal::new(52, 0)
}

fn default_rebound_sell_price() -> Decimal {
    Decimal::new(47, 0)
}

fn default_safe_sell_price() -> Decimal {
    Decimal::new(99, 0)
}

fn default_up_rebound_low() -> Decimal {
    Decimal::new(44, 0)
}

fn default_down_rebound_low() -> Decimal {
    Decimal::new(40, 0)
}

fn default_rebound_high() -> Decimal {
    Decimal::new(47, 0)
}

fn default_rebound_delta_low() -> Decimal {
    Decimal::new(-2, 0)
}

fn default_rebound_delta_high() -> Decimal {
    Decimal::ONE
}

fn default_normal_exit_min() -> Decimal {
    Decimal::new(60, 0)
}

fn default_normal_delta_high() -> Decimal {
    Decimal::new(11, 1) // 1.1
}

fn default_buy_min_ask() -> Decimal {
    Decimal::new(20, 0)
}

fn default_buy_max_bid() -> Decimal {
    Decimal::new(97, 0)
}

fn default_up_exit_min_bid() -> Decimal {
    Decimal::new(10, 0)
}

fn default_down_exit_max_ask() -> Decimal {
    Decimal::new(90, 0)
}

fn default_trade_retry_attempts() -> u32 {
    50
}

fn default_one_second_ms() -> u64 {
    1000
}

fn default_two_seconds_ms() -> u64 {
    2000
}

fn default_reconnect_attempts() -> u32 {
    3
}

fn default_readiness_attempts() -> u32 {
    30
}

fn default_amount_attempts() -> u32 {
    15
}

fn default_reference_attempts() -> u32 {
    10
}

fn default_notify_attempts() -> u32 {
    2
}

fn default_quote_timeout_ms() -> u64 {
    3000
}

fn default_http_timeout_ms() -> u64 {
    5000
}

fn default_session_check_s() -> u64 {
    20
}

fn default_url_check_s() -> u64 {
    5
}

fn default_refresh_min_s() -> u64 {
    120
}

fn default_refresh_max_s() -> u64 {
    300
}

fn default_selector_check_s() -> u64 {
    3600
}

fn default_variance_threshold_pct() -> Decimal {
    Decimal::new(1, 2) // 0.01%
}

fn default_readiness_url() -> String {
    "http://127.0.0.1:9222/json".to_string()
}

fn default_host_label() -> String {
    "ladder".to_string()
}

fn default_sim_balance() -> Decimal {
    Decimal::new(100, 0) // $100
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            polymarket_clob_url: default_clob_url(),
            polymarket_gamma_url: default_gamma_url(),
            reference_ws_url: default_reference_ws_url(),
            ladder_config_path: default_ladder_config_path(),
            price_premium: default_price_premium(),
            up_min_shares: default_min_shares(),
            down_min_shares: default_min_shares(),
            default_target_price: default_target_price(),
            rebound_sell_price: default_rebound_sell_price(),
            safe_sell_price: default_safe_sell_price(),
            up_rebound_low: default_up_rebound_low(),
            up_rebound_high: default_rebound_high(),
            down_rebound_low: default_down_rebound_low(),
            down_rebound_high: default_rebound_high(),
            rebound_delta_low: default_rebound_delta_low(),
            rebound_delta_high: default_rebound_delta_high(),
            normal_exit_min: default_normal_exit_min(),
            normal_delta_low: Decimal::ZERO,
            normal_delta_high: default_normal_delta_high(),
            exit_liquidity: ExitLiquidity::default(),
            buy_min_ask: default_buy_min_ask(),
            buy_max_bid: default_buy_max_bid(),
            up_exit_min_bid: default_up_exit_min_bid(),
            down_exit_max_ask: default_down_exit_max_ask(),
            trade_retry_attempts: default_trade_retry_attempts(),
            trade_retry_delay_ms: default_one_second_ms(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_ms: default_two_seconds_ms(),
            readiness_attempts: default_readiness_attempts(),
            amount_retry_attempts: default_amount_attempts(),
            reference_retry_attempts: default_reference_attempts(),
            notify_attempts: default_notify_attempts(),
            quote_timeout_ms: default_quote_timeout_ms(),
            http_timeout_ms: default_http_timeout_ms(),
            price_poll_interval_ms: default_one_second_ms(),
            balance_poll_interval_ms: default_one_second_ms(),
            session_check_interval_s: default_session_check_s(),
            url_check_interval_s: default_url_check_s(),
            refresh_min_s: default_refresh_min_s(),
            refresh_max_s: default_refresh_max_s(),
            selector_check_interval_s: default_selector_check_s(),
            variance_threshold_pct: default_variance_threshold_pct(),
            relaunch_script: None,
            readiness_url: default_readiness_url(),
            telegram_bot_token: None,
            telegram_chat_id: None,
            host_label: default_host_label(),
            sim_balance: default_sim_balance(),
            port: default_port(),
            rust_log: default_log_level(),
            verbose: false,
        }
    }
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), String> {
        if self.polymarket_clob_url.is_empty() || self.polymarket_gamma_url.is_empty() {
            return Err("POLYMARKET_CLOB_URL and POLYMARKET_GAMMA_URL are required".to_string());
        }

        if self.price_premium <= Decimal::ZERO {
            return Err("PRICE_PREMIUM must be positive".to_string());
        }

        let hundred = Decimal::ONE_HUNDRED;
        if self.default_target_price <= Decimal::ZERO || self.default_target_price >= hundred {
            return Err("DEFAULT_TARGET_PRICE must be between 0 and 100".to_string());
        }

        if self.up_rebound_low > self.up_rebound_high
            || self.down_rebound_low > self.down_rebound_high
        {
            return Err("rebound bands must have low <= high".to_string());
        }

        if self.rebound_delta_low > self.rebound_delta_high
            || self.normal_delta_low > self.normal_delta_high
        {
            return Err("exit delta bands must have low <= high".to_string());
        }

        if self.refresh_min_s > self.refresh_max_s {
            return Err("REFRESH_MIN_S must not exceed REFRESH_MAX_S".to_string());
        }

        if self.trade_retry_attempts == 0 || self.reconnect_attempts == 0 {
            return Err("retry budgets must allow at least one attempt".to_string());
        }

        Ok(())
    }

    /// Whether Telegram delivery is configured.
    pub fn has_telegram(&self) -> bool {
        matches!(
            (&self.telegram_bot_token, &self.telegram_chat_id),
            (Some(token), Some(chat)) if !token.is_empty() && !chat.is_empty()
        )
    }
}
