//! Alert subjects and bodies.

use rust_decimal::Decimal;

use crate::ladder::RunSummary;

/// Labels stamped into every subject.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertContext {
    /// Host running the bot.
    pub host: String,
    /// Trading pair (event slug).
    pub pair: String,
}

/// A rendered alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    /// Subject line.
    pub subject: String,
    /// Message body.
    pub body: String,
}

fn money(value: Option<Decimal>) -> String {
    value
        .map(|v| format!("{:.2}", v))
        .unwrap_or_else(|| "n/a".to_string())
}

fn counters(summary: &RunSummary) -> String {
    format!(
        "trades: {}\nsells: {}\nresets: {}\ncash: {}\nportfolio: {}",
        summary.trade_count,
        summary.sell_count,
        summary.reset_count,
        money(summary.cash),
        money(summary.portfolio),
    )
}

impl Alert {
    /// Alert with a literal subject and body.
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }

    /// A buy, sell or reset, e.g. event `Buy Up1`.
    pub fn trade(
        ctx: &AlertContext,
        event: &str,
        price: Decimal,
        amount: Option<Decimal>,
        summary: &RunSummary,
    ) -> Self {
        let count = summary.trade_count.max(summary.sell_count);
        let subject = format!(
            "{} resets {} #{} {}-{}",
            ctx.host, summary.reset_count, count, event, ctx.pair
        );
        let body = format!(
            "event: {}\nprice: {}¢\namount: {}\n{}",
            event,
            price,
            money(amount),
            counters(summary)
        );
        Self { subject, body }
    }

    /// Session lost; recovery is starting.
    pub fn connection_lost(ctx: &AlertContext, reason: &str, summary: &RunSummary) -> Self {
        Self {
            subject: format!("{} session failure {} needs attention", ctx.host, ctx.pair),
            body: format!("reason: {}\n{}", reason, counters(summary)),
        }
    }

    /// Session is back after `attempts` reconnects.
    pub fn recovered(ctx: &AlertContext, attempts: u32) -> Self {
        Self {
            subject: format!("{} session recovered {}", ctx.host, ctx.pair),
            body: format!("reconnected after {} attempt(s), monitors resumed", attempts),
        }
    }

    /// Recovery gave up; manual start required.
    pub fn recovery_failed(ctx: &AlertContext, reason: &str) -> Self {
        Self {
            subject: format!("{} session recovery failed {}", ctx.host, ctx.pair),
            body: format!("reason: {}\nmanual start required", reason),
        }
    }

    /// Critical elements could not be located.
    pub fn selector_health(ctx: &AlertContext, failed: &[String]) -> Self {
        let list = failed
            .iter()
            .map(|name| format!("- {}", name))
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            subject: format!("{} element check failed {}", ctx.host, ctx.pair),
            body: format!("{} element(s) not found:\n{}", failed.len(), list),
        }
    }

    /// Reference price barely moved over the day.
    pub fn low_variance(
        ctx: &AlertContext,
        symbol: &str,
        zero_price: Decimal,
        now_price: Decimal,
        change_pct: Decimal,
    ) -> Self {
        Self {
            subject: format!("{} {} flat day {}", ctx.host, symbol, ctx.pair),
            body: format!(
                "{} opened at {} and is at {} ({:.4}%)",
                symbol, zero_price, now_price, change_pct
            ),
        }
    }

    /// Nightly discovery switched markets.
    pub fn market_switched(ctx: &AlertContext, url: &str) -> Self {
        Self {
            subject: format!("{} switched market {}", ctx.host, ctx.pair),
            body: format!("now trading {}", url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ctx() -> AlertContext {
        AlertContext {
            host: "box-1".into(),
            pair: "bitcoin-up-or-down-on-october-19".into(),
        }
    }

    #[test]
    fn trade_subject_format() {
        let summary = RunSummary {
            trade_count: 2,
            sell_count: 0,
            reset_count: 3,
            cash: Some(dec!(97.5)),
            portfolio: None,
        };
        let alert = Alert::trade(&ctx(), "Buy Down2", dec!(52), Some(dec!(5.5)), &summary);

        assert_eq!(
            alert.subject,
            "box-1 resets 3 #2 Buy Down2-bitcoin-up-or-down-on-october-19"
        );
        assert!(alert.body.contains("amount: 5.50"));
        assert!(alert.body.contains("portfolio: n/a"));
    }

    #[test]
    fn selector_health_lists_failures() {
        let alert = Alert::selector_health(&ctx(), &["Up order book".into(), "event metadata".into()]);
        assert!(alert.body.starts_with("2 element(s)"));
        assert!(alert.body.contains("- event metadata"));
    }
}
