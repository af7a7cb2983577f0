//! The periodic tasks that drive the bot.
//!
//! - [`polling`]: price and balance polling
//! - [`session`]: session liveness, URL drift, page refresh, element health
//! - [`daily`]: cash/price snapshots, variance check, market auto-discovery

pub mod daily;
pub mod polling;
pub mod session;

use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::warn;

use crate::config::Config;
use crate::feed::{ReferencePriceSource, ReferenceState};
use crate::ladder::TradeLadder;
use crate::market::{MarketDiscovery, MarketInterface};
use crate::notify::Alerts;
use crate::scheduler::{Clock, MonitorScheduler, Schedule, TaskSpec};
use crate::store::SharedDocument;
use crate::supervisor::SessionTarget;
use crate::sync::StopSignal;

pub use daily::{switch_market, AutoDiscovery, CashSnapshot, PriceSnapshot, VarianceCheck};
pub use polling::{BalancePoll, PricePoll};
pub use session::{PageRefresh, SelectorHealth, SessionCheck, UrlDrift};

/// Task names.
pub mod names {
    /// Quote polling and ladder ticks.
    pub const PRICE_POLL: &str = "price-poll";
    /// Cash and portfolio polling.
    pub const BALANCE_POLL: &str = "balance-poll";
    /// Login liveness.
    pub const SESSION_CHECK: &str = "session-check";
    /// Session URL against the target URL.
    pub const URL_DRIFT: &str = "url-drift";
    /// Periodic page reload.
    pub const PAGE_REFRESH: &str = "page-refresh";
    /// Daily cash snapshot and amounts.
    pub const CASH_SNAPSHOT: &str = "cash-snapshot";
    /// Daily reference zero price.
    pub const PRICE_SNAPSHOT: &str = "price-snapshot";
    /// Critical element probe.
    pub const SELECTOR_HEALTH: &str = "selector-health";
    /// Nightly flat-day check.
    pub const VARIANCE_CHECK: &str = "variance-check";
    /// Nightly market switch.
    pub const AUTO_DISCOVERY: &str = "auto-discovery";
}

/// Everything the monitors share.
pub struct MonitorContext {
    /// Market session.
    pub market: Arc<dyn MarketInterface>,
    /// Trade ladder.
    pub ladder: Arc<TradeLadder>,
    /// Alert dispatcher.
    pub alerts: Alerts,
    /// Persisted trading document.
    pub document: Arc<SharedDocument>,
    /// Runtime settings.
    pub config: Arc<Config>,
    /// Day-open reference price.
    pub reference: Arc<ReferenceState>,
    /// Reference price source.
    pub feed: Arc<dyn ReferencePriceSource>,
    /// Daily market discovery.
    pub discovery: Arc<dyn MarketDiscovery>,
    /// Scheduler, for tasks that toggle other tasks.
    pub scheduler: Weak<MonitorScheduler>,
    /// URL and coin the session should be on.
    pub target: Arc<SessionTarget>,
    /// Local wall clock.
    pub clock: Arc<dyn Clock>,
    /// Global stop signal.
    pub stop: StopSignal,
}

impl std::fmt::Debug for MonitorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorContext")
            .field("target", &self.target)
            .finish()
    }
}

impl MonitorContext {
    /// Save the ladder's levels into the document.
    pub async fn persist_ladder(&self) {
        let state = self.ladder.snapshot().await;
        if let Err(e) = self.document.update(|doc| doc.capture(&state)).await {
            warn!(error = %e, "Failed to persist ladder levels");
        }
    }

    /// Run `f` against the scheduler if it is still alive.
    pub fn with_scheduler(&self, f: impl FnOnce(&MonitorScheduler)) {
        if let Some(scheduler) = self.scheduler.upgrade() {
            f(&scheduler);
        }
    }
}

/// Register every monitor with its cadence.
pub fn register_all(scheduler: &MonitorScheduler, ctx: Arc<MonitorContext>) {
    let config = Arc::clone(&ctx.config);
    let secs = Duration::from_secs;
    let millis = Duration::from_millis;

    scheduler.register(
        Arc::new(PricePoll::new(ctx.clone())),
        TaskSpec::new(Schedule::Every(millis(config.price_poll_interval_ms))).first_after(secs(1)),
    );
    scheduler.register(
        Arc::new(BalancePoll::new(ctx.clone())),
        TaskSpec::new(Schedule::Every(millis(config.balance_poll_interval_ms))).first_after(secs(1)),
    );
    scheduler.register(
        Arc::new(SessionCheck::new(ctx.clone())),
        TaskSpec::new(Schedule::Every(secs(config.session_check_interval_s))).first_after(secs(2)),
    );
    scheduler.register(
        Arc::new(UrlDrift::new(ctx.clone())),
        TaskSpec::new(Schedule::Every(secs(config.url_check_interval_s))).first_after(secs(10)),
    );
    scheduler.register(
        Arc::new(PageRefresh::new(ctx.clone())),
        TaskSpec::new(Schedule::Jittered {
            min: secs(config.refresh_min_s),
            max: secs(config.refresh_max_s),
        })
        .first_after(secs(40)),
    );
    scheduler.register(
        Arc::new(CashSnapshot::new(ctx.clone())),
        TaskSpec::new(Schedule::daily(23, 59, 30)).first_after(secs(12)),
    );
    scheduler.register(
        Arc::new(PriceSnapshot::new(ctx.clone())),
        TaskSpec::new(Schedule::daily(0, 0, 0)).first_after(secs(14)),
    );
    scheduler.register(
        Arc::new(SelectorHealth::new(ctx.clone())),
        TaskSpec::new(Schedule::Every(secs(config.selector_check_interval_s))).first_after(secs(600)),
    );
    scheduler.register(
        Arc::new(VarianceCheck::new(ctx.clone())),
        TaskSpec::new(Schedule::daily(23, 0, 0)),
    );
    scheduler.register(
        Arc::new(AutoDiscovery::new(ctx)),
        TaskSpec::new(Schedule::daily(3, 30, 0)),
    );
}
