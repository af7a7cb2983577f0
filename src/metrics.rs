//! Prometheus metrics for the ladder, the monitors and the session.
//!
//! Counters cover trades, sells, resets and reconnections; histograms cover
//! tick evaluation, trade verification and HTTP latency.

use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use tracing::debug;

// === Metric Name Constants ===

/// Tick evaluation latency metric name.
pub const METRIC_TICK_LATENCY: &str = "ladder_tick_latency_ms";
/// Trade verification latency metric name.
pub const METRIC_VERIFY_LATENCY: &str = "trade_verify_latency_ms";
/// HTTP request latency metric name.
pub const METRIC_HTTP_REQUEST_LATENCY: &str = "http_request_latency_ms";
/// Monitor run latency metric name.
pub const METRIC_MONITOR_LATENCY: &str = "monitor_run_latency_ms";
/// Trades attempted counter metric name.
pub const METRIC_TRADES_ATTEMPTED: &str = "trades_attempted_total";
/// Trades executed counter metric name.
pub const METRIC_TRADES_EXECUTED: &str = "trades_executed_total";
/// Trades abandoned counter metric name.
pub const METRIC_TRADES_FAILED: &str = "trades_failed_total";
/// Sells counter metric name.
pub const METRIC_SELLS: &str = "sells_total";
/// Ladder resets counter metric name.
pub const METRIC_LADDER_RESETS: &str = "ladder_resets_total";
/// Session reconnects counter metric name.
pub const METRIC_RECONNECTS: &str = "session_reconnects_total";
/// Monitor failures counter metric name.
pub const METRIC_MONITOR_FAILURES: &str = "monitor_failures_total";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    describe_histogram!(METRIC_TICK_LATENCY, "Ladder tick evaluation latency in milliseconds");
    describe_histogram!(
        METRIC_VERIFY_LATENCY,
        "Time from first submit to a verified trade in milliseconds"
    );
    describe_histogram!(METRIC_HTTP_REQUEST_LATENCY, "HTTP request latency in milliseconds");
    describe_histogram!(METRIC_MONITOR_LATENCY, "Monitor task run latency in milliseconds");

    describe_counter!(METRIC_TRADES_ATTEMPTED, "Total number of level triggers that started a buy");
    describe_counter!(METRIC_TRADES_EXECUTED, "Total number of verified buys");
    describe_counter!(METRIC_TRADES_FAILED, "Total number of trades abandoned after retries");
    describe_counter!(METRIC_SELLS, "Total number of verified sells");
    describe_counter!(METRIC_LADDER_RESETS, "Total number of ladder resets");
    describe_counter!(METRIC_RECONNECTS, "Total number of session recoveries");
    describe_counter!(METRIC_MONITOR_FAILURES, "Total number of failed monitor runs");

    debug!("Metrics initialized");
}

/// Record trade verification latency.
pub fn record_verify_latency(start: Instant) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_VERIFY_LATENCY).record(latency_ms);
}

/// Record HTTP request latency.
pub fn record_http_latency(start: Instant, endpoint: &str) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_HTTP_REQUEST_LATENCY, "endpoint" => endpoint.to_string()).record(latency_ms);
}

/// Record one monitor run.
pub fn record_monitor_run(start: Instant, monitor: &'static str) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_MONITOR_LATENCY, "monitor" => monitor).record(latency_ms);
}

/// Increment trades attempted counter.
pub fn inc_trades_attempted() {
    counter!(METRIC_TRADES_ATTEMPTED).increment(1);
}

/// Increment trades executed counter.
pub fn inc_trades_executed() {
    counter!(METRIC_TRADES_EXECUTED).increment(1);
}

/// Increment trades failed counter.
pub fn inc_trades_failed() {
    counter!(METRIC_TRADES_FAILED).increment(1);
}

/// Increment sells counter.
pub fn inc_sells() {
    counter!(METRIC_SELLS).increment(1);
}

/// Increment ladder resets, labelled by whether the reset was counted.
pub fn inc_ladder_resets(counted: bool) {
    let label = if counted { "counted" } else { "clean" };
    counter!(METRIC_LADDER_RESETS, "kind" => label).increment(1);
}

/// Increment session reconnects, labelled by outcome.
pub fn inc_reconnects(recovered: bool) {
    let label = if recovered { "recovered" } else { "failed" };
    counter!(METRIC_RECONNECTS, "outcome" => label).increment(1);
}

/// Increment monitor failures counter.
pub fn inc_monitor_failures(monitor: &'static str) {
    counter!(METRIC_MONITOR_FAILURES, "monitor" => monitor).increment(1);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        let latency_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        histogram!(self.metric_name).record(latency_ms);
    }
}

/// Create a latency timer for one ladder tick.
pub fn timer_tick() -> LatencyTimer {
    LatencyTimer::new(METRIC_TICK_LATENCY)
}
