//! Polymarket Up/Down ladder bot entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use rust_decimal::Decimal;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use polymarket_ladder::api::{create_router, AppState};
use polymarket_ladder::config::Config;
use polymarket_ladder::controller::Controller;
use polymarket_ladder::feed::{BinanceTicker, ReferenceState};
use polymarket_ladder::ladder::{
    compute_ladder_amounts, percent, LadderParams, LadderState, TradeLadder, LEVELS,
};
use polymarket_ladder::market::{
    discovery::resolve_session, ClobMarket, Coin, GammaDiscovery, MarketDiscovery, Side,
};
use polymarket_ladder::metrics;
use polymarket_ladder::monitors::{register_all, MonitorContext};
use polymarket_ladder::notify::{Alerts, LogNotifier, Notifier, TelegramNotifier};
use polymarket_ladder::retry::RetryPolicy;
use polymarket_ladder::scheduler::{MonitorScheduler, SystemClock};
use polymarket_ladder::store::{DocumentStore, SharedDocument};
use polymarket_ladder::supervisor::{ConnectionSupervisor, ScriptLauncher, SessionTarget};
use polymarket_ladder::sync::StopSignal;
use polymarket_ladder::utils::shutdown_signal;

/// Five-level Up/Down ladder bot for Polymarket daily markets.
#[derive(Parser, Debug)]
#[command(name = "polymarket-ladder")]
#[command(about = "Laddered Up/Down trading bot for Polymarket daily markets")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,

    /// HTTP server port for health/metrics/operator endpoints.
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bot and its operator API (default).
    Run {
        /// HTTP server port for health/metrics/operator endpoints.
        #[arg(short, long)]
        port: Option<u16>,

        /// Market URL to trade, overriding the stored one.
        #[arg(long)]
        url: Option<String>,

        /// Start the monitors without waiting for an operator start.
        #[arg(long)]
        autostart: bool,
    },

    /// Check configuration validity.
    CheckConfig,

    /// Print the stored ladder levels.
    ShowLadder,

    /// Print the stake schedule for a cash amount.
    Amounts {
        /// Cash to size the ladder from.
        #[arg(long)]
        cash: Decimal,
    },

    /// Find today's Up/Down market for a coin.
    DiscoverMarket {
        /// Coin symbol (BTC, ETH, SOL, XRP).
        #[arg(long, default_value = "BTC")]
        coin: Coin,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new("polymarket_ladder=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    // Handle subcommands
    match args.command {
        Some(Command::CheckConfig) => cmd_check_config().await,
        Some(Command::ShowLadder) => cmd_show_ladder().await,
        Some(Command::Amounts { cash }) => cmd_amounts(cash).await,
        Some(Command::DiscoverMarket { coin }) => cmd_discover_market(coin).await,
        Some(Command::Run {
            port,
            url,
            autostart,
        }) => cmd_run(port, url, autostart).await,
        None => cmd_run(args.port, None, false).await,
    }
}

fn load_config() -> anyhow::Result<Config> {
    let config = Config::load().context("Failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration validation failed: {}", e))?;
    Ok(config)
}

/// Check configuration validity.
async fn cmd_check_config() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("POLYMARKET LADDER - CONFIGURATION CHECK");
    println!("======================================================================");

    print!("Loading configuration... ");
    let config = match Config::load() {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    print!("Validating configuration... ");
    match config.validate() {
        Ok(()) => println!("OK"),
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    print!("Loading trading document... ");
    let doc = DocumentStore::new(&config.ladder_config_path).load().await?;
    println!("OK");

    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!("  Document: {}", config.ladder_config_path);
    println!("  Market URL: {}", display_or(&doc.website.url, "(none, discovered on start)"));
    println!("  Coin: {}", doc.coin);
    println!("  Default Target Price: {}c", doc.default_target_price);
    println!("  Premium: {}c", config.price_premium);
    println!(
        "  Min Shares: Up {} / Down {}",
        config.up_min_shares, config.down_min_shares
    );
    println!(
        "  Rebound Bands: Up {}-{} / Down {}-{}",
        config.up_rebound_low, config.up_rebound_high, config.down_rebound_low, config.down_rebound_high
    );
    println!("  Exit Liquidity: {}", config.exit_liquidity);
    println!(
        "  Amounts: initial {}% / first rebound {}% / n rebound {}% / margin {}%",
        doc.amounts.initial_amount_pct,
        doc.amounts.first_rebound_pct,
        doc.amounts.n_rebound_pct,
        doc.amounts.margin_pct
    );
    println!(
        "  Notifier: {}",
        if config.has_telegram() { "Telegram" } else { "Log only" }
    );
    println!(
        "  Relaunch Script: {}",
        config.relaunch_script.as_deref().unwrap_or("(none)")
    );
    println!("  Paper Cash: ${}", config.sim_balance);
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

fn display_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() {
        fallback
    } else {
        value
    }
}

/// Print the stored ladder.
async fn cmd_show_ladder() -> anyhow::Result<()> {
    let config = load_config()?;
    let doc = DocumentStore::new(&config.ladder_config_path).load().await?;

    let mut state = LadderState::new(
        doc.default_target_price,
        config.up_min_shares,
        config.down_min_shares,
    );
    doc.restore(&mut state);

    println!("======================================================================");
    println!("POLYMARKET LADDER - STORED LEVELS");
    println!("======================================================================");
    println!("  Market: {}", display_or(&doc.website.url, "(none)"));
    println!("  Default Target Price: {}c", state.default_target_price);
    println!("----------------------------------------------------------------------");
    println!("  {:<6} {:>6} {:>12} {:>12}", "Level", "Side", "Target (c)", "Stake ($)");
    for n in 1..=LEVELS {
        for side in Side::ALL {
            let level = state.level(side, n);
            let stake = level
                .stake
                .map(|s| format!("{:.2}", s))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {:<6} {:>6} {:>12} {:>12}",
                n, side, level.target_price, stake
            );
        }
    }
    println!("======================================================================");

    Ok(())
}

/// Print the stake schedule for `cash`.
async fn cmd_amounts(cash: Decimal) -> anyhow::Result<()> {
    let config = load_config()?;
    let doc = DocumentStore::new(&config.ladder_config_path).load().await?;
    let pcts = &doc.amounts;

    let amounts = compute_ladder_amounts(
        cash,
        percent(pcts.initial_amount_pct),
        percent(pcts.first_rebound_pct),
        percent(pcts.n_rebound_pct),
    )?;

    println!("======================================================================");
    println!("POLYMARKET LADDER - STAKE SCHEDULE FOR ${}", cash);
    println!("======================================================================");
    println!("  L1: ${:.2}  ({}% of cash)", amounts.l1, pcts.initial_amount_pct);
    println!("  L2: ${:.2}  ({}% of L1)", amounts.l2, pcts.first_rebound_pct);
    println!("  L3: ${:.2}  ({}% of L2)", amounts.l3, pcts.n_rebound_pct);
    println!("  L4: ${:.2}  ({}% of L3)", amounts.l4, pcts.n_rebound_pct);
    println!("----------------------------------------------------------------------");
    println!("  Total per side: ${:.2}", amounts.total());
    println!("======================================================================");

    Ok(())
}

/// Find today's market for `coin`.
async fn cmd_discover_market(coin: Coin) -> anyhow::Result<()> {
    let config = load_config()?;
    let http = ClobMarket::http_client(&config)?;
    let discovery = GammaDiscovery::new(http.clone(), config.polymarket_gamma_url.clone());

    println!("======================================================================");
    println!("POLYMARKET LADDER - MARKET DISCOVERY");
    println!("======================================================================");
    println!("\nSearching for today's {} Up/Down market...\n", coin);

    let today = chrono::Local::now().date_naive();
    match discovery.find_daily_market(coin, today).await {
        Ok(url) => {
            println!("MARKET FOUND");
            println!("----------------------------------------------------------------------");
            println!("  URL: {}", url);
            match resolve_session(&http, &config.polymarket_gamma_url, &url).await {
                Ok(session) => {
                    println!("  Slug: {}", session.slug);
                    println!("  UP Token: {}", session.up_token_id);
                    println!("  DOWN Token: {}", session.down_token_id);
                    if let Some(q) = &session.question {
                        println!("  Question: {}", q);
                    }
                }
                Err(e) => println!("  Could not resolve tokens: {}", e),
            }
            println!("======================================================================");
        }
        Err(e) => {
            println!("NO MARKET FOUND");
            println!("  Error: {}", e);
            println!("======================================================================");
        }
    }

    Ok(())
}

/// Run the bot.
async fn cmd_run(port: Option<u16>, url: Option<String>, autostart: bool) -> anyhow::Result<()> {
    // Load configuration
    info!("Loading configuration...");
    let config = Arc::new(load_config().map_err(|e| {
        error!("{:#}", e);
        e
    })?);

    // Initialize metrics
    let prometheus = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder not installed");
            None
        }
    };
    metrics::init_metrics();

    // Trading document
    let store = DocumentStore::new(&config.ladder_config_path);
    let document = Arc::new(SharedDocument::load(store).await?);
    if let Some(url) = &url {
        document.update(|doc| doc.record_url(url)).await?;
    }
    let doc = document.get().await;
    info!(
        path = %config.ladder_config_path,
        url = %doc.website.url,
        coin = %doc.coin,
        "Trading document loaded"
    );

    // Collaborators
    let http = ClobMarket::http_client(&config)?;
    let market = Arc::new(ClobMarket::new(&config, http.clone()));
    let notifier: Arc<dyn Notifier> = match (&config.telegram_bot_token, &config.telegram_chat_id) {
        (Some(token), Some(chat)) if config.has_telegram() => Arc::new(TelegramNotifier::new(
            http.clone(),
            token.clone(),
            chat.clone(),
        )),
        _ => Arc::new(LogNotifier),
    };
    let alerts = Alerts::new(
        notifier,
        RetryPolicy::from_millis(config.notify_attempts, 1000),
        config.host_label.clone(),
    );
    let feed = Arc::new(BinanceTicker::new(
        config.reference_ws_url.clone(),
        Duration::from_secs(10),
    ));
    let discovery = Arc::new(GammaDiscovery::new(
        http.clone(),
        config.polymarket_gamma_url.clone(),
    ));

    // Core
    let stop = StopSignal::new();
    let clock = Arc::new(SystemClock);
    let ladder = Arc::new(TradeLadder::new(
        market.clone(),
        alerts.clone(),
        LadderParams::from_config(&config),
        stop.clone(),
    ));
    ladder.with_state(|state| doc.restore(state)).await;

    let target = Arc::new(SessionTarget::new(doc.website.url.clone(), doc.coin));
    let (scheduler, failures) = MonitorScheduler::new(clock.clone(), stop.clone());
    let scheduler = Arc::new(scheduler);

    let ctx = Arc::new(MonitorContext {
        market: market.clone(),
        ladder: ladder.clone(),
        alerts: alerts.clone(),
        document,
        config: config.clone(),
        reference: Arc::new(ReferenceState::new()),
        feed,
        discovery,
        scheduler: Arc::downgrade(&scheduler),
        target: target.clone(),
        clock,
        stop,
    });
    register_all(&scheduler, ctx.clone());

    let mut supervisor = ConnectionSupervisor::new(
        market,
        scheduler.clone(),
        ladder,
        alerts,
        target,
        RetryPolicy::from_millis(config.reconnect_attempts, config.reconnect_delay_ms),
    );
    if let Some(script) = &config.relaunch_script {
        supervisor = supervisor.with_launcher(Arc::new(ScriptLauncher::new(
            script,
            config.readiness_url.clone(),
            http,
            RetryPolicy::from_millis(config.readiness_attempts, 1000),
        )));
    }
    let supervisor = Arc::new(supervisor);
    tokio::spawn(supervisor.clone().run(failures));

    let controller = Arc::new(Controller::new(ctx, scheduler, supervisor));

    // Start HTTP server
    let mut app_state = AppState::new(controller.clone());
    if let Some(handle) = prometheus {
        app_state = app_state.with_prometheus(handle);
    }
    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(config.port)));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    let router = create_router(app_state);
    let _server_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    });

    if autostart {
        if let Err(e) = controller.start().await {
            error!(error = %e, "Autostart failed, waiting for an operator start");
        }
    } else {
        info!("Waiting for POST /api/v1/start");
    }

    shutdown_signal().await;
    controller.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}
