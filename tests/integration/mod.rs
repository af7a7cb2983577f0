//! Integration tests for the Polymarket ladder bot.
//!
//! The ladder tests drive the public API against the scripted mock market.
//! Tests marked `#[ignore]` talk to the real Gamma, CLOB and Binance
//! endpoints. Run them with: cargo test --test integration -- --ignored

use std::sync::Arc;
use std::time::Duration;

use polymarket_ladder::config::Config;
use polymarket_ladder::feed::{BinanceTicker, ReferencePriceSource};
use polymarket_ladder::ladder::{
    ExitKind, LadderAmounts, LadderParams, LevelState, TickOutcome, TradeLadder,
};
use polymarket_ladder::market::{
    ClobMarket, Coin, GammaDiscovery, MarketDiscovery, MarketInterface, MockCall, MockMarket,
    Quote, Side,
};
use polymarket_ladder::notify::{Alerts, MemoryNotifier};
use polymarket_ladder::retry::RetryPolicy;
use polymarket_ladder::store::{DocumentStore, SharedDocument, TradingDocument};
use polymarket_ladder::sync::StopSignal;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn quote(ask: Decimal, bid: Decimal) -> Quote {
    Quote {
        ask_price: ask,
        bid_price: bid,
        ask_shares: dec!(500),
        bid_shares: dec!(500),
    }
}

async fn ladder(market: Arc<MockMarket>) -> (TradeLadder, Arc<MemoryNotifier>) {
    let notifier = Arc::new(MemoryNotifier::new());
    let alerts = Alerts::new(notifier.clone(), RetryPolicy::from_millis(1, 1), "it");
    let mut params = LadderParams::from_config(&Config::default());
    params.trade_retry = RetryPolicy::from_millis(3, 1);

    let ladder = TradeLadder::new(market, alerts, params, StopSignal::new());
    ladder
        .apply_amounts(LadderAmounts {
            l1: dec!(2.5),
            l2: dec!(5.5),
            l3: dec!(6.6),
            l4: dec!(7.92),
        })
        .await;
    ladder.set_active(true).await;
    (ladder, notifier)
}

async fn tick(market: &MockMarket, ladder: &TradeLadder, q: Quote) -> TickOutcome {
    market.set_quote(q);
    ladder.on_tick(q).await.unwrap()
}

/// Walk all four buy levels, then take the rebound exit on the last side.
#[tokio::test]
async fn full_cycle_ends_in_rebound_exit() {
    let market = Arc::new(MockMarket::connected("https://polymarket.com/event/x", dec!(100)));
    let (ladder, notifier) = ladder(market.clone()).await;

    let up_bid = quote(dec!(53), dec!(60));
    let down_bid = quote(dec!(58), dec!(50));

    assert_eq!(
        tick(&market, &ladder, up_bid).await,
        TickOutcome::Bought { side: Side::Up, level: 1 }
    );
    assert_eq!(
        tick(&market, &ladder, down_bid).await,
        TickOutcome::Bought { side: Side::Down, level: 2 }
    );
    assert_eq!(
        tick(&market, &ladder, up_bid).await,
        TickOutcome::Bought { side: Side::Up, level: 3 }
    );
    assert_eq!(
        tick(&market, &ladder, down_bid).await,
        TickOutcome::Bought { side: Side::Down, level: 4 }
    );

    let state = ladder.snapshot().await;
    assert_eq!(state.trade_count, 4);
    assert_eq!(state.level(Side::Down, 5).target_price, dec!(47));
    assert_eq!(state.level(Side::Up, 5).target_price, dec!(52));

    // Nothing left to buy and no exit in range.
    assert_eq!(tick(&market, &ladder, down_bid).await, TickOutcome::NoAction);

    // Down sells at 100 - 53 = 47, right on its rebound target.
    assert_eq!(
        tick(&market, &ladder, quote(dec!(53), dec!(50))).await,
        TickOutcome::Exited {
            side: Side::Down,
            kind: ExitKind::Rebound
        }
    );

    let state = ladder.snapshot().await;
    assert_eq!(state.reset_count, 1);
    assert_eq!(state.trade_count, 0);
    assert_eq!(state.level(Side::Up, 2).target_price, dec!(52));
    assert_eq!(state.level(Side::Up, 2).state, LevelState::Armed);
    assert_eq!(state.level(Side::Up, 5).target_price, dec!(99));
    assert_eq!(state.level(Side::Down, 5).target_price, dec!(99));
    assert_eq!(market.position(Side::Down), Decimal::ZERO);
    assert!(market
        .calls()
        .contains(&MockCall::SellPartial(Side::Up, dec!(12.69))));

    tokio::time::sleep(Duration::from_millis(20)).await;
    let subjects = notifier.subjects();
    assert!(subjects.iter().any(|s| s.contains("Buy Down4")));
    assert!(subjects.iter().any(|s| s.contains("Rebound Down")));
}

/// A consumed level survives a restart as disabled.
#[tokio::test]
async fn persisted_ladder_does_not_rebuy_after_restart() {
    let path = std::env::temp_dir().join(format!("ladder-it-{}.json", std::process::id()));
    let market = Arc::new(MockMarket::connected("https://polymarket.com/event/x", dec!(100)));
    let (first, _) = ladder(market.clone()).await;
    let q = quote(dec!(53), dec!(60));
    assert!(matches!(tick(&market, &first, q).await, TickOutcome::Bought { .. }));

    let document = SharedDocument::new(DocumentStore::new(&path), TradingDocument::default());
    let state = first.snapshot().await;
    document.update(|doc| doc.capture(&state)).await.unwrap();

    let reloaded = SharedDocument::load(DocumentStore::new(&path)).await.unwrap();
    let doc = reloaded.get().await;
    let (second, _) = ladder(market.clone()).await;
    second.with_state(|s| doc.restore(s)).await;
    second.set_active(true).await;

    let restored = second.snapshot().await;
    assert_eq!(restored.level(Side::Up, 1).target_price, Decimal::ZERO);
    assert_eq!(restored.level(Side::Down, 2).target_price, dec!(52));
    assert_eq!(restored.level(Side::Up, 1).stake, Some(dec!(2.5)));
    assert_eq!(tick(&market, &second, q).await, TickOutcome::NoAction);
    assert_eq!(market.buy_calls(), 1);

    let _ = std::fs::remove_file(&path);
}

/// Find today's BTC market through Gamma.
#[tokio::test]
#[ignore = "requires network access"]
async fn test_discover_todays_market() {
    let config = Config::default();
    let http = ClobMarket::http_client(&config).unwrap();
    let discovery = GammaDiscovery::new(http, config.polymarket_gamma_url.clone());

    let today = chrono::Local::now().date_naive();
    match discovery.find_daily_market(Coin::Btc, today).await {
        Ok(url) => {
            println!("Found: {}", url);
            assert!(url.contains("bitcoin-up-or-down"));
        }
        Err(e) => println!("No market today: {}", e),
    }
}

/// Connect the CLOB market to today's event and read one quote.
#[tokio::test]
#[ignore = "requires network access"]
async fn test_clob_quote() {
    let config = Config::default();
    let http = ClobMarket::http_client(&config).unwrap();
    let discovery = GammaDiscovery::new(http.clone(), config.polymarket_gamma_url.clone());
    let today = chrono::Local::now().date_naive();
    let Ok(url) = discovery.find_daily_market(Coin::Btc, today).await else {
        println!("Skipping: no market today");
        return;
    };

    let market = ClobMarket::new(&config, http);
    market.connect(&url).await.unwrap();
    let q = market.get_quote().await.unwrap();
    println!("Quote: {:?}", q);
    assert!(q.ask_price > Decimal::ZERO && q.ask_price <= Decimal::ONE_HUNDRED);
}

/// Read one BTCUSDT ticker frame.
#[tokio::test]
#[ignore = "requires network access"]
async fn test_binance_ticker() {
    let config = Config::default();
    let ticker = BinanceTicker::new(config.reference_ws_url.clone(), Duration::from_secs(10));

    let price = ticker.last_price("BTCUSDT").await.unwrap();
    println!("BTCUSDT: {}", price);
    assert!(price > Decimal::ZERO);
}
