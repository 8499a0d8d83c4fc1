//! Account operations against the mock brokerage.

use rust_decimal_macros::dec;
use std::sync::atomic::Ordering;
use tasty_agent::TradingError;
use tasty_agent::account::HistoryFilter;
use tasty_agent_tests::{ACCOUNT_NUMBER, MockBrokerage};
use tastytrade_client::{
    Action, InstrumentType, NewOrder, NewOrderLeg, OrderType, PriceEffect, TimeInForce, Watchlist,
    WatchlistEntry,
};

fn single_call_order() -> NewOrder {
    NewOrder {
        time_in_force: TimeInForce::Day,
        order_type: OrderType::Limit,
        price: Some(dec!(2.00)),
        price_effect: Some(PriceEffect::Debit),
        legs: vec![NewOrderLeg {
            instrument_type: InstrumentType::EquityOption,
            symbol: "SPY   250117C00500000".to_string(),
            quantity: 1,
            action: Action::BuyToOpen,
        }],
    }
}

#[tokio::test]
async fn test_accounts_balances_positions() {
    let mock = MockBrokerage::start().await.unwrap();
    let ctx = mock.context().unwrap();

    let accounts = ctx.api.accounts().await.unwrap();
    assert_eq!(accounts.len(), 2);
    assert!(accounts.iter().any(|a| a.account_number == ACCOUNT_NUMBER && !a.is_closed));

    let balances = ctx.api.balances().await.unwrap();
    assert_eq!(balances.account_number, ACCOUNT_NUMBER);
    assert_eq!(balances.net_liquidating_value, dec!(25000.50));

    let positions = ctx.api.positions().await.unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].instrument_type, InstrumentType::EquityOption);
    assert_eq!(positions[0].quantity, dec!(2));
}

#[tokio::test]
async fn test_net_liq_history_window() {
    let mock = MockBrokerage::start().await.unwrap();
    let ctx = mock.context().unwrap();

    assert_eq!(ctx.api.net_liq_history("1d").await.unwrap().len(), 2);
    assert_eq!(ctx.api.net_liq_history("1y").await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_transaction_history_drains_pages() {
    let mock = MockBrokerage::start().await.unwrap();
    mock.state().transaction_count.store(600, Ordering::SeqCst);
    let ctx = mock.context().unwrap();

    let filter = HistoryFilter {
        underlying_symbol: Some("SPY".to_string()),
        ..HistoryFilter::default()
    };
    let transactions = ctx.api.transaction_history(&filter).await.unwrap();

    assert_eq!(transactions.len(), 600);
    assert_eq!(transactions.first().map(|t| t.id), Some(1));
    assert_eq!(transactions.last().map(|t| t.id), Some(600));

    let queries = mock.state().transaction_queries.lock().clone();
    assert_eq!(queries.len(), 3);
    for (offset, query) in queries.iter().enumerate() {
        assert_eq!(query.get("per-page").map(String::as_str), Some("250"));
        assert_eq!(query.get("page-offset"), Some(&offset.to_string()));
        assert_eq!(query.get("underlying-symbol").map(String::as_str), Some("SPY"));
    }
}

#[tokio::test]
async fn test_order_history_drains_pages() {
    let mock = MockBrokerage::start().await.unwrap();
    mock.state().order_count.store(120, Ordering::SeqCst);
    let ctx = mock.context().unwrap();

    let orders = ctx
        .api
        .order_history(&HistoryFilter::default())
        .await
        .unwrap();

    assert_eq!(orders.len(), 120);
    assert_eq!(mock.state().order_pages.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_single_page_history() {
    let mock = MockBrokerage::start().await.unwrap();
    let ctx = mock.context().unwrap();

    let transactions = ctx
        .api
        .transaction_history(&HistoryFilter::default())
        .await
        .unwrap();

    assert_eq!(transactions.len(), 3);
    assert_eq!(mock.state().transaction_pages.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_order_lifecycle() {
    let mock = MockBrokerage::start().await.unwrap();
    let ctx = mock.context().unwrap();
    let order = single_call_order();

    let dry = ctx.api.place_order(&order, true).await.unwrap();
    assert_eq!(dry.order.price, Some(dec!(2.00)));
    assert!(ctx.api.live_orders().await.unwrap().is_empty());
    assert_eq!(mock.state().dry_run_orders.lock().len(), 1);

    let placed = ctx.api.place_order(&order, false).await.unwrap();
    assert_eq!(placed.order.status, "Routed");
    assert_eq!(placed.order.legs[0].action, Action::BuyToOpen);

    let live = ctx.api.live_orders().await.unwrap();
    assert_eq!(live.len(), 1);

    let mut repriced = order.clone();
    repriced.price = Some(dec!(1.90));
    let replaced = ctx
        .api
        .replace_order(placed.order.id, &repriced)
        .await
        .unwrap();
    assert_eq!(replaced.price, Some(dec!(1.90)));

    let cancelled = ctx.api.cancel_order(placed.order.id).await.unwrap();
    assert_eq!(cancelled.id, placed.order.id);
}

#[tokio::test]
async fn test_watchlist_round_trip() {
    let mock = MockBrokerage::start().await.unwrap();
    let ctx = mock.context().unwrap();

    assert_eq!(ctx.api.watchlists().await.unwrap().len(), 1);

    let list = Watchlist {
        name: "Index ETFs".to_string(),
        watchlist_entries: Some(vec![WatchlistEntry {
            symbol: "SPY".to_string(),
            instrument_type: Some(InstrumentType::Equity),
        }]),
        order_index: None,
    };
    ctx.api.upsert_watchlist(&list).await.unwrap();

    let fetched = ctx.api.watchlist("Index ETFs").await.unwrap();
    assert_eq!(fetched.watchlist_entries.map(|e| e.len()), Some(1));

    ctx.api.delete_watchlist("Index ETFs").await.unwrap();
    let err = ctx.api.watchlist("Index ETFs").await.unwrap_err();
    assert!(
        matches!(
            err,
            TradingError::Network {
                source: tastytrade_client::Error::NotFound(_),
                ..
            }
        ),
        "{err}"
    );
}

#[tokio::test]
async fn test_search_and_metrics() {
    let mock = MockBrokerage::start().await.unwrap();
    let ctx = mock.context().unwrap();

    let matches = ctx.api.search_symbols("a").await.unwrap();
    let symbols: Vec<&str> = matches.iter().map(|m| m.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["AAPL", "AMD"]);

    let metrics = ctx
        .api
        .market_metrics(&["SPY".to_string(), "AAPL".to_string()])
        .await
        .unwrap();
    assert_eq!(metrics.len(), 2);
    assert_eq!(metrics[0].implied_volatility_index_rank, Some(dec!(0.25)));
}

#[tokio::test]
async fn test_market_status() {
    let mock = MockBrokerage::start().await.unwrap();
    let ctx = mock.context().unwrap();

    assert!(ctx.api.market_is_open().await);

    mock.state().market_open.store(false, Ordering::SeqCst);
    assert!(!ctx.api.market_is_open().await);

    // A failed lookup is treated as open.
    mock.state().market_session_fails.store(true, Ordering::SeqCst);
    assert!(ctx.api.market_is_open().await);
}
