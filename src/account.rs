//! Account-level brokerage operations.
//!
//! Each call goes through [`RemoteApi::call`], so it is session-guarded and
//! rate-limited. Paginated histories are drained completely before they are
//! returned, with one permit per page.

use crate::error::TradingResult;
use crate::remote::RemoteApi;
use crate::session::Session;
use chrono::NaiveDate;
use std::future::Future;
use tastytrade_client::{
    Account, AccountBalance, MarketMetric, NetLiqSnapshot, NewOrder, Order, OrderQuery, Page,
    PlacedOrderResponse, Position, SymbolMatch, TastytradeClient, Transaction, TransactionQuery,
    Watchlist,
};
use tracing::{debug, warn};

/// Page size for transaction history.
pub const TRANSACTIONS_PAGE_SIZE: u32 = 250;

/// Page size for order history.
pub const ORDERS_PAGE_SIZE: u32 = 50;

/// Filters for transaction and order history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    /// First day to include.
    pub start_date: Option<NaiveDate>,
    /// Last day to include.
    pub end_date: Option<NaiveDate>,
    /// Restrict to one underlying.
    pub underlying_symbol: Option<String>,
}

impl RemoteApi {
    /// Lists accounts on the login.
    ///
    /// # Errors
    /// Returns error if the call fails.
    pub async fn accounts(&self) -> TradingResult<Vec<Account>> {
        self.call("list accounts", |client, session| async move {
            client.list_accounts(&session.access_token).await
        })
        .await
    }

    /// Gets balances of the session account.
    ///
    /// # Errors
    /// Returns error if the call fails.
    pub async fn balances(&self) -> TradingResult<AccountBalance> {
        self.call("get balances", |client, session| async move {
            client
                .get_balances(&session.access_token, &session.account_id)
                .await
        })
        .await
    }

    /// Gets open positions.
    ///
    /// # Errors
    /// Returns error if the call fails.
    pub async fn positions(&self) -> TradingResult<Vec<Position>> {
        self.call("get positions", |client, session| async move {
            client
                .get_positions(&session.access_token, &session.account_id)
                .await
        })
        .await
    }

    /// Gets net liquidating value history over `time_back` ("1d", "1m", "1y", "all").
    ///
    /// # Errors
    /// Returns error if the call fails.
    pub async fn net_liq_history(&self, time_back: &str) -> TradingResult<Vec<NetLiqSnapshot>> {
        self.call("get net liquidating value history", |client, session| async move {
            client
                .get_net_liq_history(&session.access_token, &session.account_id, time_back)
                .await
        })
        .await
    }

    /// Gets the full transaction history matching `filter`.
    ///
    /// # Errors
    /// Returns error if any page fails.
    pub async fn transaction_history(&self, filter: &HistoryFilter) -> TradingResult<Vec<Transaction>> {
        self.drain("get transactions", |client, session, page_offset| {
            let query = TransactionQuery {
                start_date: filter.start_date,
                end_date: filter.end_date,
                underlying_symbol: filter.underlying_symbol.clone(),
                per_page: TRANSACTIONS_PAGE_SIZE,
                page_offset,
            };
            async move {
                client
                    .get_transactions_page(&session.access_token, &session.account_id, &query)
                    .await
            }
        })
        .await
    }

    /// Gets the full order history matching `filter`.
    ///
    /// # Errors
    /// Returns error if any page fails.
    pub async fn order_history(&self, filter: &HistoryFilter) -> TradingResult<Vec<Order>> {
        self.drain("get orders", |client, session, page_offset| {
            let query = OrderQuery {
                start_date: filter.start_date,
                end_date: filter.end_date,
                underlying_symbol: filter.underlying_symbol.clone(),
                per_page: ORDERS_PAGE_SIZE,
                page_offset,
            };
            async move {
                client
                    .get_orders_page(&session.access_token, &session.account_id, &query)
                    .await
            }
        })
        .await
    }

    /// Gets orders that are still working.
    ///
    /// # Errors
    /// Returns error if the call fails.
    pub async fn live_orders(&self) -> TradingResult<Vec<Order>> {
        self.call("get live orders", |client, session| async move {
            client
                .get_live_orders(&session.access_token, &session.account_id)
                .await
        })
        .await
    }

    /// Places an order, or only validates it when `dry_run` is set.
    ///
    /// # Errors
    /// Returns error if the call fails or the order is rejected.
    pub async fn place_order(
        &self,
        order: &NewOrder,
        dry_run: bool,
    ) -> TradingResult<PlacedOrderResponse> {
        let operation = if dry_run { "dry-run order" } else { "place order" };
        self.call(operation, |client, session| async move {
            client
                .place_order(&session.access_token, &session.account_id, order, dry_run)
                .await
        })
        .await
    }

    /// Replaces a working order.
    ///
    /// # Errors
    /// Returns error if the call fails or the order is rejected.
    pub async fn replace_order(&self, order_id: u64, order: &NewOrder) -> TradingResult<Order> {
        self.call(&format!("replace order {order_id}"), |client, session| async move {
            client
                .replace_order(&session.access_token, &session.account_id, order_id, order)
                .await
        })
        .await
    }

    /// Cancels a working order.
    ///
    /// # Errors
    /// Returns error if the call fails.
    pub async fn cancel_order(&self, order_id: u64) -> TradingResult<Order> {
        self.call(&format!("cancel order {order_id}"), |client, session| async move {
            client
                .cancel_order(&session.access_token, &session.account_id, order_id)
                .await
        })
        .await
    }

    /// Lists watchlists.
    ///
    /// # Errors
    /// Returns error if the call fails.
    pub async fn watchlists(&self) -> TradingResult<Vec<Watchlist>> {
        self.call("list watchlists", |client, session| async move {
            client.list_watchlists(&session.access_token).await
        })
        .await
    }

    /// Gets one watchlist.
    ///
    /// # Errors
    /// Returns error if the call fails.
    pub async fn watchlist(&self, name: &str) -> TradingResult<Watchlist> {
        self.call(&format!("get watchlist {name}"), |client, session| async move {
            client.get_watchlist(&session.access_token, name).await
        })
        .await
    }

    /// Creates or replaces a watchlist.
    ///
    /// # Errors
    /// Returns error if the call fails.
    pub async fn upsert_watchlist(&self, watchlist: &Watchlist) -> TradingResult<Watchlist> {
        self.call(
            &format!("save watchlist {}", watchlist.name),
            |client, session| async move {
                client
                    .upsert_watchlist(&session.access_token, watchlist)
                    .await
            },
        )
        .await
    }

    /// Deletes a watchlist.
    ///
    /// # Errors
    /// Returns error if the call fails.
    pub async fn delete_watchlist(&self, name: &str) -> TradingResult<()> {
        self.call(&format!("delete watchlist {name}"), |client, session| async move {
            client.delete_watchlist(&session.access_token, name).await
        })
        .await
    }

    /// Searches symbols.
    ///
    /// # Errors
    /// Returns error if the call fails.
    pub async fn search_symbols(&self, query: &str) -> TradingResult<Vec<SymbolMatch>> {
        self.call(&format!("search {query}"), |client, session| async move {
            client.search_symbols(&session.access_token, query).await
        })
        .await
    }

    /// Gets volatility and liquidity metrics.
    ///
    /// # Errors
    /// Returns error if the call fails.
    pub async fn market_metrics(&self, symbols: &[String]) -> TradingResult<Vec<MarketMetric>> {
        self.call("get market metrics", |client, session| async move {
            client
                .get_market_metrics(&session.access_token, symbols)
                .await
        })
        .await
    }

    /// Returns whether the equities market is in regular session.
    ///
    /// Used for scheduling only: when the lookup fails the market is
    /// assumed open.
    pub async fn market_is_open(&self) -> bool {
        let lookup = self
            .call("get market session", |client, session| async move {
                client.get_market_session(&session.access_token).await
            })
            .await;

        match lookup {
            Ok(market) => {
                debug!(state = %market.state, "market session");
                market.is_open()
            }
            Err(e) => {
                warn!(error = %e, "market status unavailable, assuming open");
                true
            }
        }
    }

    async fn drain<'a, T, F, Fut>(&'a self, operation: &str, mut fetch: F) -> TradingResult<Vec<T>>
    where
        F: FnMut(&'a TastytradeClient, Session, u32) -> Fut,
        Fut: Future<Output = Result<Page<T>, tastytrade_client::Error>>,
    {
        let mut items = Vec::new();
        let mut page_offset = 0;

        loop {
            let page = self
                .call(&format!("{operation} page {page_offset}"), |client, session| {
                    fetch(client, session, page_offset)
                })
                .await?;

            let more = page.has_next() && !page.items.is_empty();
            items.extend(page.items);
            if !more {
                break;
            }
            page_offset += 1;
        }

        debug!(operation, pages = page_offset + 1, items = items.len(), "drained pages");
        Ok(items)
    }
}
