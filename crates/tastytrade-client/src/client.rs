//! HTTP client for the tastytrade REST API.

use crate::error::Error;
use crate::types::*;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;


/// Production API host.
pub const PRODUCTION_URL: &str = "https://api.tastyworks.com";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the API (e.g., "https://api.tastyworks.com").
    pub base_url: String,
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: PRODUCTION_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP client for the tastytrade API.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct TastytradeClient {
    client: Client,
    base_url: String,
}

impl TastytradeClient {
    /// Creates a new client with the given configuration.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("tasty-agent/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Creates a new client with default configuration.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn with_base_url(base_url: &str) -> Result<Self, Error> {
        Self::new(ClientConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        })
    }

    /// Returns the configured base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ========================================================================
    // OAuth
    // ========================================================================

    /// Exchanges the long-lived refresh token for a fresh access token.
    ///
    /// The refresh token itself is not rotated by this call.
    ///
    /// # Errors
    /// Returns error if the request fails or the grant is rejected.
    pub async fn exchange_refresh_token(
        &self,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<TokenResponse, Error> {
        let url = format!("{}/oauth/token", self.base_url);
        let form = TokenRequest {
            grant_type: "refresh_token",
            refresh_token,
            client_secret,
        };
        debug!(%url, "exchanging refresh token");
        let resp = self.client.post(&url).form(&form).send().await?;
        self.handle_response(resp).await
    }

    // ========================================================================
    // Accounts
    // ========================================================================

    /// Lists the accounts owned by the authenticated customer.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn list_accounts(&self, token: &str) -> Result<Vec<Account>, Error> {
        let url = format!("{}/customers/me/accounts", self.base_url);
        let entries: ItemList<AccountEntry> = self.get_data(token, &url).await?;
        Ok(entries.items.into_iter().map(|e| e.account).collect())
    }

    /// Gets balances for an account.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn get_balances(&self, token: &str, account: &str) -> Result<AccountBalance, Error> {
        let url = format!("{}/accounts/{}/balances", self.base_url, account);
        self.get_data(token, &url).await
    }

    /// Gets open positions for an account.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn get_positions(&self, token: &str, account: &str) -> Result<Vec<Position>, Error> {
        let url = format!("{}/accounts/{}/positions", self.base_url, account);
        let list: ItemList<Position> = self.get_data(token, &url).await?;
        Ok(list.items)
    }

    /// Gets net liquidating value history.
    ///
    /// # Arguments
    /// * `time_back` - Window such as "1d", "1m", "1y" or "all"
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn get_net_liq_history(
        &self,
        token: &str,
        account: &str,
        time_back: &str,
    ) -> Result<Vec<NetLiqSnapshot>, Error> {
        let url = with_query(
            format!("{}/accounts/{}/net-liq/history", self.base_url, account),
            &[("time-back", time_back)],
        )?;
        let list: ItemList<NetLiqSnapshot> = self.get_data(token, &url).await?;
        Ok(list.items)
    }

    // ========================================================================
    // History
    // ========================================================================

    /// Gets one page of transaction history.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn get_transactions_page(
        &self,
        token: &str,
        account: &str,
        query: &TransactionQuery,
    ) -> Result<Page<Transaction>, Error> {
        let url = with_query(
            format!("{}/accounts/{}/transactions", self.base_url, account),
            query,
        )?;
        let envelope: PagedEnvelope<Transaction> = self.get_json(token, &url).await?;
        Ok(envelope.into())
    }

    /// Gets one page of order history.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn get_orders_page(
        &self,
        token: &str,
        account: &str,
        query: &OrderQuery,
    ) -> Result<Page<Order>, Error> {
        let url = with_query(
            format!("{}/accounts/{}/orders", self.base_url, account),
            query,
        )?;
        let envelope: PagedEnvelope<Order> = self.get_json(token, &url).await?;
        Ok(envelope.into())
    }

    /// Gets orders that are still working.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn get_live_orders(&self, token: &str, account: &str) -> Result<Vec<Order>, Error> {
        let url = format!("{}/accounts/{}/orders/live", self.base_url, account);
        let list: ItemList<Order> = self.get_data(token, &url).await?;
        Ok(list.items)
    }

    // ========================================================================
    // Orders
    // ========================================================================

    /// Places an order, or validates it without routing when `dry_run` is set.
    ///
    /// # Errors
    /// Returns error if the request fails or the order is rejected.
    pub async fn place_order(
        &self,
        token: &str,
        account: &str,
        order: &NewOrder,
        dry_run: bool,
    ) -> Result<PlacedOrderResponse, Error> {
        let mut url = format!("{}/accounts/{}/orders", self.base_url, account);
        if dry_run {
            url.push_str("/dry-run");
        }
        let req = self.authorized(self.client.post(&url), token).json(order);
        self.send_data(req).await
    }

    /// Replaces a working order.
    ///
    /// # Errors
    /// Returns error if the request fails or the order is rejected.
    pub async fn replace_order(
        &self,
        token: &str,
        account: &str,
        order_id: u64,
        order: &NewOrder,
    ) -> Result<Order, Error> {
        let url = format!("{}/accounts/{}/orders/{}", self.base_url, account, order_id);
        let req = self.authorized(self.client.put(&url), token).json(order);
        self.send_data(req).await
    }

    /// Cancels a working order.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn cancel_order(
        &self,
        token: &str,
        account: &str,
        order_id: u64,
    ) -> Result<Order, Error> {
        let url = format!("{}/accounts/{}/orders/{}", self.base_url, account, order_id);
        let req = self.authorized(self.client.delete(&url), token);
        self.send_data(req).await
    }

    // ========================================================================
    // Watchlists
    // ========================================================================

    /// Lists the customer's watchlists.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn list_watchlists(&self, token: &str) -> Result<Vec<Watchlist>, Error> {
        let url = format!("{}/watchlists", self.base_url);
        let list: ItemList<Watchlist> = self.get_data(token, &url).await?;
        Ok(list.items)
    }

    /// Gets a watchlist by name.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn get_watchlist(&self, token: &str, name: &str) -> Result<Watchlist, Error> {
        let url = format!("{}/watchlists/{}", self.base_url, encode_segment(name));
        self.get_data(token, &url).await
    }

    /// Creates or replaces a watchlist.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn upsert_watchlist(
        &self,
        token: &str,
        watchlist: &Watchlist,
    ) -> Result<Watchlist, Error> {
        let url = format!(
            "{}/watchlists/{}",
            self.base_url,
            encode_segment(&watchlist.name)
        );
        let req = self.authorized(self.client.put(&url), token).json(watchlist);
        self.send_data(req).await
    }

    /// Deletes a watchlist.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn delete_watchlist(&self, token: &str, name: &str) -> Result<(), Error> {
        let url = format!("{}/watchlists/{}", self.base_url, encode_segment(name));
        let resp = self
            .authorized(self.client.delete(&url), token)
            .send()
            .await?;
        self.handle_empty_response(resp).await
    }

    // ========================================================================
    // Search & Metrics
    // ========================================================================

    /// Searches symbols by prefix or company name.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn search_symbols(&self, token: &str, query: &str) -> Result<Vec<SymbolMatch>, Error> {
        let url = format!(
            "{}/symbols/search/{}",
            self.base_url,
            encode_segment(query)
        );
        let list: ItemList<SymbolMatch> = self.get_data(token, &url).await?;
        Ok(list.items)
    }

    /// Gets volatility and liquidity metrics for symbols.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn get_market_metrics(
        &self,
        token: &str,
        symbols: &[String],
    ) -> Result<Vec<MarketMetric>, Error> {
        if symbols.is_empty() {
            return Err(Error::InvalidRequest("no symbols given".to_string()));
        }
        let url = with_query(
            format!("{}/market-metrics", self.base_url),
            &[("symbols", symbols.join(","))],
        )?;
        let list: ItemList<MarketMetric> = self.get_data(token, &url).await?;
        Ok(list.items)
    }

    // ========================================================================
    // Instruments
    // ========================================================================

    /// Gets an equity instrument.
    ///
    /// # Errors
    /// Returns error if the request fails or the symbol is unknown.
    pub async fn get_equity(&self, token: &str, symbol: &str) -> Result<Equity, Error> {
        let url = format!(
            "{}/instruments/equities/{}",
            self.base_url,
            encode_segment(symbol)
        );
        self.get_data(token, &url).await
    }

    /// Gets the nested option chain for an underlying.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn get_nested_option_chain(
        &self,
        token: &str,
        underlying: &str,
    ) -> Result<Vec<NestedOptionChain>, Error> {
        let url = format!(
            "{}/option-chains/{}/nested",
            self.base_url,
            encode_segment(underlying)
        );
        let list: ItemList<NestedOptionChain> = self.get_data(token, &url).await?;
        Ok(list.items)
    }

    // ========================================================================
    // Streaming credentials & market time
    // ========================================================================

    /// Gets the credential and endpoint for the DXLink market-data stream.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn get_quote_token(&self, token: &str) -> Result<ApiQuoteToken, Error> {
        let url = format!("{}/api-quote-tokens", self.base_url);
        self.get_data(token, &url).await
    }

    /// Gets the current equities market session.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn get_market_session(&self, token: &str) -> Result<MarketSession, Error> {
        let url = format!("{}/market-time/equities/sessions/current", self.base_url);
        self.get_data(token, &url).await
    }

    // ========================================================================
    // Internal Helpers
    // ========================================================================

    fn authorized(&self, req: RequestBuilder, token: &str) -> RequestBuilder {
        req.bearer_auth(token)
    }

    async fn get_json<T: DeserializeOwned>(&self, token: &str, url: &str) -> Result<T, Error> {
        let resp = self.authorized(self.client.get(url), token).send().await?;
        self.handle_response(resp).await
    }

    async fn get_data<T: DeserializeOwned>(&self, token: &str, url: &str) -> Result<T, Error> {
        let envelope: DataEnvelope<T> = self.get_json(token, url).await?;
        Ok(envelope.data)
    }

    async fn send_data<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, Error> {
        let resp = req.send().await?;
        let envelope: DataEnvelope<T> = self.handle_response(resp).await?;
        Ok(envelope.data)
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, Error> {
        let status = resp.status();

        if status.is_success() {
            let bytes = resp.bytes().await?;
            Ok(serde_json::from_slice(&bytes)?)
        } else {
            Err(Self::status_error(status.as_u16(), resp).await)
        }
    }

    async fn handle_empty_response(&self, resp: reqwest::Response) -> Result<(), Error> {
        let status = resp.status();

        if status.is_success() {
            Ok(())
        } else {
            Err(Self::status_error(status.as_u16(), resp).await)
        }
    }

    async fn status_error(status: u16, resp: reqwest::Response) -> Error {
        let retry_after_secs = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        let text = resp.text().await.unwrap_or_default();
        match status {
            401 => Error::Unauthorized(text),
            404 => Error::NotFound(text),
            429 => Error::RateLimited { retry_after_secs },
            _ => Error::Api {
                status,
                message: text,
            },
        }
    }
}

/// Appends a urlencoded query string when the query serializes to one.
///
/// A query that cannot be encoded is an error; it is never dropped.
fn with_query<Q: serde::Serialize + ?Sized>(mut url: String, query: &Q) -> Result<String, Error> {
    let params = serde_urlencoded::to_string(query)
        .map_err(|e| Error::InvalidRequest(format!("cannot encode query: {e}")))?;
    if !params.is_empty() {
        url.push('?');
        url.push_str(&params);
    }
    Ok(url)
}

/// Percent-encodes a single path segment.
fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
