//! Integration test support for tasty-agent.
//!
//! [`MockBrokerage`] serves the subset of the brokerage REST API and the
//! DXLink streaming protocol that the core uses, on an ephemeral local port.
//! Every test starts its own instance, so tests never share state.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Form, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tasty_agent::{Config, Credentials, Settings, TradingContext, TradingResult};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::debug;

/// Client secret the mock accepts.
pub const CLIENT_SECRET: &str = "mock-client-secret";
/// Refresh token the mock accepts.
pub const REFRESH_TOKEN: &str = "mock-refresh-token";
/// Streaming credential the mock issues and accepts.
pub const QUOTE_TOKEN: &str = "mock-quote-token";
/// Streaming credential the mock issues but refuses.
pub const REVOKED_QUOTE_TOKEN: &str = "revoked-quote-token";
/// Open account on the mock login.
pub const ACCOUNT_NUMBER: &str = "5WT00001";

/// Observable and adjustable state of a running mock.
pub struct MockState {
    addr: SocketAddr,
    /// Successful refresh-token exchanges.
    pub token_exchanges: AtomicUsize,
    /// Authorized REST requests, token exchanges excluded.
    pub api_requests: AtomicUsize,
    /// Option chain fetches.
    pub chain_fetches: AtomicUsize,
    /// Quote token fetches.
    pub quote_token_fetches: AtomicUsize,
    /// Transaction pages served.
    pub transaction_pages: AtomicUsize,
    /// Order history pages served.
    pub order_pages: AtomicUsize,
    /// DXLink connections accepted.
    pub dxlink_connections: AtomicUsize,
    /// DXLink channel cancellations received.
    pub channel_cancels: AtomicUsize,
    /// Reject every token exchange.
    pub reject_auth: AtomicBool,
    /// Fail the market session lookup.
    pub market_session_fails: AtomicBool,
    /// Whether the market session reports open.
    pub market_open: AtomicBool,
    /// Close the DXLink socket instead of answering a subscription.
    pub hang_up_on_subscribe: AtomicBool,
    /// Upcoming quote token fetches that hand out a revoked token.
    pub revoked_quote_tokens: AtomicUsize,
    /// Refuse bad DXLink tokens with `AUTH_STATE UNAUTHORIZED` instead of `ERROR`.
    pub refuse_with_auth_state: AtomicBool,
    /// Withdraw DXLink authorization instead of answering a subscription.
    pub revoke_on_subscribe: AtomicBool,
    /// Total transactions in history.
    pub transaction_count: AtomicUsize,
    /// Total orders in history.
    pub order_count: AtomicUsize,
    /// Bid and ask per streamer symbol, as sent on the wire.
    pub quotes: Mutex<HashMap<String, (String, String)>>,
    /// Delta per streamer symbol.
    pub greeks: Mutex<HashMap<String, f64>>,
    /// Query strings of transaction requests.
    pub transaction_queries: Mutex<Vec<HashMap<String, String>>>,
    /// Bodies of routed (not dry-run) orders.
    pub placed_orders: Mutex<Vec<Value>>,
    /// Bodies of dry-run orders.
    pub dry_run_orders: Mutex<Vec<Value>>,
    /// Watchlists by name.
    pub watchlists: Mutex<BTreeMap<String, Value>>,
}

impl MockState {
    fn new(addr: SocketAddr) -> Self {
        let quotes = [
            ("SPY", "589.90", "590.10"),
            (".SPY250117C500", "1.95", "2.05"),
            (".SPY250117C510", "0.45", "0.55"),
            (".SPY250117P500", "0.80", "0.90"),
            ("AAPL", "229.95", "230.05"),
        ]
        .into_iter()
        .map(|(s, b, a)| (s.to_string(), (b.to_string(), a.to_string())))
        .collect();

        let greeks = [(".SPY250117C500", 0.62), (".SPY250117C510", 0.41)]
            .into_iter()
            .map(|(s, d)| (s.to_string(), d))
            .collect();

        let watchlists = BTreeMap::from([(
            "Tech".to_string(),
            json!({
                "name": "Tech",
                "watchlist-entries": [
                    {"symbol": "AAPL", "instrument-type": "Equity"},
                    {"symbol": "MSFT", "instrument-type": "Equity"}
                ]
            }),
        )]);

        Self {
            addr,
            token_exchanges: AtomicUsize::new(0),
            api_requests: AtomicUsize::new(0),
            chain_fetches: AtomicUsize::new(0),
            quote_token_fetches: AtomicUsize::new(0),
            transaction_pages: AtomicUsize::new(0),
            order_pages: AtomicUsize::new(0),
            dxlink_connections: AtomicUsize::new(0),
            channel_cancels: AtomicUsize::new(0),
            reject_auth: AtomicBool::new(false),
            market_session_fails: AtomicBool::new(false),
            market_open: AtomicBool::new(true),
            hang_up_on_subscribe: AtomicBool::new(false),
            revoked_quote_tokens: AtomicUsize::new(0),
            refuse_with_auth_state: AtomicBool::new(false),
            revoke_on_subscribe: AtomicBool::new(false),
            transaction_count: AtomicUsize::new(3),
            order_count: AtomicUsize::new(2),
            quotes: Mutex::new(quotes),
            greeks: Mutex::new(greeks),
            transaction_queries: Mutex::new(Vec::new()),
            placed_orders: Mutex::new(Vec::new()),
            dry_run_orders: Mutex::new(Vec::new()),
            watchlists: Mutex::new(watchlists),
        }
    }

    /// Sets the wire bid and ask of a symbol.
    pub fn set_quote(&self, symbol: &str, bid: &str, ask: &str) {
        self.quotes
            .lock()
            .insert(symbol.to_string(), (bid.to_string(), ask.to_string()));
    }

    /// Stops quoting a symbol.
    pub fn remove_quote(&self, symbol: &str) {
        self.quotes.lock().remove(symbol);
    }
}

/// Running mock brokerage.
pub struct MockBrokerage {
    state: Arc<MockState>,
    server: JoinHandle<()>,
}

impl MockBrokerage {
    /// Binds an ephemeral port and starts serving.
    ///
    /// # Errors
    /// Returns error if the listener cannot be bound.
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(MockState::new(addr));
        let app = router(Arc::clone(&state));

        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        debug!(%addr, "mock brokerage listening");

        Ok(Self { state, server })
    }

    /// REST base URL.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.state.addr)
    }

    /// Shared state.
    #[must_use]
    pub fn state(&self) -> &MockState {
        &self.state
    }

    /// Settings pointing at this mock, with short timeouts.
    #[must_use]
    pub fn settings(&self) -> Settings {
        let mut settings = Settings::default();
        settings.api.base_url = self.base_url();
        settings.api.timeout_secs = 5;
        settings.rate_limit.capacity = 20;
        settings.rate_limit.window_ms = 1000;
        settings.streaming.timeout_ms = 1500;
        settings
    }

    /// Configuration carrying the accepted credentials.
    #[must_use]
    pub fn config(&self) -> Config {
        self.config_with(self.settings())
    }

    /// Configuration with custom settings.
    #[must_use]
    pub fn config_with(&self, settings: Settings) -> Config {
        Config::new(
            Credentials {
                client_secret: CLIENT_SECRET.to_string(),
                refresh_token: REFRESH_TOKEN.to_string(),
            },
            settings,
        )
    }

    /// Live trading context against this mock.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn context(&self) -> TradingResult<TradingContext> {
        TradingContext::from_config(&self.config())
    }
}

impl Drop for MockBrokerage {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Polls `check` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

// ============================================================================
// Routes
// ============================================================================

type Shared = State<Arc<MockState>>;

fn router(state: Arc<MockState>) -> Router {
    Router::new()
        .route("/oauth/token", post(oauth_token))
        .route("/customers/me/accounts", get(accounts))
        .route("/accounts/{account}/balances", get(balances))
        .route("/accounts/{account}/positions", get(positions))
        .route("/accounts/{account}/net-liq/history", get(net_liq_history))
        .route("/accounts/{account}/transactions", get(transactions))
        .route(
            "/accounts/{account}/orders",
            get(order_history).post(place_order),
        )
        .route("/accounts/{account}/orders/dry-run", post(dry_run_order))
        .route("/accounts/{account}/orders/live", get(live_orders))
        .route(
            "/accounts/{account}/orders/{id}",
            put(replace_order).delete(cancel_order),
        )
        .route("/watchlists", get(list_watchlists))
        .route(
            "/watchlists/{name}",
            get(get_watchlist).put(upsert_watchlist).delete(delete_watchlist),
        )
        .route("/symbols/search/{query}", get(search_symbols))
        .route("/market-metrics", get(market_metrics))
        .route("/instruments/equities/{symbol}", get(equity))
        .route("/option-chains/{symbol}/nested", get(nested_chain))
        .route("/api-quote-tokens", get(quote_token))
        .route("/market-time/equities/sessions/current", get(market_session))
        .route("/dxlink", get(dxlink))
        .with_state(state)
}

fn data(value: Value) -> Response {
    Json(json!({ "data": value })).into_response()
}

fn items(items: Vec<Value>) -> Response {
    data(json!({ "items": items }))
}

fn not_found(what: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": {"code": "not_found", "message": what}})),
    )
        .into_response()
}

/// Admits requests bearing an access token this mock issued.
fn admit(state: &MockState, headers: &HeaderMap) -> Result<(), Response> {
    let issued = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("Bearer access-"));
    if !issued {
        return Err((StatusCode::UNAUTHORIZED, "token invalid or expired").into_response());
    }
    state.api_requests.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

fn account_guard(account: &str) -> Result<(), Response> {
    if account == ACCOUNT_NUMBER {
        Ok(())
    } else {
        Err(not_found("account"))
    }
}

async fn oauth_token(
    State(state): Shared,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let field = |name: &str| form.get(name).map(String::as_str);
    let valid = field("grant_type") == Some("refresh_token")
        && field("refresh_token") == Some(REFRESH_TOKEN)
        && field("client_secret") == Some(CLIENT_SECRET);

    if state.reject_auth.load(Ordering::SeqCst) || !valid {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid_grant"})),
        )
            .into_response();
    }

    let n = state.token_exchanges.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({
        "access_token": format!("access-{n}"),
        "token_type": "Bearer",
        "expires_in": 900
    }))
    .into_response()
}

async fn accounts(State(state): Shared, headers: HeaderMap) -> Response {
    if let Err(r) = admit(&state, &headers) {
        return r;
    }
    items(vec![
        json!({
            "account": {"account-number": "5WT00099", "nickname": "Old", "is-closed": true},
            "authority-level": "owner"
        }),
        json!({
            "account": {
                "account-number": ACCOUNT_NUMBER,
                "nickname": "Individual",
                "account-type-name": "Individual",
                "is-closed": false
            },
            "authority-level": "owner"
        }),
    ])
}

async fn balances(
    State(state): Shared,
    headers: HeaderMap,
    Path(account): Path<String>,
) -> Response {
    if let Err(r) = admit(&state, &headers).and_then(|()| account_guard(&account)) {
        return r;
    }
    data(json!({
        "account-number": account,
        "cash-balance": "10000.00",
        "net-liquidating-value": "25000.50",
        "derivative-buying-power": "8000.00",
        "equity-buying-power": "16000.00",
        "maintenance-requirement": "2000.00",
        "pending-cash": "0.00"
    }))
}

async fn positions(
    State(state): Shared,
    headers: HeaderMap,
    Path(account): Path<String>,
) -> Response {
    if let Err(r) = admit(&state, &headers).and_then(|()| account_guard(&account)) {
        return r;
    }
    items(vec![json!({
        "account-number": account,
        "symbol": "SPY   250117C00500000",
        "instrument-type": "Equity Option",
        "underlying-symbol": "SPY",
        "quantity": "2",
        "quantity-direction": "Long",
        "average-open-price": "1.80",
        "close-price": "2.00",
        "multiplier": "100",
        "expires-at": "2025-01-17T21:15:00.000+00:00"
    })])
}

async fn net_liq_history(
    State(state): Shared,
    headers: HeaderMap,
    Path(account): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Err(r) = admit(&state, &headers).and_then(|()| account_guard(&account)) {
        return r;
    }
    let points = match query.get("time-back").map(String::as_str) {
        Some("1d") => 2,
        _ => 5,
    };
    items(
        (0..points)
            .map(|i| {
                json!({
                    "time": format!("2025-01-0{}T16:00:00Z", i + 1),
                    "open": "25000.00",
                    "high": "25100.00",
                    "low": "24900.00",
                    "close": format!("250{i}0.00")
                })
            })
            .collect(),
    )
}

fn page_params(query: &HashMap<String, String>, default_size: usize) -> (usize, usize) {
    let per_page = query
        .get("per-page")
        .and_then(|v| v.parse().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default_size);
    let offset = query
        .get("page-offset")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    (per_page, offset)
}

fn paged(total: usize, per_page: usize, offset: usize, item: impl Fn(usize) -> Value) -> Response {
    let start = (offset * per_page).min(total);
    let end = (start + per_page).min(total);
    let total_pages = total.div_ceil(per_page);
    let page: Vec<Value> = (start..end).map(item).collect();

    Json(json!({
        "data": {"items": page},
        "pagination": {
            "per-page": per_page,
            "page-offset": offset,
            "item-offset": start,
            "total-items": total,
            "total-pages": total_pages,
            "current-item-count": end - start
        }
    }))
    .into_response()
}

async fn transactions(
    State(state): Shared,
    headers: HeaderMap,
    Path(account): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Err(r) = admit(&state, &headers).and_then(|()| account_guard(&account)) {
        return r;
    }
    state.transaction_pages.fetch_add(1, Ordering::SeqCst);
    let (per_page, offset) = page_params(&query, 250);
    state.transaction_queries.lock().push(query);

    let total = state.transaction_count.load(Ordering::SeqCst);
    paged(total, per_page, offset, |i| {
        json!({
            "id": i + 1,
            "transaction-type": "Trade",
            "transaction-sub-type": "Buy to Open",
            "description": format!("Bought 1 SPY option #{i}"),
            "symbol": "SPY   250117C00500000",
            "value": "-150.00",
            "net-value": "-151.00",
            "executed-at": "2025-01-02T15:30:00.000+00:00"
        })
    })
}

fn order_json(id: u64, status: &str, body: Option<&Value>) -> Value {
    let field = |name: &str, default: Value| {
        body.and_then(|b| b.get(name))
            .cloned()
            .unwrap_or(default)
    };
    json!({
        "id": id,
        "account-number": ACCOUNT_NUMBER,
        "status": status,
        "order-type": field("order-type", json!("Limit")),
        "time-in-force": field("time-in-force", json!("Day")),
        "price": field("price", json!("1.50")),
        "price-effect": field("price-effect", json!("Debit")),
        "underlying-symbol": "SPY",
        "legs": field("legs", json!([{
            "instrument-type": "Equity Option",
            "symbol": "SPY   250117C00500000",
            "quantity": 1,
            "remaining-quantity": 1,
            "action": "Buy to Open"
        }])),
        "received-at": "2025-01-02T15:30:00.000+00:00"
    })
}

async fn order_history(
    State(state): Shared,
    headers: HeaderMap,
    Path(account): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Err(r) = admit(&state, &headers).and_then(|()| account_guard(&account)) {
        return r;
    }
    state.order_pages.fetch_add(1, Ordering::SeqCst);
    let (per_page, offset) = page_params(&query, 50);
    let total = state.order_count.load(Ordering::SeqCst);
    paged(total, per_page, offset, |i| order_json(1000 + i as u64, "Filled", None))
}

fn placed_response(id: u64, status: &str, body: &Value) -> Response {
    data(json!({
        "order": order_json(id, status, Some(body)),
        "buying-power-effect": {
            "change-in-buying-power": "150.00",
            "change-in-buying-power-effect": "Debit"
        },
        "warnings": []
    }))
}

async fn place_order(
    State(state): Shared,
    headers: HeaderMap,
    Path(account): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if let Err(r) = admit(&state, &headers).and_then(|()| account_guard(&account)) {
        return r;
    }
    let mut placed = state.placed_orders.lock();
    placed.push(body.clone());
    let id = 5000 + placed.len() as u64;
    placed_response(id, "Routed", &body)
}

async fn dry_run_order(
    State(state): Shared,
    headers: HeaderMap,
    Path(account): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if let Err(r) = admit(&state, &headers).and_then(|()| account_guard(&account)) {
        return r;
    }
    state.dry_run_orders.lock().push(body.clone());
    placed_response(0, "Received", &body)
}

async fn live_orders(
    State(state): Shared,
    headers: HeaderMap,
    Path(account): Path<String>,
) -> Response {
    if let Err(r) = admit(&state, &headers).and_then(|()| account_guard(&account)) {
        return r;
    }
    let placed = state.placed_orders.lock();
    items(
        placed
            .iter()
            .enumerate()
            .map(|(i, body)| order_json(5001 + i as u64, "Live", Some(body)))
            .collect(),
    )
}

async fn replace_order(
    State(state): Shared,
    headers: HeaderMap,
    Path((account, id)): Path<(String, u64)>,
    Json(body): Json<Value>,
) -> Response {
    if let Err(r) = admit(&state, &headers).and_then(|()| account_guard(&account)) {
        return r;
    }
    data(order_json(id, "Live", Some(&body)))
}

async fn cancel_order(
    State(state): Shared,
    headers: HeaderMap,
    Path((account, id)): Path<(String, u64)>,
) -> Response {
    if let Err(r) = admit(&state, &headers).and_then(|()| account_guard(&account)) {
        return r;
    }
    data(order_json(id, "Cancel Requested", None))
}

async fn list_watchlists(State(state): Shared, headers: HeaderMap) -> Response {
    if let Err(r) = admit(&state, &headers) {
        return r;
    }
    items(state.watchlists.lock().values().cloned().collect())
}

async fn get_watchlist(
    State(state): Shared,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Response {
    if let Err(r) = admit(&state, &headers) {
        return r;
    }
    match state.watchlists.lock().get(&name) {
        Some(list) => data(list.clone()),
        None => not_found("watchlist"),
    }
}

async fn upsert_watchlist(
    State(state): Shared,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if let Err(r) = admit(&state, &headers) {
        return r;
    }
    state.watchlists.lock().insert(name, body.clone());
    data(body)
}

async fn delete_watchlist(
    State(state): Shared,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Response {
    if let Err(r) = admit(&state, &headers) {
        return r;
    }
    match state.watchlists.lock().remove(&name) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => not_found("watchlist"),
    }
}

async fn search_symbols(
    State(state): Shared,
    headers: HeaderMap,
    Path(query): Path<String>,
) -> Response {
    if let Err(r) = admit(&state, &headers) {
        return r;
    }
    let listed = [
        ("AAPL", "Apple Inc."),
        ("AMD", "Advanced Micro Devices"),
        ("SPY", "SPDR S&P 500 ETF Trust"),
    ];
    let prefix = query.to_uppercase();
    items(
        listed
            .iter()
            .filter(|(symbol, _)| symbol.starts_with(&prefix))
            .map(|(symbol, description)| json!({"symbol": symbol, "description": description}))
            .collect(),
    )
}

async fn market_metrics(
    State(state): Shared,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Err(r) = admit(&state, &headers) {
        return r;
    }
    let symbols = query.get("symbols").cloned().unwrap_or_default();
    items(
        symbols
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|symbol| {
                json!({
                    "symbol": symbol,
                    "implied-volatility-index": "0.182",
                    "implied-volatility-index-rank": "0.25",
                    "implied-volatility-percentile": "0.31",
                    "liquidity-rating": 4,
                    "beta": "1.0"
                })
            })
            .collect(),
    )
}

async fn equity(
    State(state): Shared,
    headers: HeaderMap,
    Path(symbol): Path<String>,
) -> Response {
    if let Err(r) = admit(&state, &headers) {
        return r;
    }
    match symbol.as_str() {
        "SPY" | "AAPL" => data(json!({
            "symbol": symbol,
            "streamer-symbol": symbol,
            "description": format!("{symbol} listed equity"),
            "is-etf": symbol == "SPY"
        })),
        _ => not_found("equity"),
    }
}

fn strike(expiry: &str, price: u32) -> Value {
    json!({
        "strike-price": format!("{price}.0"),
        "call": format!("SPY   {expiry}C00{price}000"),
        "call-streamer-symbol": format!(".SPY{expiry}C{price}"),
        "put": format!("SPY   {expiry}P00{price}000"),
        "put-streamer-symbol": format!(".SPY{expiry}P{price}")
    })
}

async fn nested_chain(
    State(state): Shared,
    headers: HeaderMap,
    Path(symbol): Path<String>,
) -> Response {
    if let Err(r) = admit(&state, &headers) {
        return r;
    }
    state.chain_fetches.fetch_add(1, Ordering::SeqCst);
    if symbol != "SPY" {
        return not_found("option chain");
    }
    items(vec![json!({
        "underlying-symbol": "SPY",
        "root-symbol": "SPY",
        "shares-per-contract": 100,
        "expirations": [
            {
                "expiration-date": "2025-01-17",
                "days-to-expiration": 15,
                "expiration-type": "Regular",
                "strikes": [strike("250117", 500), strike("250117", 510)]
            },
            {
                "expiration-date": "2025-02-21",
                "days-to-expiration": 50,
                "expiration-type": "Regular",
                "strikes": [strike("250221", 500)]
            }
        ]
    })])
}

async fn quote_token(State(state): Shared, headers: HeaderMap) -> Response {
    if let Err(r) = admit(&state, &headers) {
        return r;
    }
    state.quote_token_fetches.fetch_add(1, Ordering::SeqCst);
    let revoked = state
        .revoked_quote_tokens
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    data(json!({
        "token": if revoked { REVOKED_QUOTE_TOKEN } else { QUOTE_TOKEN },
        "dxlink-url": format!("ws://{}/dxlink", state.addr),
        "level": "api"
    }))
}

async fn market_session(State(state): Shared, headers: HeaderMap) -> Response {
    if let Err(r) = admit(&state, &headers) {
        return r;
    }
    if state.market_session_fails.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, "market time unavailable").into_response();
    }
    let open = state.market_open.load(Ordering::SeqCst);
    data(json!({
        "state": if open { "Open" } else { "Closed" },
        "open-at": "2025-01-02T14:30:00Z",
        "close-at": "2025-01-02T21:00:00Z"
    }))
}

// ============================================================================
// DXLink
// ============================================================================

async fn dxlink(ws: WebSocketUpgrade, State(state): Shared) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_dxlink(socket, state))
}

async fn handle_dxlink(mut socket: WebSocket, state: Arc<MockState>) {
    state.dxlink_connections.fetch_add(1, Ordering::SeqCst);

    while let Some(Ok(msg)) = socket.recv().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };

        if request["type"] == "FEED_SUBSCRIPTION"
            && state.hang_up_on_subscribe.load(Ordering::SeqCst)
        {
            let _ = socket.send(Message::Close(None)).await;
            break;
        }

        for reply in dxlink_replies(&state, &request) {
            if socket
                .send(Message::Text(reply.to_string().into()))
                .await
                .is_err()
            {
                return;
            }
        }
    }
}

fn dxlink_replies(state: &MockState, request: &Value) -> Vec<Value> {
    let channel = request["channel"].as_u64().unwrap_or(0);
    match request["type"].as_str().unwrap_or_default() {
        "SETUP" => vec![
            json!({
                "type": "SETUP",
                "channel": 0,
                "version": "0.1-mock",
                "keepaliveTimeout": 60,
                "acceptKeepaliveTimeout": 60
            }),
            json!({"type": "AUTH_STATE", "channel": 0, "state": "UNAUTHORIZED"}),
        ],
        "AUTH" => {
            if request["token"] == QUOTE_TOKEN {
                vec![json!({
                    "type": "AUTH_STATE",
                    "channel": 0,
                    "state": "AUTHORIZED",
                    "userId": "mock"
                })]
            } else if state.refuse_with_auth_state.load(Ordering::SeqCst) {
                vec![json!({"type": "AUTH_STATE", "channel": 0, "state": "UNAUTHORIZED"})]
            } else {
                vec![json!({
                    "type": "ERROR",
                    "channel": 0,
                    "error": "UNAUTHORIZED",
                    "message": "invalid token"
                })]
            }
        }
        "CHANNEL_REQUEST" => vec![json!({
            "type": "CHANNEL_OPENED",
            "channel": channel,
            "service": "FEED",
            "parameters": request["parameters"].clone()
        })],
        "FEED_SETUP" => vec![json!({
            "type": "FEED_CONFIG",
            "channel": channel,
            "dataFormat": "COMPACT",
            "aggregationPeriod": 0.1,
            "eventFields": request["acceptEventFields"].clone()
        })],
        "FEED_SUBSCRIPTION" if state.revoke_on_subscribe.load(Ordering::SeqCst) => {
            vec![json!({"type": "AUTH_STATE", "channel": 0, "state": "UNAUTHORIZED"})]
        }
        "FEED_SUBSCRIPTION" => feed_data(state, channel, request).into_iter().collect(),
        "CHANNEL_CANCEL" => {
            state.channel_cancels.fetch_add(1, Ordering::SeqCst);
            vec![json!({"type": "CHANNEL_CLOSED", "channel": channel})]
        }
        _ => Vec::new(),
    }
}

fn feed_data(state: &MockState, channel: u64, request: &Value) -> Option<Value> {
    let mut quotes = Vec::new();
    let mut greeks = Vec::new();
    let subscriptions = request["add"].as_array().cloned().unwrap_or_default();

    for sub in &subscriptions {
        let symbol = sub["symbol"].as_str().unwrap_or_default();
        match sub["type"].as_str() {
            Some("Quote") => {
                if let Some((bid, ask)) = state.quotes.lock().get(symbol) {
                    quotes.extend([
                        json!("Quote"),
                        json!(symbol),
                        json!(bid),
                        json!(ask),
                        json!(100),
                        json!(120),
                    ]);
                }
            }
            Some("Greeks") => {
                if let Some(delta) = state.greeks.lock().get(symbol) {
                    greeks.extend([
                        json!("Greeks"),
                        json!(symbol),
                        json!(1_735_833_600_000_i64),
                        json!(2.0),
                        json!(0.18),
                        json!(delta),
                        json!(0.012),
                        json!(-0.05),
                        json!(0.02),
                        json!(0.31),
                    ]);
                }
            }
            _ => {}
        }
    }

    let mut data = Vec::new();
    if !quotes.is_empty() {
        data.push(json!("Quote"));
        data.push(Value::Array(quotes));
    }
    if !greeks.is_empty() {
        data.push(json!("Greeks"));
        data.push(Value::Array(greeks));
    }
    if data.is_empty() {
        return None;
    }
    Some(json!({"type": "FEED_DATA", "channel": channel, "data": data}))
}
