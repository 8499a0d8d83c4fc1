//! Request and response types for the tastytrade API.
//!
//! Wire names are kebab-case. Monetary values travel as decimal strings and
//! are decoded into [`Decimal`]; calendar dates use `YYYY-MM-DD`.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};


/// Order leg action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Open a long option position.
    #[serde(rename = "Buy to Open")]
    BuyToOpen,
    /// Close a short option position.
    #[serde(rename = "Buy to Close")]
    BuyToClose,
    /// Open a short option position.
    #[serde(rename = "Sell to Open")]
    SellToOpen,
    /// Close a long option position.
    #[serde(rename = "Sell to Close")]
    SellToClose,
    /// Buy shares.
    #[serde(rename = "Buy")]
    Buy,
    /// Sell shares.
    #[serde(rename = "Sell")]
    Sell,
}

impl Action {
    /// Returns true for actions that pay premium or purchase shares.
    #[must_use]
    pub const fn is_buy(&self) -> bool {
        matches!(self, Self::BuyToOpen | Self::BuyToClose | Self::Buy)
    }

    /// Returns true for the four option actions.
    #[must_use]
    pub const fn is_option_action(&self) -> bool {
        !matches!(self, Self::Buy | Self::Sell)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BuyToOpen => write!(f, "Buy to Open"),
            Self::BuyToClose => write!(f, "Buy to Close"),
            Self::SellToOpen => write!(f, "Sell to Open"),
            Self::SellToClose => write!(f, "Sell to Close"),
            Self::Buy => write!(f, "Buy"),
            Self::Sell => write!(f, "Sell"),
        }
    }
}

/// Instrument type as named by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentType {
    /// Listed stock or ETF.
    #[serde(rename = "Equity")]
    Equity,
    /// Listed equity option.
    #[serde(rename = "Equity Option")]
    EquityOption,
    /// Futures contract.
    #[serde(rename = "Future")]
    Future,
    /// Option on a futures contract.
    #[serde(rename = "Future Option")]
    FutureOption,
    /// Cryptocurrency.
    #[serde(rename = "Cryptocurrency")]
    Cryptocurrency,
}

impl std::fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Equity => write!(f, "Equity"),
            Self::EquityOption => write!(f, "Equity Option"),
            Self::Future => write!(f, "Future"),
            Self::FutureOption => write!(f, "Future Option"),
            Self::Cryptocurrency => write!(f, "Cryptocurrency"),
        }
    }
}

/// Whether a price is paid or received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceEffect {
    /// Net amount paid.
    Debit,
    /// Net amount received.
    Credit,
    /// Zero-valued.
    None,
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// Limit order.
    Limit,
    /// Market order.
    Market,
    /// Stop order.
    Stop,
    /// Stop-limit order.
    #[serde(rename = "Stop Limit")]
    StopLimit,
}

/// Time in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Valid for the current session.
    Day,
    /// Good until cancelled.
    #[serde(rename = "GTC")]
    Gtc,
    /// Immediate or cancel.
    #[serde(rename = "IOC")]
    Ioc,
}

// ============================================================================
// Envelopes
// ============================================================================

/// Standard `{"data": ...}` response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataEnvelope<T> {
    /// Response payload.
    pub data: T,
    /// Request context path echoed by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Collection payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemList<T> {
    /// Items in this response.
    pub items: Vec<T>,
}

/// Pagination block attached to paged list responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Pagination {
    /// Requested page size.
    pub per_page: u32,
    /// Zero-based page index.
    pub page_offset: u32,
    /// Zero-based offset of the first item.
    #[serde(default)]
    pub item_offset: u32,
    /// Total number of items across all pages.
    #[serde(default)]
    pub total_items: u32,
    /// Total number of pages.
    pub total_pages: u32,
    /// Number of items in this page.
    #[serde(default)]
    pub current_item_count: u32,
}

/// Paged list response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagedEnvelope<T> {
    /// Items in this page.
    pub data: ItemList<T>,
    /// Paging details; absent when everything fit on one page.
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

/// One page of results.
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Paging details.
    pub pagination: Option<Pagination>,
}

impl<T> Page<T> {
    /// Returns true when a page after this one exists.
    #[must_use]
    pub fn has_next(&self) -> bool {
        match &self.pagination {
            Some(p) => p.page_offset + 1 < p.total_pages,
            None => false,
        }
    }
}

impl<T> From<PagedEnvelope<T>> for Page<T> {
    fn from(envelope: PagedEnvelope<T>) -> Self {
        Self {
            items: envelope.data.items,
            pagination: envelope.pagination,
        }
    }
}

// ============================================================================
// OAuth
// ============================================================================

/// Refresh-token grant form.
#[derive(Debug, Clone, Serialize)]
pub struct TokenRequest<'a> {
    /// Always `refresh_token`.
    pub grant_type: &'a str,
    /// Long-lived refresh token.
    pub refresh_token: &'a str,
    /// OAuth client secret.
    pub client_secret: &'a str,
}

/// Access token issued by the OAuth endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Short-lived bearer token.
    pub access_token: String,
    /// Token type, normally `Bearer`.
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds as reported by the server.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

// ============================================================================
// Accounts
// ============================================================================

/// Customer account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Account {
    /// Account number.
    pub account_number: String,
    /// User-assigned nickname.
    #[serde(default)]
    pub nickname: Option<String>,
    /// Account type, e.g. "Individual".
    #[serde(default)]
    pub account_type_name: Option<String>,
    /// Whether the account is closed.
    #[serde(default)]
    pub is_closed: bool,
}

/// Account entry as returned by the customer accounts listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AccountEntry {
    /// The account.
    pub account: Account,
    /// Authority the customer holds on the account.
    #[serde(default)]
    pub authority_level: Option<String>,
}

/// Account balances.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AccountBalance {
    /// Account number.
    pub account_number: String,
    /// Cash balance.
    pub cash_balance: Decimal,
    /// Net liquidating value.
    pub net_liquidating_value: Decimal,
    /// Buying power available for derivatives.
    #[serde(default)]
    pub derivative_buying_power: Decimal,
    /// Buying power available for equities.
    #[serde(default)]
    pub equity_buying_power: Decimal,
    /// Maintenance requirement.
    #[serde(default)]
    pub maintenance_requirement: Decimal,
    /// Pending cash.
    #[serde(default)]
    pub pending_cash: Decimal,
}

/// Open position.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Position {
    /// Account number.
    pub account_number: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Instrument type.
    pub instrument_type: InstrumentType,
    /// Underlying symbol.
    pub underlying_symbol: String,
    /// Absolute quantity.
    pub quantity: Decimal,
    /// "Long", "Short" or "Zero".
    pub quantity_direction: String,
    /// Average open price.
    #[serde(default)]
    pub average_open_price: Decimal,
    /// Last close price.
    #[serde(default)]
    pub close_price: Decimal,
    /// Contract multiplier.
    #[serde(default)]
    pub multiplier: Decimal,
    /// Expiration for derivatives.
    #[serde(default)]
    pub expires_at: Option<String>,
}

/// One point of net liquidating value history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NetLiqSnapshot {
    /// Timestamp of the sample.
    pub time: String,
    /// Opening value.
    pub open: Decimal,
    /// High value.
    pub high: Decimal,
    /// Low value.
    pub low: Decimal,
    /// Closing value.
    pub close: Decimal,
}

/// Account transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Transaction {
    /// Transaction id.
    pub id: u64,
    /// Transaction type, e.g. "Trade".
    pub transaction_type: String,
    /// Transaction sub type, e.g. "Sell to Close".
    #[serde(default)]
    pub transaction_sub_type: Option<String>,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Instrument symbol.
    #[serde(default)]
    pub symbol: Option<String>,
    /// Gross value.
    #[serde(default)]
    pub value: Decimal,
    /// Net value after fees.
    #[serde(default)]
    pub net_value: Decimal,
    /// Execution timestamp.
    pub executed_at: String,
}

/// Transaction history query.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TransactionQuery {
    /// First day to include.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    /// Last day to include.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    /// Restrict to one underlying.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub underlying_symbol: Option<String>,
    /// Page size.
    pub per_page: u32,
    /// Zero-based page index.
    pub page_offset: u32,
}

/// Order history query.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct OrderQuery {
    /// First day to include.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    /// Last day to include.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    /// Restrict to one underlying.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub underlying_symbol: Option<String>,
    /// Page size.
    pub per_page: u32,
    /// Zero-based page index.
    pub page_offset: u32,
}

// ============================================================================
// Orders
// ============================================================================

/// Leg of a new order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NewOrderLeg {
    /// Instrument type.
    pub instrument_type: InstrumentType,
    /// Instrument symbol (OCC format for options).
    pub symbol: String,
    /// Contract or share count.
    pub quantity: u32,
    /// Leg action.
    pub action: Action,
}

/// New or replacement order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NewOrder {
    /// Time in force.
    pub time_in_force: TimeInForce,
    /// Order type.
    pub order_type: OrderType,
    /// Absolute limit price.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    /// Whether `price` is paid or received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_effect: Option<PriceEffect>,
    /// Order legs.
    pub legs: Vec<NewOrderLeg>,
}

/// Leg of an existing order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OrderLegResponse {
    /// Instrument type.
    pub instrument_type: InstrumentType,
    /// Instrument symbol.
    pub symbol: String,
    /// Ordered quantity.
    pub quantity: Decimal,
    /// Quantity still working.
    #[serde(default)]
    pub remaining_quantity: Decimal,
    /// Leg action.
    pub action: Action,
}

/// Existing order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Order {
    /// Order id.
    pub id: u64,
    /// Account number.
    #[serde(default)]
    pub account_number: Option<String>,
    /// Status, e.g. "Live", "Filled", "Cancelled".
    pub status: String,
    /// Order type.
    pub order_type: OrderType,
    /// Time in force.
    pub time_in_force: TimeInForce,
    /// Limit price.
    #[serde(default)]
    pub price: Option<Decimal>,
    /// Price effect.
    #[serde(default)]
    pub price_effect: Option<PriceEffect>,
    /// Underlying symbol.
    #[serde(default)]
    pub underlying_symbol: Option<String>,
    /// Order legs.
    #[serde(default)]
    pub legs: Vec<OrderLegResponse>,
    /// Receipt timestamp.
    #[serde(default)]
    pub received_at: Option<String>,
}

/// Buying power impact reported for a placed or dry-run order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BuyingPowerEffect {
    /// Change in buying power.
    pub change_in_buying_power: Decimal,
    /// Effect of the change.
    #[serde(default)]
    pub change_in_buying_power_effect: Option<PriceEffect>,
}

/// Warning or error attached to an order response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderMessage {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Response to placing an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PlacedOrderResponse {
    /// The order as accepted.
    pub order: Order,
    /// Buying power impact.
    #[serde(default)]
    pub buying_power_effect: Option<BuyingPowerEffect>,
    /// Non-fatal warnings.
    #[serde(default)]
    pub warnings: Vec<OrderMessage>,
}

// ============================================================================
// Watchlists & Search
// ============================================================================

/// Watchlist entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WatchlistEntry {
    /// Symbol.
    pub symbol: String,
    /// Instrument type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument_type: Option<InstrumentType>,
}

/// Watchlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Watchlist {
    /// Watchlist name.
    pub name: String,
    /// Entries, absent for empty lists.
    #[serde(default)]
    pub watchlist_entries: Option<Vec<WatchlistEntry>>,
    /// Display order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_index: Option<u32>,
}

/// Symbol search match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolMatch {
    /// Symbol.
    pub symbol: String,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
}

/// Market metrics for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MarketMetric {
    /// Symbol.
    pub symbol: String,
    /// Implied volatility index.
    #[serde(default)]
    pub implied_volatility_index: Option<Decimal>,
    /// IV rank, 0..1.
    #[serde(default)]
    pub implied_volatility_index_rank: Option<Decimal>,
    /// IV percentile, 0..1.
    #[serde(default)]
    pub implied_volatility_percentile: Option<Decimal>,
    /// Liquidity rating.
    #[serde(default)]
    pub liquidity_rating: Option<u32>,
    /// Beta against SPY.
    #[serde(default)]
    pub beta: Option<Decimal>,
}

// ============================================================================
// Instruments
// ============================================================================

/// Equity instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Equity {
    /// Symbol.
    pub symbol: String,
    /// Symbol used on the streaming feed.
    pub streamer_symbol: String,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Whether the instrument is an ETF.
    #[serde(default)]
    pub is_etf: bool,
}

/// One strike of a nested option chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NestedStrike {
    /// Strike price.
    pub strike_price: Decimal,
    /// Call OCC symbol.
    pub call: String,
    /// Call streamer symbol.
    pub call_streamer_symbol: String,
    /// Put OCC symbol.
    pub put: String,
    /// Put streamer symbol.
    pub put_streamer_symbol: String,
}

/// One expiration of a nested option chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NestedExpiration {
    /// Expiration date.
    pub expiration_date: NaiveDate,
    /// Days until expiration.
    #[serde(default)]
    pub days_to_expiration: u32,
    /// "Regular", "Weekly", ...
    #[serde(default)]
    pub expiration_type: Option<String>,
    /// Strikes listed for this expiration.
    pub strikes: Vec<NestedStrike>,
}

/// Nested option chain for one root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NestedOptionChain {
    /// Underlying symbol.
    pub underlying_symbol: String,
    /// Option root symbol.
    pub root_symbol: String,
    /// Shares per contract.
    #[serde(default)]
    pub shares_per_contract: u32,
    /// Listed expirations.
    pub expirations: Vec<NestedExpiration>,
}

// ============================================================================
// Streaming credentials & market time
// ============================================================================

/// Streaming credential for the DXLink feed.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApiQuoteToken {
    /// Bearer token presented in the DXLink AUTH message.
    pub token: String,
    /// WebSocket URL of the DXLink endpoint.
    pub dxlink_url: String,
    /// Data entitlement level.
    #[serde(default)]
    pub level: Option<String>,
}

impl std::fmt::Debug for ApiQuoteToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiQuoteToken")
            .field("token", &"<redacted>")
            .field("dxlink_url", &self.dxlink_url)
            .field("level", &self.level)
            .finish()
    }
}

/// Current market session for equities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MarketSession {
    /// Session state, e.g. "Open", "Closed", "Pre-Market".
    pub state: String,
    /// Session open time.
    #[serde(default)]
    pub open_at: Option<String>,
    /// Session close time.
    #[serde(default)]
    pub close_at: Option<String>,
}

impl MarketSession {
    /// Returns true during regular trading hours.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.eq_ignore_ascii_case("open")
    }
}
