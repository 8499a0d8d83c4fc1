//! DXLink WebSocket client for real-time quotes and greeks.
//!
//! The connection performs the SETUP / AUTH / CHANNEL_REQUEST / FEED_SETUP
//! handshake on connect and then delivers decoded feed events. Events are
//! requested in the COMPACT data format with fixed field lists so that the
//! flat value arrays can be decoded positionally.

use crate::error::Error;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

#[cfg(test)]
mod tests;

/// Channel number used for the single FEED channel.
pub const FEED_CHANNEL: u32 = 1;

/// Protocol version announced in SETUP.
const PROTOCOL_VERSION: &str = "0.1-DXF-JS/0.3.0";

/// Keepalive timeout announced to the server, in seconds.
const KEEPALIVE_TIMEOUT_SECS: u64 = 60;

/// How long `close` waits for the writer to flush the close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

const QUOTE_FIELDS: [&str; 6] = [
    "eventType",
    "eventSymbol",
    "bidPrice",
    "askPrice",
    "bidSize",
    "askSize",
];

const GREEKS_FIELDS: [&str; 10] = [
    "eventType",
    "eventSymbol",
    "time",
    "price",
    "volatility",
    "delta",
    "gamma",
    "theta",
    "rho",
    "vega",
];

// ============================================================================
// Events
// ============================================================================

/// Kind of market event to subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    /// Top-of-book bid/ask.
    Quote,
    /// Option greeks and implied volatility.
    Greeks,
}

impl EventKind {
    /// DXLink event type name.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Quote => "Quote",
            Self::Greeks => "Greeks",
        }
    }

    /// Fields requested in COMPACT format, in wire order.
    #[must_use]
    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            Self::Quote => &QUOTE_FIELDS,
            Self::Greeks => &GREEKS_FIELDS,
        }
    }

    fn from_event_type(name: &str) -> Option<Self> {
        match name {
            "Quote" => Some(Self::Quote),
            "Greeks" => Some(Self::Greeks),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.event_type())
    }
}

/// Quote event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteEvent {
    /// Streamer symbol.
    pub event_symbol: String,
    /// Best bid, absent when the feed reports NaN.
    pub bid_price: Option<Decimal>,
    /// Best ask, absent when the feed reports NaN.
    pub ask_price: Option<Decimal>,
    /// Size at the bid.
    pub bid_size: Option<Decimal>,
    /// Size at the ask.
    pub ask_size: Option<Decimal>,
    /// Local receipt time.
    pub received_at: DateTime<Utc>,
}

impl QuoteEvent {
    /// Midpoint of bid and ask, when both sides are present.
    #[must_use]
    pub fn midpoint(&self) -> Option<Decimal> {
        match (self.bid_price, self.ask_price) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }
}

/// Greeks event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreeksEvent {
    /// Streamer symbol.
    pub event_symbol: String,
    /// Event time in epoch milliseconds.
    pub time: Option<i64>,
    /// Theoretical option price.
    pub price: Option<f64>,
    /// Implied volatility.
    pub volatility: Option<f64>,
    /// Delta.
    pub delta: Option<f64>,
    /// Gamma.
    pub gamma: Option<f64>,
    /// Theta.
    pub theta: Option<f64>,
    /// Rho.
    pub rho: Option<f64>,
    /// Vega.
    pub vega: Option<f64>,
    /// Local receipt time.
    pub received_at: DateTime<Utc>,
}

/// Decoded feed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeedEvent {
    /// Quote event.
    Quote(QuoteEvent),
    /// Greeks event.
    Greeks(GreeksEvent),
}

impl FeedEvent {
    /// Streamer symbol the event is for.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Quote(q) => &q.event_symbol,
            Self::Greeks(g) => &g.event_symbol,
        }
    }

    /// Kind of the event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Quote(_) => EventKind::Quote,
            Self::Greeks(_) => EventKind::Greeks,
        }
    }

    /// Receipt time.
    #[must_use]
    pub fn received_at(&self) -> DateTime<Utc> {
        match self {
            Self::Quote(q) => q.received_at,
            Self::Greeks(g) => g.received_at,
        }
    }
}

// ============================================================================
// Protocol messages
// ============================================================================

/// Token wrapper that never prints its value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RedactedToken(pub String);

impl std::fmt::Debug for RedactedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Parameters of a CHANNEL_REQUEST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelParameters {
    /// Feed contract, normally "AUTO".
    pub contract: String,
}

/// One entry of a FEED_SUBSCRIPTION.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Event type name.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Streamer symbol.
    pub symbol: String,
}

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientCommand {
    /// Connection setup.
    #[serde(rename_all = "camelCase")]
    Setup {
        /// Always 0.
        channel: u32,
        /// Client protocol version.
        version: String,
        /// Keepalive timeout for the server, seconds.
        keepalive_timeout: u64,
        /// Keepalive timeout the client accepts, seconds.
        accept_keepalive_timeout: u64,
    },
    /// Authorization with the API quote token.
    Auth {
        /// Always 0.
        channel: u32,
        /// Quote token.
        token: RedactedToken,
    },
    /// Opens a service channel.
    ChannelRequest {
        /// Channel number.
        channel: u32,
        /// Service name, "FEED".
        service: String,
        /// Service parameters.
        parameters: ChannelParameters,
    },
    /// Configures the feed data format.
    #[serde(rename_all = "camelCase")]
    FeedSetup {
        /// Channel number.
        channel: u32,
        /// Aggregation period in seconds.
        accept_aggregation_period: f64,
        /// "COMPACT" or "FULL".
        accept_data_format: String,
        /// Fields per event type.
        accept_event_fields: BTreeMap<String, Vec<String>>,
    },
    /// Adds subscriptions.
    FeedSubscription {
        /// Channel number.
        channel: u32,
        /// Drop existing subscriptions first.
        #[serde(default)]
        reset: bool,
        /// Subscriptions to add.
        add: Vec<Subscription>,
    },
    /// Closes a channel.
    ChannelCancel {
        /// Channel number.
        channel: u32,
    },
    /// Keepalive.
    Keepalive {
        /// Always 0.
        channel: u32,
    },
}

impl ClientCommand {
    /// Creates the SETUP message.
    #[must_use]
    pub fn setup() -> Self {
        Self::Setup {
            channel: 0,
            version: PROTOCOL_VERSION.to_string(),
            keepalive_timeout: KEEPALIVE_TIMEOUT_SECS,
            accept_keepalive_timeout: KEEPALIVE_TIMEOUT_SECS,
        }
    }

    /// Creates the AUTH message.
    #[must_use]
    pub fn auth(token: &str) -> Self {
        Self::Auth {
            channel: 0,
            token: RedactedToken(token.to_string()),
        }
    }

    /// Creates a FEED channel request.
    #[must_use]
    pub fn channel_request(channel: u32) -> Self {
        Self::ChannelRequest {
            channel,
            service: "FEED".to_string(),
            parameters: ChannelParameters {
                contract: "AUTO".to_string(),
            },
        }
    }

    /// Creates a COMPACT feed setup for both quotes and greeks.
    #[must_use]
    pub fn feed_setup(channel: u32) -> Self {
        let accept_event_fields = [EventKind::Quote, EventKind::Greeks]
            .into_iter()
            .map(|kind| {
                (
                    kind.event_type().to_string(),
                    kind.fields().iter().map(|f| (*f).to_string()).collect(),
                )
            })
            .collect();

        Self::FeedSetup {
            channel,
            accept_aggregation_period: 0.1,
            accept_data_format: "COMPACT".to_string(),
            accept_event_fields,
        }
    }

    /// Creates a batched subscription for one event kind.
    #[must_use]
    pub fn feed_subscription(channel: u32, symbols: &[String], kind: EventKind) -> Self {
        Self::FeedSubscription {
            channel,
            reset: false,
            add: symbols
                .iter()
                .map(|symbol| Subscription {
                    event_type: kind.event_type().to_string(),
                    symbol: symbol.clone(),
                })
                .collect(),
        }
    }

    /// Creates a channel cancel.
    #[must_use]
    pub fn channel_cancel(channel: u32) -> Self {
        Self::ChannelCancel { channel }
    }

    /// Creates a keepalive.
    #[must_use]
    pub fn keepalive() -> Self {
        Self::Keepalive { channel: 0 }
    }
}

/// Messages received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DxLinkMessage {
    /// Server setup acknowledgement.
    #[serde(rename_all = "camelCase")]
    Setup {
        /// Server keepalive timeout, seconds.
        #[serde(default)]
        keepalive_timeout: Option<u64>,
    },
    /// Authorization state change.
    AuthState {
        /// "AUTHORIZED" or "UNAUTHORIZED".
        state: String,
    },
    /// Channel opened.
    ChannelOpened {
        /// Channel number.
        channel: u32,
    },
    /// Channel closed by the server.
    ChannelClosed {
        /// Channel number.
        channel: u32,
    },
    /// Effective feed configuration.
    FeedConfig {
        /// Channel number.
        channel: u32,
    },
    /// Market data.
    FeedData {
        /// Channel number.
        channel: u32,
        /// Raw payload, COMPACT or FULL.
        data: Vec<Value>,
    },
    /// Keepalive.
    Keepalive {
        /// Channel number.
        #[serde(default)]
        channel: u32,
    },
    /// Protocol error.
    Error {
        /// Error code.
        #[serde(default)]
        error: String,
        /// Error message.
        #[serde(default)]
        message: String,
    },
    /// Any message type this client does not handle.
    #[serde(other)]
    Unknown,
}

// ============================================================================
// Decoding
// ============================================================================

/// Decodes a FEED_DATA payload into events.
///
/// Accepts COMPACT payloads (`["Quote", [flat values...], "Greeks", [...]]`)
/// and FULL payloads (an array of objects carrying `eventType`). Records of
/// unknown types and truncated records are skipped.
#[must_use]
pub fn decode_feed_data(data: &[Value], received_at: DateTime<Utc>) -> Vec<FeedEvent> {
    let mut events = Vec::new();

    if matches!(data.first(), Some(Value::String(_))) {
        for pair in data.chunks(2) {
            let [Value::String(name), Value::Array(values)] = pair else {
                continue;
            };
            let Some(kind) = EventKind::from_event_type(name) else {
                continue;
            };
            for record in values.chunks_exact(kind.fields().len()) {
                let fields: BTreeMap<&str, &Value> =
                    kind.fields().iter().copied().zip(record.iter()).collect();
                if let Some(event) = build_event(kind, &fields, received_at) {
                    events.push(event);
                }
            }
        }
    } else {
        for object in data.iter().filter_map(Value::as_object) {
            let Some(kind) = object
                .get("eventType")
                .and_then(Value::as_str)
                .and_then(EventKind::from_event_type)
            else {
                continue;
            };
            let fields: BTreeMap<&str, &Value> =
                object.iter().map(|(k, v)| (k.as_str(), v)).collect();
            if let Some(event) = build_event(kind, &fields, received_at) {
                events.push(event);
            }
        }
    }

    events
}

fn build_event(
    kind: EventKind,
    fields: &BTreeMap<&str, &Value>,
    received_at: DateTime<Utc>,
) -> Option<FeedEvent> {
    let event_symbol = fields.get("eventSymbol")?.as_str()?.to_string();
    let decimal = |name: &str| fields.get(name).and_then(|v| value_to_decimal(v));
    let float = |name: &str| fields.get(name).and_then(|v| value_to_f64(v));

    Some(match kind {
        EventKind::Quote => FeedEvent::Quote(QuoteEvent {
            event_symbol,
            bid_price: decimal("bidPrice"),
            ask_price: decimal("askPrice"),
            bid_size: decimal("bidSize"),
            ask_size: decimal("askSize"),
            received_at,
        }),
        EventKind::Greeks => FeedEvent::Greeks(GreeksEvent {
            event_symbol,
            time: float("time").map(|t| t as i64),
            price: float("price"),
            volatility: float("volatility"),
            delta: float("delta"),
            gamma: float("gamma"),
            theta: float("theta"),
            rho: float("rho"),
            vega: float("vega"),
            received_at,
        }),
    })
}

fn numeric_text(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || s.eq_ignore_ascii_case("nan") || s.contains("Infinity") {
                None
            } else {
                Some(s.to_string())
            }
        }
        _ => None,
    }
}

fn value_to_decimal(value: &Value) -> Option<Decimal> {
    let text = numeric_text(value)?;
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

fn value_to_f64(value: &Value) -> Option<f64> {
    numeric_text(value)?
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
}

// ============================================================================
// Client
// ============================================================================

/// DXLink WebSocket client.
///
/// Owns a reader and a writer task. Both are aborted on [`DxLinkClient::close`]
/// or drop, so no task outlives the client.
pub struct DxLinkClient {
    rx: mpsc::Receiver<Result<DxLinkMessage, Error>>,
    tx: Option<mpsc::Sender<ClientCommand>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    authorized: bool,
}

impl DxLinkClient {
    /// Connects and performs the handshake.
    ///
    /// Returns only once the server has accepted the token. Callers bound
    /// the wait with their own deadline.
    ///
    /// # Arguments
    /// * `url` - DXLink WebSocket URL from the API quote token
    /// * `token` - API quote token
    ///
    /// # Errors
    /// Returns [`Error::Unauthorized`] when the token is refused, either by
    /// an `ERROR` frame or an `AUTH_STATE` other than `AUTHORIZED` after the
    /// AUTH, and a transport error if the connection fails.
    pub async fn connect(url: &str, token: &str) -> Result<Self, Error> {
        let endpoint = url::Url::parse(url)?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(Error::InvalidRequest(format!(
                "dxlink endpoint must be ws or wss: {url}"
            )));
        }
        let (ws_stream, _) = connect_async(endpoint.as_str()).await.map_err(Box::new)?;
        let (mut write, mut read) = ws_stream.split();
        debug!(%url, "dxlink connected");

        // Channel for receiving messages
        let (msg_tx, msg_rx) = mpsc::channel::<Result<DxLinkMessage, Error>>(256);

        // Channel for sending commands
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<ClientCommand>(32);

        let reader = tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<DxLinkMessage>(&text) {
                        Ok(parsed) => {
                            if msg_tx.send(Ok(parsed)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!(error = %e, "ignoring undecodable dxlink frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Err(e) => {
                        let _ = msg_tx.send(Err(Error::WebSocket(Box::new(e)))).await;
                        break;
                    }
                    _ => {}
                }
            }
        });

        let writer = tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                match serde_json::to_string(&cmd) {
                    Ok(json) => {
                        if write.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to encode dxlink command"),
                }
            }
            let _ = write.close().await;
        });

        let mut client = Self {
            rx: msg_rx,
            tx: Some(cmd_tx),
            reader,
            writer,
            authorized: false,
        };

        client.send(ClientCommand::setup()).await?;
        if !client.await_auth_state().await? {
            client.send(ClientCommand::auth(token)).await?;
            let authorized = match client.await_auth_state().await {
                Err(Error::Protocol(message)) => return Err(Error::Unauthorized(message)),
                other => other?,
            };
            if !authorized {
                return Err(Error::Unauthorized(
                    "dxlink rejected the quote token".to_string(),
                ));
            }
        }
        debug!("dxlink authorized");

        client
            .send(ClientCommand::channel_request(FEED_CHANNEL))
            .await?;
        client.send(ClientCommand::feed_setup(FEED_CHANNEL)).await?;

        Ok(client)
    }

    /// Reads until the next `AUTH_STATE` and reports whether it granted
    /// access. Other messages received meanwhile are dropped.
    async fn await_auth_state(&mut self) -> Result<bool, Error> {
        loop {
            match self.next_message().await? {
                None => return Err(Error::ConnectionClosed),
                Some(DxLinkMessage::AuthState { state }) => return Ok(state == "AUTHORIZED"),
                Some(_) => {}
            }
        }
    }

    /// Sends a command to the server.
    ///
    /// # Errors
    /// Returns error if the connection is closed.
    pub async fn send(&self, cmd: ClientCommand) -> Result<(), Error> {
        let tx = self.tx.as_ref().ok_or(Error::ConnectionClosed)?;
        tx.send(cmd).await.map_err(|_| Error::ConnectionClosed)
    }

    /// Subscribes a batch of symbols to one event kind.
    ///
    /// # Errors
    /// Returns error if the send fails.
    pub async fn subscribe(&self, symbols: &[String], kind: EventKind) -> Result<(), Error> {
        self.send(ClientCommand::feed_subscription(FEED_CHANNEL, symbols, kind))
            .await
    }

    /// Receives the next protocol message.
    ///
    /// Keepalives are answered here and not returned. `ERROR` messages are
    /// returned as [`Error::Protocol`], a loss of authorization as
    /// [`Error::Unauthorized`].
    /// Returns `Ok(None)` once the connection is closed.
    ///
    /// # Errors
    /// Returns error on protocol or transport failure.
    pub async fn next_message(&mut self) -> Result<Option<DxLinkMessage>, Error> {
        loop {
            let Some(msg) = self.rx.recv().await else {
                return Ok(None);
            };
            match msg? {
                DxLinkMessage::Keepalive { .. } => {
                    self.send(ClientCommand::keepalive()).await?;
                }
                DxLinkMessage::Error { error, message } => {
                    return Err(Error::Protocol(format!("{error}: {message}")));
                }
                DxLinkMessage::AuthState { state } => {
                    if state == "AUTHORIZED" {
                        self.authorized = true;
                    } else if self.authorized {
                        return Err(Error::Unauthorized(format!("authorization lost: {state}")));
                    }
                    return Ok(Some(DxLinkMessage::AuthState { state }));
                }
                other => return Ok(Some(other)),
            }
        }
    }

    /// Receives the next batch of decoded feed events.
    ///
    /// Returns `Ok(None)` once the connection is closed.
    ///
    /// # Errors
    /// Returns error on protocol or transport failure.
    pub async fn next_events(&mut self) -> Result<Option<Vec<FeedEvent>>, Error> {
        loop {
            match self.next_message().await? {
                None => return Ok(None),
                Some(DxLinkMessage::FeedData { data, .. }) => {
                    return Ok(Some(decode_feed_data(&data, Utc::now())));
                }
                Some(_) => {}
            }
        }
    }

    /// Cancels the feed channel and closes the socket.
    pub async fn close(&mut self) {
        let _ = self.send(ClientCommand::channel_cancel(FEED_CHANNEL)).await;
        self.tx.take();
        if tokio::time::timeout(CLOSE_GRACE, &mut self.writer)
            .await
            .is_err()
        {
            self.writer.abort();
        }
        self.reader.abort();
        debug!("dxlink closed");
    }
}

impl Drop for DxLinkClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
