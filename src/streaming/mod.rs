//! Real-time quote and greeks collection.
//!
//! A collection opens its own connection, subscribes all requested symbols
//! in one batch and reads until every symbol has an event or the deadline
//! passes. The connection is closed on every exit path.

mod collector;
mod connector;
mod snapshot;

pub use collector::QuoteCollector;
pub use connector::DxLinkConnector;
pub use snapshot::CollectedSnapshot;
pub use tastytrade_client::{EventKind, FeedEvent, GreeksEvent, QuoteEvent};

use crate::error::TradingResult;
use async_trait::async_trait;

/// Opens streaming connections.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    /// Opens a connection ready to accept subscriptions.
    async fn open(&self) -> TradingResult<Box<dyn FeedConnection>>;
}

/// One open streaming connection.
#[async_trait]
pub trait FeedConnection: Send {
    /// Subscribes a batch of symbols to one event kind.
    async fn subscribe(&mut self, symbols: &[String], kind: EventKind) -> TradingResult<()>;

    /// Waits for the next batch of events; `None` once the stream ends.
    async fn next_events(&mut self) -> TradingResult<Option<Vec<FeedEvent>>>;

    /// Tears the connection down.
    async fn close(&mut self);
}
