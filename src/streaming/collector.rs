use super::{CollectedSnapshot, EventKind, FeedConnection, FeedConnector};
use crate::error::{TradingError, TradingResult};
use crate::instrument::InstrumentIdentity;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

/// Collects the latest quote or greeks event for a set of symbols.
///
/// Every call opens its own connection; calls never share one.
pub struct QuoteCollector {
    connector: Arc<dyn FeedConnector>,
    default_timeout: Duration,
}

impl QuoteCollector {
    /// Creates a collector.
    pub fn new(connector: Arc<dyn FeedConnector>, default_timeout: Duration) -> Self {
        Self {
            connector,
            default_timeout,
        }
    }

    /// Deadline used when the caller gives none.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Collects events for resolved instruments.
    ///
    /// # Errors
    /// See [`QuoteCollector::collect_symbols`].
    pub async fn collect(
        &self,
        instruments: &[InstrumentIdentity],
        kind: EventKind,
        timeout: Option<Duration>,
    ) -> TradingResult<CollectedSnapshot> {
        let symbols = instruments.iter().map(|i| i.streamer_symbol.clone());
        self.collect_symbols(symbols, kind, timeout).await
    }

    /// Collects events for streamer symbols.
    ///
    /// Returns as soon as every symbol has an event, or with whatever was
    /// gathered once the deadline passes. A partial snapshot is not an
    /// error; check [`CollectedSnapshot::missing`].
    ///
    /// # Errors
    /// Returns an error if the connection cannot be opened, including when
    /// opening it (token fetch and handshake) does not finish before the
    /// deadline, or if it fails before the deadline.
    pub async fn collect_symbols(
        &self,
        symbols: impl IntoIterator<Item = String>,
        kind: EventKind,
        timeout: Option<Duration>,
    ) -> TradingResult<CollectedSnapshot> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let deadline = Instant::now() + timeout;
        let mut snapshot = CollectedSnapshot::new(kind, symbols);

        if snapshot.requested().is_empty() {
            return Ok(snapshot);
        }

        let mut conn = match timeout_at(deadline, self.connector.open()).await {
            Ok(conn) => conn?,
            Err(_) => {
                let timeout_ms = timeout.as_millis() as u64;
                warn!(%kind, timeout_ms, "stream did not open before deadline");
                return Err(TradingError::Stream(format!(
                    "{kind} stream did not open within {timeout_ms}ms"
                )));
            }
        };

        let result = read_until_complete(conn.as_mut(), &mut snapshot, deadline).await;
        conn.close().await;
        debug!(%kind, "stream closed");
        result?;

        if snapshot.is_complete() {
            info!(%kind, symbols = snapshot.len(), "collection complete");
        } else {
            warn!(
                %kind,
                received = snapshot.len(),
                missing = ?snapshot.missing(),
                "partial snapshot"
            );
        }
        Ok(snapshot)
    }
}

async fn read_until_complete(
    conn: &mut dyn FeedConnection,
    snapshot: &mut CollectedSnapshot,
    deadline: Instant,
) -> TradingResult<()> {
    let kind = snapshot.kind();
    let symbols: Vec<String> = snapshot.requested().iter().cloned().collect();

    match timeout_at(deadline, conn.subscribe(&symbols, kind)).await {
        Ok(subscribed) => subscribed?,
        Err(_) => return Ok(()),
    }
    debug!(%kind, count = symbols.len(), "subscribed");

    while !snapshot.is_complete() {
        match timeout_at(deadline, conn.next_events()).await {
            Err(_) => {
                debug!(%kind, "collection deadline reached");
                break;
            }
            Ok(Ok(Some(events))) => {
                for event in events {
                    snapshot.record(event);
                }
            }
            Ok(Ok(None)) => {
                warn!(%kind, "stream ended before collection completed");
                break;
            }
            Ok(Err(e)) => return Err(e),
        }
    }

    Ok(())
}
