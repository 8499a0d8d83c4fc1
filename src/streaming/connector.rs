use super::{EventKind, FeedConnection, FeedConnector, FeedEvent};
use crate::cache::TtlCache;
use crate::error::{TradingError, TradingResult};
use crate::remote::RemoteApi;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tastytrade_client::{ApiQuoteToken, DxLinkClient};
use tracing::{debug, warn};

type TokenCache = TtlCache<(), ApiQuoteToken>;

/// Opens DXLink connections with a cached streaming credential.
///
/// A token the server refuses is dropped from the cache, whether the refusal
/// comes during the handshake or later on an open stream. A refusal during
/// the handshake is retried once with a freshly fetched token.
pub struct DxLinkConnector {
    api: RemoteApi,
    tokens: Arc<TokenCache>,
}

impl DxLinkConnector {
    /// Creates a connector whose quote token is reused for `token_ttl`.
    pub fn new(api: RemoteApi, token_ttl: Duration) -> Self {
        Self {
            api,
            tokens: Arc::new(TtlCache::new(token_ttl)),
        }
    }

    async fn quote_token(&self) -> TradingResult<ApiQuoteToken> {
        let ttl = self.tokens.default_ttl();
        self.tokens
            .get_or_compute((), ttl, || {
                self.api.call("fetch quote token", |client, session| async move {
                    client.get_quote_token(&session.access_token).await
                })
            })
            .await
    }

    async fn connect(
        &self,
        token: &ApiQuoteToken,
    ) -> Result<DxLinkClient, tastytrade_client::Error> {
        debug!(url = %token.dxlink_url, "opening dxlink stream");
        DxLinkClient::connect(&token.dxlink_url, &token.token).await
    }
}

#[async_trait]
impl FeedConnector for DxLinkConnector {
    async fn open(&self) -> TradingResult<Box<dyn FeedConnection>> {
        let mut token = self.quote_token().await?;
        let mut connected = self.connect(&token).await;

        if matches!(&connected, Err(e) if e.is_auth_rejection()) {
            warn!("quote token refused, fetching a new one");
            self.tokens.invalidate(&());
            token = self.quote_token().await?;
            connected = self.connect(&token).await;
        }

        match connected {
            Ok(client) => Ok(Box::new(DxLinkFeed {
                client,
                tokens: Arc::clone(&self.tokens),
            })),
            Err(e) => {
                // The credential may be what failed; fetch a new one next time.
                self.tokens.invalidate(&());
                Err(TradingError::Stream(format!(
                    "connect to {}: {e}",
                    token.dxlink_url
                )))
            }
        }
    }
}

/// Open DXLink stream that forgets the cached token if the server revokes it.
struct DxLinkFeed {
    client: DxLinkClient,
    tokens: Arc<TokenCache>,
}

impl DxLinkFeed {
    fn stream_error(&self, context: &str, e: tastytrade_client::Error) -> TradingError {
        if e.is_auth_rejection() {
            self.tokens.invalidate(&());
        }
        TradingError::Stream(format!("{context}{e}"))
    }
}

#[async_trait]
impl FeedConnection for DxLinkFeed {
    async fn subscribe(&mut self, symbols: &[String], kind: EventKind) -> TradingResult<()> {
        self.client
            .subscribe(symbols, kind)
            .await
            .map_err(|e| self.stream_error(&format!("subscribe {kind}: "), e))
    }

    async fn next_events(&mut self) -> TradingResult<Option<Vec<FeedEvent>>> {
        let events = self.client.next_events().await;
        events.map_err(|e| self.stream_error("", e))
    }

    async fn close(&mut self) {
        self.client.close().await;
    }
}
