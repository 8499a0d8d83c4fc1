//! Session-guarded, rate-limited access to the brokerage API.

use crate::error::{TradingError, TradingResult};
use crate::instrument::{InstrumentSource, OptionChain};
use crate::rate_limiter::RateLimiter;
use crate::session::{Session, SessionManager};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tastytrade_client::{Equity, TastytradeClient};
use tracing::debug;

/// Brokerage client bundled with the session and the rate limiter.
///
/// Every call made through [`RemoteApi::call`] first obtains a valid
/// session and then a rate-limit permit. Cheap to clone.
#[derive(Clone)]
pub struct RemoteApi {
    client: TastytradeClient,
    sessions: Arc<SessionManager>,
    limiter: Arc<RateLimiter>,
}

impl RemoteApi {
    /// Creates the bundle.
    pub fn new(
        client: TastytradeClient,
        sessions: Arc<SessionManager>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            client,
            sessions,
            limiter,
        }
    }

    /// Underlying HTTP client.
    pub fn client(&self) -> &TastytradeClient {
        &self.client
    }

    /// Session manager.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Shared rate limiter.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Runs one brokerage call with a valid session under a permit.
    ///
    /// `operation` names the call in errors and logs.
    ///
    /// # Errors
    /// Returns session errors as is and wraps client errors in
    /// `TradingError::Network`.
    pub async fn call<'a, T, F, Fut>(&'a self, operation: &str, f: F) -> TradingResult<T>
    where
        F: FnOnce(&'a TastytradeClient, Session) -> Fut,
        Fut: Future<Output = Result<T, tastytrade_client::Error>>,
    {
        let session = self.sessions.ensure_valid().await?;
        let _permit = self.limiter.acquire().await;
        debug!(operation, "brokerage call");

        f(&self.client, session).await.map_err(|e| {
            debug!(operation, error = %e, "brokerage call failed");
            TradingError::network(operation, e)
        })
    }
}

impl std::fmt::Debug for RemoteApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteApi")
            .field("base_url", &self.client.base_url())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl InstrumentSource for RemoteApi {
    async fn equity(&self, symbol: &str) -> TradingResult<Equity> {
        self.call(&format!("look up {symbol}"), |client, session| async move {
            client.get_equity(&session.access_token, symbol).await
        })
        .await
        .map_err(|e| not_found_as_invalid(e, || format!("unknown symbol {symbol}")))
    }

    async fn option_chain(&self, underlying: &str) -> TradingResult<OptionChain> {
        let nested = self
            .call(
                &format!("fetch option chain for {underlying}"),
                |client, session| async move {
                    client
                        .get_nested_option_chain(&session.access_token, underlying)
                        .await
                },
            )
            .await
            .map_err(|e| not_found_as_invalid(e, || format!("no option chain for {underlying}")))?;

        Ok(OptionChain::from_nested(underlying, nested))
    }
}

fn not_found_as_invalid(error: TradingError, message: impl FnOnce() -> String) -> TradingError {
    match error {
        TradingError::Network {
            source: tastytrade_client::Error::NotFound(_),
            ..
        } => TradingError::InvalidInstrument(message()),
        other => other,
    }
}
