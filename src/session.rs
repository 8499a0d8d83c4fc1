//! Authenticated session with a hard expiry and coalesced refresh.

use crate::config::{Credentials, SessionConfig};
use crate::error::{TradingError, TradingResult};
use crate::rate_limiter::RateLimiter;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tastytrade_client::TastytradeClient;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

/// Exchanges long-lived credentials for short-lived access tokens.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Mints a new access token from the refresh token.
    async fn exchange(
        &self,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<String, tastytrade_client::Error>;

    /// Returns the account to trade when none is configured.
    async fn default_account(
        &self,
        access_token: &str,
    ) -> Result<Option<String>, tastytrade_client::Error>;
}

#[async_trait]
impl TokenExchange for TastytradeClient {
    async fn exchange(
        &self,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<String, tastytrade_client::Error> {
        let grant = self
            .exchange_refresh_token(client_secret, refresh_token)
            .await?;
        Ok(grant.access_token)
    }

    async fn default_account(
        &self,
        access_token: &str,
    ) -> Result<Option<String>, tastytrade_client::Error> {
        let accounts = self.list_accounts(access_token).await?;
        Ok(accounts
            .into_iter()
            .find(|a| !a.is_closed)
            .map(|a| a.account_number))
    }
}

/// A usable access token and the account it trades.
#[derive(Clone)]
pub struct Session {
    /// Bearer token for REST calls.
    pub access_token: String,
    /// Account number.
    pub account_id: String,
    /// When the token stops being accepted.
    pub expires_at: Instant,
    /// Wall-clock time the token was issued, for display.
    pub issued_at: DateTime<Utc>,
}

impl Session {
    /// Returns true if the token can be used for at least `margin` longer.
    #[must_use]
    pub fn is_usable(&self, now: Instant, margin: Duration) -> bool {
        now + margin < self.expires_at
    }

    /// Time left before expiry.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("account_id", &self.account_id)
            .field("expires_at", &self.expires_at)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Owns the process session and refreshes it before it expires.
///
/// Reads take a short read lock. The check-and-refresh sequence runs under
/// an async mutex, so concurrent callers that find the token stale wait for
/// one refresh instead of each starting their own.
pub struct SessionManager {
    exchange: Arc<dyn TokenExchange>,
    credentials: Credentials,
    configured_account: Option<String>,
    lifetime: Duration,
    margin: Duration,
    limiter: Arc<RateLimiter>,
    current: RwLock<Option<Session>>,
    refresh_lock: Mutex<()>,
    refreshes: AtomicU64,
}

impl SessionManager {
    /// Creates a manager with no session yet; the first use refreshes.
    pub fn new(
        exchange: Arc<dyn TokenExchange>,
        credentials: Credentials,
        configured_account: Option<String>,
        config: &SessionConfig,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            exchange,
            credentials,
            configured_account,
            lifetime: config.lifetime(),
            margin: config.safety_margin(),
            limiter,
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Returns a session that stays valid for at least the safety margin.
    ///
    /// Refreshes first when the current token is missing or too close to
    /// expiry. A failed refresh leaves the previous session in place.
    ///
    /// # Errors
    /// Returns `Authentication` if the credentials are rejected and
    /// `Network` if the exchange cannot be completed.
    pub async fn ensure_valid(&self) -> TradingResult<Session> {
        if let Some(session) = self.usable() {
            return Ok(session);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited.
        if let Some(session) = self.usable() {
            return Ok(session);
        }

        self.refresh().await
    }

    /// The stored session, usable or not.
    pub fn current(&self) -> Option<Session> {
        self.current.read().clone()
    }

    /// Number of completed refreshes.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    fn usable(&self) -> Option<Session> {
        let now = Instant::now();
        self.current
            .read()
            .as_ref()
            .filter(|s| s.is_usable(now, self.margin))
            .cloned()
    }

    async fn refresh(&self) -> TradingResult<Session> {
        info!("refreshing session");

        let (access_token, requested_at) = {
            let _permit = self.limiter.acquire().await;
            let requested_at = Instant::now();
            let token = self
                .exchange
                .exchange(
                    &self.credentials.client_secret,
                    &self.credentials.refresh_token,
                )
                .await
                .map_err(|e| {
                    warn!(error = %e, "session refresh failed");
                    refresh_error(e)
                })?;
            (token, requested_at)
        };

        let account_id = match self.known_account() {
            Some(account) => account,
            None => {
                let _permit = self.limiter.acquire().await;
                self.exchange
                    .default_account(&access_token)
                    .await
                    .map_err(|e| TradingError::network("list accounts", e))?
                    .ok_or_else(|| {
                        TradingError::Authentication("no open account on this login".to_string())
                    })?
            }
        };

        let session = Session {
            access_token,
            account_id,
            expires_at: requested_at + self.lifetime,
            issued_at: Utc::now(),
        };
        *self.current.write() = Some(session.clone());
        self.refreshes.fetch_add(1, Ordering::Relaxed);

        info!(
            account = %session.account_id,
            lifetime_secs = self.lifetime.as_secs(),
            "session refreshed"
        );
        Ok(session)
    }

    fn known_account(&self) -> Option<String> {
        self.configured_account.clone().or_else(|| {
            self.current
                .read()
                .as_ref()
                .map(|s| s.account_id.clone())
        })
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("credentials", &self.credentials)
            .field("configured_account", &self.configured_account)
            .field("lifetime", &self.lifetime)
            .field("margin", &self.margin)
            .field("current", &*self.current.read())
            .finish_non_exhaustive()
    }
}

fn refresh_error(e: tastytrade_client::Error) -> TradingError {
    if e.is_auth_rejection() {
        TradingError::Authentication(e.to_string())
    } else {
        TradingError::network("session refresh", e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct FakeExchange {
        exchanges: AtomicU64,
        account_lookups: AtomicU64,
        reject: AtomicBool,
        offline: AtomicBool,
    }

    #[async_trait]
    impl TokenExchange for FakeExchange {
        async fn exchange(
            &self,
            _client_secret: &str,
            _refresh_token: &str,
        ) -> Result<String, tastytrade_client::Error> {
            // Give concurrent callers a chance to pile up behind the refresh.
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.reject.load(Ordering::SeqCst) {
                return Err(tastytrade_client::Error::Unauthorized(
                    "invalid_grant".to_string(),
                ));
            }
            if self.offline.load(Ordering::SeqCst) {
                return Err(tastytrade_client::Error::ConnectionClosed);
            }
            let n = self.exchanges.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("access-{n}"))
        }

        async fn default_account(
            &self,
            _access_token: &str,
        ) -> Result<Option<String>, tastytrade_client::Error> {
            self.account_lookups.fetch_add(1, Ordering::SeqCst);
            Ok(Some("5WT00001".to_string()))
        }
    }

    fn manager(exchange: Arc<FakeExchange>, account: Option<&str>) -> SessionManager {
        SessionManager::new(
            exchange,
            Credentials {
                client_secret: "secret".to_string(),
                refresh_token: "refresh".to_string(),
            },
            account.map(str::to_string),
            &SessionConfig::default(),
            Arc::new(RateLimiter::new(100, Duration::from_secs(1))),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_use_refreshes() {
        let exchange = Arc::new(FakeExchange::default());
        let sessions = manager(Arc::clone(&exchange), None);

        let session = sessions.ensure_valid().await.unwrap();

        assert_eq!(session.access_token, "access-1");
        assert_eq!(session.account_id, "5WT00001");
        assert_eq!(exchange.exchanges.load(Ordering::SeqCst), 1);
        assert_eq!(sessions.refresh_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_valid_session_is_reused() {
        let exchange = Arc::new(FakeExchange::default());
        let sessions = manager(Arc::clone(&exchange), None);

        sessions.ensure_valid().await.unwrap();
        tokio::time::advance(Duration::from_secs(600)).await;
        let session = sessions.ensure_valid().await.unwrap();

        assert_eq!(session.access_token, "access-1");
        assert_eq!(exchange.exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_inside_safety_margin() {
        let exchange = Arc::new(FakeExchange::default());
        let sessions = manager(Arc::clone(&exchange), None);

        sessions.ensure_valid().await.unwrap();
        // 900s lifetime, 60s margin: at 841s only 59s remain.
        tokio::time::advance(Duration::from_secs(841)).await;
        let session = sessions.ensure_valid().await.unwrap();

        assert_eq!(session.access_token, "access-2");
        assert!(session.remaining() > Duration::from_secs(899));
        // The account is looked up once, not on every refresh.
        assert_eq!(exchange.account_lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_refresh() {
        let exchange = Arc::new(FakeExchange::default());
        let sessions = Arc::new(manager(Arc::clone(&exchange), Some("5WT00002")));

        for crossing in 1..=3u64 {
            let mut handles = Vec::new();
            for _ in 0..16 {
                let sessions = Arc::clone(&sessions);
                handles.push(tokio::spawn(async move {
                    sessions.ensure_valid().await.map(|s| s.access_token)
                }));
            }
            for handle in handles {
                let token = handle.await.unwrap().unwrap();
                assert_eq!(token, format!("access-{crossing}"));
            }
            assert_eq!(exchange.exchanges.load(Ordering::SeqCst), crossing);

            tokio::time::advance(Duration::from_secs(900)).await;
        }

        assert_eq!(exchange.account_lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_refresh_is_authentication_error() {
        let exchange = Arc::new(FakeExchange::default());
        exchange.reject.store(true, Ordering::SeqCst);
        let sessions = manager(Arc::clone(&exchange), None);

        let result = sessions.ensure_valid().await;

        assert!(matches!(result, Err(TradingError::Authentication(_))));
        assert!(sessions.current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_last_session() {
        let exchange = Arc::new(FakeExchange::default());
        let sessions = manager(Arc::clone(&exchange), None);
        sessions.ensure_valid().await.unwrap();

        exchange.offline.store(true, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(900)).await;
        let result = sessions.ensure_valid().await;

        assert!(matches!(result, Err(TradingError::Network { .. })));
        let stale = sessions.current().unwrap();
        assert_eq!(stale.access_token, "access-1");

        // Not retried behind the caller's back.
        exchange.offline.store(false, Ordering::SeqCst);
        assert_eq!(exchange.exchanges.load(Ordering::SeqCst), 1);
        let session = sessions.ensure_valid().await.unwrap();
        assert_eq!(session.access_token, "access-2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_counts_from_request_time() {
        let exchange = Arc::new(FakeExchange::default());
        let sessions = manager(Arc::clone(&exchange), Some("5WT00001"));
        let start = Instant::now();

        let session = sessions.ensure_valid().await.unwrap();

        assert_eq!(session.expires_at, start + Duration::from_secs(900));
    }

    #[test]
    fn test_session_debug_redacts_token() {
        let session = Session {
            access_token: "very-secret".to_string(),
            account_id: "5WT00001".to_string(),
            expires_at: Instant::now(),
            issued_at: Utc::now(),
        };

        let debug = format!("{:?}", session);
        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("5WT00001"));
    }
}
