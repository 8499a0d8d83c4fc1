//! Shared trading context.
//!
//! Owns one instance of every shared component and hands references to the
//! operations that need them. Nothing here is a process global; tests build
//! as many contexts as they like.

use crate::config::{Config, Settings};
use crate::error::{TradingError, TradingResult};
use crate::instrument::{
    InstrumentIdentity, InstrumentResolver, InstrumentSource, InstrumentSpec,
};
use crate::pricing::{NetPrice, OrderLeg, PriceCalculator};
use crate::rate_limiter::RateLimiter;
use crate::remote::RemoteApi;
use crate::session::{Session, SessionManager};
use crate::streaming::{
    CollectedSnapshot, DxLinkConnector, EventKind, FeedConnector, QuoteCollector,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tastytrade_client::{
    Action, ClientConfig, NewOrder, PlacedOrderResponse, TastytradeClient, TimeInForce,
};
use tracing::{info, warn};

/// Unresolved order leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegSpec {
    /// Instrument description.
    pub instrument: InstrumentSpec,
    /// Side.
    pub action: Action,
    /// Contracts or shares.
    pub quantity: u32,
}

/// Everything the trading operations share.
///
/// Cheap to clone; clones share the session, the rate limiter and the
/// caches.
#[derive(Clone)]
pub struct TradingContext {
    /// Session-guarded brokerage access.
    pub api: RemoteApi,
    /// Instrument resolution with the chain cache.
    pub resolver: Arc<InstrumentResolver>,
    /// Quote and greeks collection.
    pub collector: Arc<QuoteCollector>,
    /// Net price calculation.
    pub pricer: PriceCalculator,
}

impl TradingContext {
    /// Builds a live context from configuration.
    ///
    /// No network traffic happens here; the session is established on
    /// first use.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> TradingResult<Self> {
        let settings = &config.settings;
        let client = TastytradeClient::new(ClientConfig {
            base_url: settings.api.base_url.clone(),
            timeout: settings.api.timeout(),
        })
        .map_err(|e| TradingError::network("build http client", e))?;

        let limiter = Arc::new(RateLimiter::from_config(&settings.rate_limit));
        let sessions = Arc::new(SessionManager::new(
            Arc::new(client.clone()),
            config.credentials.clone(),
            config.account_id.clone(),
            &settings.session,
            Arc::clone(&limiter),
        ));
        let api = RemoteApi::new(client, sessions, limiter);

        let source: Arc<dyn InstrumentSource> = Arc::new(api.clone());
        let connector: Arc<dyn FeedConnector> = Arc::new(DxLinkConnector::new(
            api.clone(),
            settings.cache.quote_token_ttl(),
        ));

        info!(
            base_url = %settings.api.base_url,
            capacity = settings.rate_limit.capacity,
            "trading context ready"
        );
        Ok(Self::from_parts(api, source, connector, settings))
    }

    /// Assembles a context around the given instrument source and feed
    /// connector.
    pub fn from_parts(
        api: RemoteApi,
        source: Arc<dyn InstrumentSource>,
        connector: Arc<dyn FeedConnector>,
        settings: &Settings,
    ) -> Self {
        Self {
            api,
            resolver: Arc::new(InstrumentResolver::new(source, settings.cache.chain_ttl())),
            collector: Arc::new(QuoteCollector::new(connector, settings.streaming.timeout())),
            pricer: PriceCalculator::new(settings.pricing.tick),
        }
    }

    /// Returns a valid session, refreshing it if needed.
    ///
    /// # Errors
    /// Returns `Authentication` or `Network` if a refresh fails.
    pub async fn session(&self) -> TradingResult<Session> {
        self.api.sessions().ensure_valid().await
    }

    /// Session manager.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        self.api.sessions()
    }

    /// Resolves one instrument.
    ///
    /// # Errors
    /// See [`InstrumentResolver::resolve`].
    pub async fn resolve(&self, spec: &InstrumentSpec) -> TradingResult<InstrumentIdentity> {
        self.resolver.resolve(spec).await
    }

    /// Resolves instruments and collects one event kind for them.
    ///
    /// # Errors
    /// Returns the first resolution error or a stream error.
    pub async fn collect_quotes(
        &self,
        specs: &[InstrumentSpec],
        kind: EventKind,
        timeout: Option<Duration>,
    ) -> TradingResult<CollectedSnapshot> {
        let instruments = self.resolver.resolve_all(specs).await?;
        self.collector.collect(&instruments, kind, timeout).await
    }

    /// Resolves legs, collects their quotes and computes the net price.
    ///
    /// # Errors
    /// Returns `InvalidOrder` for malformed legs, resolution errors, and
    /// `MissingQuote` when any leg received no quote before the deadline.
    pub async fn price_order(
        &self,
        legs: &[LegSpec],
        timeout: Option<Duration>,
    ) -> TradingResult<NetPrice> {
        if legs.is_empty() {
            return Err(TradingError::InvalidOrder(
                "order must have at least one leg".to_string(),
            ));
        }

        let specs: Vec<InstrumentSpec> = legs.iter().map(|l| l.instrument.clone()).collect();
        let instruments = self.resolver.resolve_all(&specs).await?;
        let order_legs: Vec<OrderLeg> = legs
            .iter()
            .zip(instruments)
            .map(|(spec, instrument)| OrderLeg::new(instrument, spec.action, spec.quantity))
            .collect();
        for leg in &order_legs {
            leg.validate()?;
        }

        let identities: Vec<InstrumentIdentity> =
            order_legs.iter().map(|l| l.instrument.clone()).collect();
        let snapshot = self
            .collector
            .collect(&identities, EventKind::Quote, timeout)
            .await?;
        if !snapshot.is_complete() {
            warn!(missing = ?snapshot.missing(), "cannot price order without every quote");
        }

        self.pricer.net_price_from_snapshot(&order_legs, &snapshot)
    }

    /// Prices legs and builds the matching limit order request.
    ///
    /// # Errors
    /// See [`TradingContext::price_order`].
    pub async fn build_limit_order(
        &self,
        legs: &[LegSpec],
        time_in_force: TimeInForce,
        timeout: Option<Duration>,
    ) -> TradingResult<(NetPrice, NewOrder)> {
        let net = self.price_order(legs, timeout).await?;
        let order = net.to_limit_order(time_in_force);
        Ok((net, order))
    }

    /// Prices legs and submits a limit order at the net price.
    ///
    /// # Errors
    /// See [`TradingContext::price_order`]; the brokerage may also reject
    /// the order.
    pub async fn place_limit_order(
        &self,
        legs: &[LegSpec],
        time_in_force: TimeInForce,
        dry_run: bool,
    ) -> TradingResult<(NetPrice, PlacedOrderResponse)> {
        let (net, order) = self.build_limit_order(legs, time_in_force, None).await?;
        info!(price = %net, legs = order.legs.len(), dry_run, "submitting limit order");
        let placed = self.api.place_order(&order, dry_run).await?;
        Ok((net, placed))
    }
}

impl std::fmt::Debug for TradingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradingContext")
            .field("api", &self.api)
            .field("pricer", &self.pricer)
            .finish_non_exhaustive()
    }
}
