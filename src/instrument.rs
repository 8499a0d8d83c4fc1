//! Instrument resolution.
//!
//! Turns a user description of a stock or option into the identity the
//! order endpoints and the streaming feed understand. Option resolution
//! goes through a per-underlying option chain cache.

use crate::cache::TtlCache;
use crate::error::{TradingError, TradingResult};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tastytrade_client::{Equity, InstrumentType, NestedOptionChain};
use tracing::debug;

/// Call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OptionType {
    /// Call option.
    Call,
    /// Put option.
    Put,
}

impl OptionType {
    /// One-letter code used in option symbols.
    #[must_use]
    pub const fn code(&self) -> char {
        match self {
            Self::Call => 'C',
            Self::Put => 'P',
        }
    }
}

impl FromStr for OptionType {
    type Err = TradingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "c" | "call" => Ok(Self::Call),
            "p" | "put" => Ok(Self::Put),
            _ => Err(TradingError::InvalidInstrument(format!(
                "Invalid option type: {s}. Use 'C' or 'P'"
            ))),
        }
    }
}

impl TryFrom<String> for OptionType {
    type Error = TradingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OptionType> for String {
    fn from(value: OptionType) -> Self {
        value.code().to_string()
    }
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "call"),
            Self::Put => write!(f, "put"),
        }
    }
}

/// User description of an instrument.
///
/// A stock spec carries only the symbol. An option spec carries all of
/// type, strike and expiration; expiration is `YYYY-MM-DD`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    /// Stock symbol or option underlying.
    pub symbol: String,
    /// Option type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_type: Option<OptionType>,
    /// Strike price.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strike: Option<Decimal>,
    /// Expiration date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,
}

impl InstrumentSpec {
    /// Describes a stock.
    #[must_use]
    pub fn stock(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            option_type: None,
            strike: None,
            expiration: None,
        }
    }

    /// Describes an option.
    #[must_use]
    pub fn option(
        underlying: impl Into<String>,
        option_type: OptionType,
        strike: Decimal,
        expiration: impl Into<String>,
    ) -> Self {
        Self {
            symbol: underlying.into(),
            option_type: Some(option_type),
            strike: Some(strike),
            expiration: Some(expiration.into()),
        }
    }

    /// Checks the spec and returns the option fields, if any.
    ///
    /// # Errors
    /// Returns `InvalidInstrument` for an empty symbol, partially given
    /// option fields, a non-positive strike or a malformed date.
    pub fn validate(&self) -> TradingResult<Option<OptionKey>> {
        if self.symbol.trim().is_empty() {
            return Err(TradingError::InvalidInstrument(
                "symbol cannot be empty".to_string(),
            ));
        }

        match (self.option_type, self.strike, self.expiration.as_deref()) {
            (None, None, None) => Ok(None),
            (Some(option_type), Some(strike), Some(expiration)) => {
                if strike <= Decimal::ZERO {
                    return Err(TradingError::InvalidInstrument(format!(
                        "strike must be positive, got {strike}"
                    )));
                }
                let expiration = NaiveDate::parse_from_str(expiration.trim(), "%Y-%m-%d")
                    .map_err(|_| {
                        TradingError::InvalidInstrument(format!(
                            "expiration {expiration} is not a valid YYYY-MM-DD date"
                        ))
                    })?;
                Ok(Some(OptionKey {
                    option_type,
                    strike,
                    expiration,
                }))
            }
            _ => Err(TradingError::InvalidInstrument(
                "option_type, strike and expiration must be given together".to_string(),
            )),
        }
    }
}

/// Validated option fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OptionKey {
    /// Call or put.
    pub option_type: OptionType,
    /// Strike price.
    pub strike: Decimal,
    /// Expiration date.
    pub expiration: NaiveDate,
}

impl std::fmt::Display for OptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.expiration, self.strike, self.option_type)
    }
}

/// Resolved, streamer-addressable instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrumentIdentity {
    /// Order symbol (OCC format for options).
    pub symbol: String,
    /// Symbol on the market-data feed.
    pub streamer_symbol: String,
    /// Instrument type.
    pub instrument_type: InstrumentType,
    /// Underlying symbol.
    pub underlying: String,
}

impl InstrumentIdentity {
    /// Returns true for options.
    #[must_use]
    pub fn is_option(&self) -> bool {
        matches!(
            self.instrument_type,
            InstrumentType::EquityOption | InstrumentType::FutureOption
        )
    }
}

/// One listed option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEntry {
    /// OCC symbol.
    pub symbol: String,
    /// Feed symbol.
    pub streamer_symbol: String,
    /// Call or put.
    pub option_type: OptionType,
    /// Strike price.
    pub strike: Decimal,
    /// Expiration date.
    pub expiration: NaiveDate,
}

/// Flattened option chain for one underlying.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionChain {
    /// Underlying symbol.
    pub underlying: String,
    /// Listed options.
    pub entries: Vec<ChainEntry>,
}

impl OptionChain {
    /// Flattens nested chains into one entry per call and put.
    #[must_use]
    pub fn from_nested(underlying: &str, chains: Vec<NestedOptionChain>) -> Self {
        let mut entries = Vec::new();
        for chain in chains {
            for expiration in chain.expirations {
                for strike in expiration.strikes {
                    entries.push(ChainEntry {
                        symbol: strike.call,
                        streamer_symbol: strike.call_streamer_symbol,
                        option_type: OptionType::Call,
                        strike: strike.strike_price,
                        expiration: expiration.expiration_date,
                    });
                    entries.push(ChainEntry {
                        symbol: strike.put,
                        streamer_symbol: strike.put_streamer_symbol,
                        option_type: OptionType::Put,
                        strike: strike.strike_price,
                        expiration: expiration.expiration_date,
                    });
                }
            }
        }
        Self {
            underlying: underlying.to_string(),
            entries,
        }
    }

    /// Entries matching type, strike and expiration.
    pub fn matching<'a>(&'a self, key: &'a OptionKey) -> impl Iterator<Item = &'a ChainEntry> {
        self.entries.iter().filter(move |e| {
            e.option_type == key.option_type
                && e.strike == key.strike
                && e.expiration == key.expiration
        })
    }

    /// Listed expirations, ascending.
    #[must_use]
    pub fn expirations(&self) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = self.entries.iter().map(|e| e.expiration).collect();
        dates.sort_unstable();
        dates.dedup();
        dates
    }
}

/// Source of instrument metadata.
#[async_trait]
pub trait InstrumentSource: Send + Sync {
    /// Looks up an equity by symbol.
    async fn equity(&self, symbol: &str) -> TradingResult<Equity>;

    /// Fetches the full option chain of an underlying.
    async fn option_chain(&self, underlying: &str) -> TradingResult<OptionChain>;
}

/// Resolves instrument specs, caching option chains per underlying.
pub struct InstrumentResolver {
    source: Arc<dyn InstrumentSource>,
    chains: TtlCache<String, Arc<OptionChain>>,
}

impl InstrumentResolver {
    /// Creates a resolver whose chains stay cached for `chain_ttl`.
    pub fn new(source: Arc<dyn InstrumentSource>, chain_ttl: Duration) -> Self {
        Self {
            source,
            chains: TtlCache::new(chain_ttl),
        }
    }

    /// Resolves one spec.
    ///
    /// Stocks are looked up directly. Options are matched against the
    /// cached chain of their underlying and must match exactly one entry.
    ///
    /// # Errors
    /// Returns `InvalidInstrument` when the spec is malformed or matches
    /// nothing, `AmbiguousInstrument` when it matches several entries, and
    /// any error from the instrument source.
    pub async fn resolve(&self, spec: &InstrumentSpec) -> TradingResult<InstrumentIdentity> {
        let underlying = spec.symbol.trim().to_uppercase();

        let Some(key) = spec.validate()? else {
            let equity = self.source.equity(&underlying).await?;
            return Ok(InstrumentIdentity {
                symbol: equity.symbol.clone(),
                streamer_symbol: equity.streamer_symbol,
                instrument_type: InstrumentType::Equity,
                underlying: equity.symbol,
            });
        };

        let chain = self.chain(&underlying).await?;
        let mut matches = chain.matching(&key);
        let entry = matches.next().ok_or_else(|| {
            TradingError::InvalidInstrument(format!("no {key} option listed for {underlying}"))
        })?;
        if matches.next().is_some() {
            return Err(TradingError::AmbiguousInstrument(format!(
                "{underlying} chain lists {key} more than once"
            )));
        }

        debug!(%underlying, %key, symbol = %entry.symbol, "resolved option");
        Ok(InstrumentIdentity {
            symbol: entry.symbol.clone(),
            streamer_symbol: entry.streamer_symbol.clone(),
            instrument_type: InstrumentType::EquityOption,
            underlying,
        })
    }

    /// Resolves several specs in order.
    ///
    /// # Errors
    /// Returns the first resolution error.
    pub async fn resolve_all(
        &self,
        specs: &[InstrumentSpec],
    ) -> TradingResult<Vec<InstrumentIdentity>> {
        let mut resolved = Vec::with_capacity(specs.len());
        for spec in specs {
            resolved.push(self.resolve(spec).await?);
        }
        Ok(resolved)
    }

    /// Returns the option chain of `underlying`, fetching it on a miss.
    ///
    /// # Errors
    /// Returns any error from the instrument source.
    pub async fn chain(&self, underlying: &str) -> TradingResult<Arc<OptionChain>> {
        let key = underlying.trim().to_uppercase();
        let ttl = self.chains.default_ttl();
        self.chains
            .get_or_compute(key.clone(), ttl, || async {
                let chain = self.source.option_chain(&key).await?;
                debug!(underlying = %key, entries = chain.entries.len(), "fetched option chain");
                Ok::<_, TradingError>(Arc::new(chain))
            })
            .await
    }

    /// Drops the cached chain of `underlying`.
    pub fn invalidate_chain(&self, underlying: &str) {
        self.chains.invalidate(&underlying.trim().to_uppercase());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn entry(option_type: OptionType, strike: Decimal, expiration: &str) -> ChainEntry {
        let code = option_type.code();
        let compact = expiration.replace('-', "");
        ChainEntry {
            symbol: format!("AAPL  {}{}{}", &compact[2..], code, strike),
            streamer_symbol: format!(".AAPL{}{}{}", &compact[2..], code, strike.normalize()),
            option_type,
            strike,
            expiration: date(expiration),
        }
    }

    #[derive(Default)]
    struct FakeSource {
        chain_fetches: AtomicUsize,
        equity_lookups: AtomicUsize,
        duplicate: bool,
    }

    #[async_trait]
    impl InstrumentSource for FakeSource {
        async fn equity(&self, symbol: &str) -> TradingResult<Equity> {
            self.equity_lookups.fetch_add(1, Ordering::SeqCst);
            if symbol != "AAPL" {
                return Err(TradingError::InvalidInstrument(format!("unknown symbol {symbol}")));
            }
            Ok(Equity {
                symbol: "AAPL".to_string(),
                streamer_symbol: "AAPL".to_string(),
                description: None,
                is_etf: false,
            })
        }

        async fn option_chain(&self, underlying: &str) -> TradingResult<OptionChain> {
            self.chain_fetches.fetch_add(1, Ordering::SeqCst);
            let mut entries = vec![
                entry(OptionType::Call, dec!(145), "2024-12-20"),
                entry(OptionType::Put, dec!(145), "2024-12-20"),
                entry(OptionType::Call, dec!(150), "2024-12-20"),
                entry(OptionType::Put, dec!(150), "2024-12-20"),
                entry(OptionType::Call, dec!(150), "2025-01-17"),
            ];
            if self.duplicate {
                entries.push(entry(OptionType::Call, dec!(150), "2024-12-20"));
            }
            Ok(OptionChain {
                underlying: underlying.to_string(),
                entries,
            })
        }
    }

    fn resolver(source: Arc<FakeSource>) -> InstrumentResolver {
        InstrumentResolver::new(source, Duration::from_secs(86_400))
    }

    fn aapl_call(strike: Decimal) -> InstrumentSpec {
        InstrumentSpec::option("AAPL", OptionType::Call, strike, "2024-12-20")
    }

    // ========================================================================
    // OptionType
    // ========================================================================

    #[test]
    fn test_option_type_parsing() {
        assert_eq!("C".parse::<OptionType>().unwrap(), OptionType::Call);
        assert_eq!("call".parse::<OptionType>().unwrap(), OptionType::Call);
        assert_eq!("P".parse::<OptionType>().unwrap(), OptionType::Put);
        assert_eq!("Put".parse::<OptionType>().unwrap(), OptionType::Put);
        assert!("X".parse::<OptionType>().is_err());
    }

    #[test]
    fn test_spec_deserializes_from_tool_arguments() {
        let json = r#"{"symbol": "AAPL", "option_type": "C", "strike": 150.0, "expiration": "2024-12-20"}"#;

        let spec: InstrumentSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.option_type, Some(OptionType::Call));
        assert_eq!(spec.strike, Some(dec!(150)));
    }

    // ========================================================================
    // Validation
    // ========================================================================

    #[test]
    fn test_partial_option_fields_rejected() {
        let spec = InstrumentSpec {
            symbol: "AAPL".to_string(),
            option_type: Some(OptionType::Call),
            strike: Some(dec!(150)),
            expiration: None,
        };
        assert!(matches!(spec.validate(), Err(TradingError::InvalidInstrument(_))));

        let spec = InstrumentSpec {
            symbol: "AAPL".to_string(),
            option_type: None,
            strike: Some(dec!(150)),
            expiration: Some("2024-12-20".to_string()),
        };
        assert!(matches!(spec.validate(), Err(TradingError::InvalidInstrument(_))));
    }

    #[test]
    fn test_non_positive_strike_rejected() {
        assert!(matches!(
            aapl_call(dec!(0)).validate(),
            Err(TradingError::InvalidInstrument(_))
        ));
        assert!(matches!(
            aapl_call(dec!(-5)).validate(),
            Err(TradingError::InvalidInstrument(_))
        ));
    }

    #[test]
    fn test_invalid_calendar_date_rejected() {
        let spec = InstrumentSpec::option("AAPL", OptionType::Put, dec!(150), "2024-02-30");
        assert!(matches!(spec.validate(), Err(TradingError::InvalidInstrument(_))));
    }

    #[test]
    fn test_empty_symbol_rejected() {
        assert!(InstrumentSpec::stock("  ").validate().is_err());
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    #[tokio::test]
    async fn test_resolves_unique_option() {
        let source = Arc::new(FakeSource::default());
        let resolver = resolver(Arc::clone(&source));

        let identity = resolver.resolve(&aapl_call(dec!(150.0))).await.unwrap();

        assert_eq!(identity.streamer_symbol, ".AAPL241220C150");
        assert_eq!(identity.instrument_type, InstrumentType::EquityOption);
        assert_eq!(identity.underlying, "AAPL");
        assert!(identity.is_option());
    }

    #[tokio::test]
    async fn test_unmatched_strike_is_invalid() {
        let source = Arc::new(FakeSource::default());
        let resolver = resolver(Arc::clone(&source));

        let result = resolver.resolve(&aapl_call(dec!(152.5))).await;

        assert!(matches!(result, Err(TradingError::InvalidInstrument(_))));
    }

    #[tokio::test]
    async fn test_duplicate_entries_are_ambiguous() {
        let source = Arc::new(FakeSource {
            duplicate: true,
            ..Default::default()
        });
        let resolver = resolver(Arc::clone(&source));

        let result = resolver.resolve(&aapl_call(dec!(150))).await;

        assert!(matches!(result, Err(TradingError::AmbiguousInstrument(_))));
    }

    #[tokio::test]
    async fn test_repeated_resolution_fetches_chain_once() {
        let source = Arc::new(FakeSource::default());
        let resolver = resolver(Arc::clone(&source));

        resolver.resolve(&aapl_call(dec!(150))).await.unwrap();
        resolver.resolve(&aapl_call(dec!(150))).await.unwrap();
        let put = InstrumentSpec::option("aapl", OptionType::Put, dec!(145), "2024-12-20");
        resolver.resolve(&put).await.unwrap();

        assert_eq!(source.chain_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chain_refetched_after_ttl() {
        let source = Arc::new(FakeSource::default());
        let resolver = resolver(Arc::clone(&source));

        resolver.resolve(&aapl_call(dec!(150))).await.unwrap();
        tokio::time::advance(Duration::from_secs(86_400)).await;
        resolver.resolve(&aapl_call(dec!(150))).await.unwrap();

        assert_eq!(source.chain_fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stock_resolution_skips_chain() {
        let source = Arc::new(FakeSource::default());
        let resolver = resolver(Arc::clone(&source));

        let identity = resolver.resolve(&InstrumentSpec::stock("aapl")).await.unwrap();

        assert_eq!(identity.symbol, "AAPL");
        assert_eq!(identity.instrument_type, InstrumentType::Equity);
        assert!(!identity.is_option());
        assert_eq!(source.chain_fetches.load(Ordering::SeqCst), 0);
        assert_eq!(source.equity_lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_spec_fails_before_any_lookup() {
        let source = Arc::new(FakeSource::default());
        let resolver = resolver(Arc::clone(&source));

        let result = resolver.resolve(&aapl_call(dec!(-1))).await;

        assert!(result.is_err());
        assert_eq!(source.chain_fetches.load(Ordering::SeqCst), 0);
        assert_eq!(source.equity_lookups.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_from_nested_flattens_calls_and_puts() {
        let json = r#"[{
            "underlying-symbol": "AAPL", "root-symbol": "AAPL",
            "expirations": [{
                "expiration-date": "2024-12-20",
                "strikes": [
                    {"strike-price": "150.0", "call": "AAPL  241220C00150000", "call-streamer-symbol": ".AAPL241220C150",
                     "put": "AAPL  241220P00150000", "put-streamer-symbol": ".AAPL241220P150"},
                    {"strike-price": "155.0", "call": "AAPL  241220C00155000", "call-streamer-symbol": ".AAPL241220C155",
                     "put": "AAPL  241220P00155000", "put-streamer-symbol": ".AAPL241220P155"}
                ]
            }]
        }]"#;
        let nested: Vec<NestedOptionChain> = serde_json::from_str(json).unwrap();

        let chain = OptionChain::from_nested("AAPL", nested);

        assert_eq!(chain.entries.len(), 4);
        assert_eq!(chain.expirations(), vec![date("2024-12-20")]);
        let key = OptionKey {
            option_type: OptionType::Put,
            strike: dec!(155),
            expiration: date("2024-12-20"),
        };
        let found: Vec<_> = chain.matching(&key).collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].streamer_symbol, ".AAPL241220P155");
    }
}
