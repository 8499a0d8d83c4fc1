//! Error types for the trading core.

use crate::config::ConfigError;
use thiserror::Error;

#[cfg(test)]
mod tests;

/// Trading core error types.
///
/// Rate limiting never fails a call, so there is no variant for it. A
/// partially collected snapshot is a result, not an error.
#[derive(Debug, Error)]
pub enum TradingError {
    /// The refresh exchange was rejected or no usable account exists.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The instrument description is malformed or matches nothing.
    #[error("Invalid instrument: {0}")]
    InvalidInstrument(String),

    /// The option chain holds more than one entry for the description.
    #[error("Ambiguous instrument: {0}")]
    AmbiguousInstrument(String),

    /// The order is malformed.
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// A leg has no usable quote in the collected snapshot.
    #[error("Missing quote for {0}")]
    MissingQuote(String),

    /// A call to the brokerage API failed.
    #[error("{operation} failed: {source}")]
    Network {
        /// Operation that failed, with the symbol or account involved.
        operation: String,
        /// Underlying client error.
        #[source]
        source: tastytrade_client::Error,
    },

    /// The streaming connection failed.
    #[error("Stream error: {0}")]
    Stream(String),

    /// Configuration is missing or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl TradingError {
    /// Wraps a client error with the operation that produced it.
    pub fn network(operation: impl Into<String>, source: tastytrade_client::Error) -> Self {
        Self::Network {
            operation: operation.into(),
            source,
        }
    }

    /// Returns true for errors caused by caller input rather than the remote side.
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInstrument(_) | Self::AmbiguousInstrument(_) | Self::InvalidOrder(_)
        )
    }

    /// Returns true when retrying the same call later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { source, .. } => source.is_transient(),
            Self::Stream(_) => true,
            _ => false,
        }
    }
}

/// Result alias for the trading core.
pub type TradingResult<T> = Result<T, TradingError>;
