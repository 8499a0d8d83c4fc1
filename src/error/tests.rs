//! Unit tests for error module.

use super::*;

// ============================================================================
// Display Tests
// ============================================================================

#[test]
fn test_invalid_instrument_display() {
    let error = TradingError::InvalidInstrument("strike must be positive".to_string());
    assert_eq!(
        format!("{}", error),
        "Invalid instrument: strike must be positive"
    );
}

#[test]
fn test_missing_quote_display() {
    let error = TradingError::MissingQuote(".AAPL241220C150".to_string());
    assert_eq!(format!("{}", error), "Missing quote for .AAPL241220C150");
}

#[test]
fn test_network_display_carries_operation() {
    let error = TradingError::network(
        "get balances for 5WT00001",
        tastytrade_client::Error::NotFound("account".to_string()),
    );
    assert_eq!(
        format!("{}", error),
        "get balances for 5WT00001 failed: not found: account"
    );
}

#[test]
fn test_network_exposes_source() {
    use std::error::Error as _;

    let error = TradingError::network("list accounts", tastytrade_client::Error::ConnectionClosed);
    assert!(error.source().is_some());
}

#[test]
fn test_config_error_is_transparent() {
    let error: TradingError = ConfigError::MissingVar("TASTYTRADE_REFRESH_TOKEN").into();
    assert_eq!(
        format!("{}", error),
        "missing environment variable: TASTYTRADE_REFRESH_TOKEN"
    );
}

// ============================================================================
// Classification Tests
// ============================================================================

#[test]
fn test_user_errors() {
    assert!(TradingError::InvalidInstrument("x".to_string()).is_user_error());
    assert!(TradingError::AmbiguousInstrument("x".to_string()).is_user_error());
    assert!(TradingError::InvalidOrder("x".to_string()).is_user_error());
    assert!(!TradingError::MissingQuote("x".to_string()).is_user_error());
    assert!(!TradingError::Authentication("x".to_string()).is_user_error());
    assert!(!TradingError::Stream("x".to_string()).is_user_error());
}

#[test]
fn test_transient_errors() {
    let throttled = TradingError::network(
        "get positions",
        tastytrade_client::Error::RateLimited {
            retry_after_secs: Some(1),
        },
    );
    assert!(throttled.is_transient());
    assert!(TradingError::Stream("socket reset".to_string()).is_transient());
    assert!(!TradingError::Authentication("invalid_grant".to_string()).is_transient());
    assert!(!TradingError::MissingQuote("SPY".to_string()).is_transient());
}
