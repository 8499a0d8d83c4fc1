//! Unit tests for the DXLink module.

use super::*;
use chrono::TimeZone;
use rust_decimal_macros::dec;
use serde_json::json;

fn at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 15, 30, 0).unwrap()
}

// ============================================================================
// Decoding Tests
// ============================================================================

#[test]
fn test_decode_compact_quotes() {
    let data = vec![
        json!("Quote"),
        json!([
            "Quote", "AAPL", 189.5, 189.6, 300, 200,
            "Quote", ".AAPL241220C150", "2.05", "2.15", 10, 12
        ]),
    ];

    let events = decode_feed_data(&data, at());
    assert_eq!(events.len(), 2);

    let FeedEvent::Quote(first) = &events[0] else {
        panic!("expected quote");
    };
    assert_eq!(first.event_symbol, "AAPL");
    assert_eq!(first.bid_price, Some(dec!(189.5)));
    assert_eq!(first.ask_price, Some(dec!(189.6)));
    assert_eq!(first.received_at, at());

    assert_eq!(events[1].symbol(), ".AAPL241220C150");
    assert_eq!(events[1].kind(), EventKind::Quote);
}

#[test]
fn test_decode_compact_nan_fields_are_absent() {
    let data = vec![
        json!("Quote"),
        json!(["Quote", "SPY", "NaN", 501.25, null, ""]),
    ];

    let events = decode_feed_data(&data, at());
    let FeedEvent::Quote(quote) = &events[0] else {
        panic!("expected quote");
    };
    assert_eq!(quote.bid_price, None);
    assert_eq!(quote.ask_price, Some(dec!(501.25)));
    assert_eq!(quote.bid_size, None);
    assert_eq!(quote.ask_size, None);
    assert_eq!(quote.midpoint(), None);
}

#[test]
fn test_decode_compact_truncated_record_skipped() {
    let data = vec![
        json!("Quote"),
        json!(["Quote", "SPY", 1.0, 2.0, 3, 4, "Quote", "QQQ", 1.0]),
    ];

    let events = decode_feed_data(&data, at());
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].symbol(), "SPY");
}

#[test]
fn test_decode_compact_greeks() {
    let data = vec![
        json!("Greeks"),
        json!([
            "Greeks", ".SPY240315P500", 1709307000000_i64, 3.1, 0.18, -0.42, 0.03, -0.11, -0.02, 0.25
        ]),
    ];

    let events = decode_feed_data(&data, at());
    let FeedEvent::Greeks(greeks) = &events[0] else {
        panic!("expected greeks");
    };
    assert_eq!(greeks.event_symbol, ".SPY240315P500");
    assert_eq!(greeks.time, Some(1_709_307_000_000));
    assert_eq!(greeks.delta, Some(-0.42));
    assert_eq!(greeks.vega, Some(0.25));
}

#[test]
fn test_decode_compact_mixed_kinds() {
    let data = vec![
        json!("Quote"),
        json!(["Quote", "SPY", 1.0, 2.0, 3, 4]),
        json!("Greeks"),
        json!(["Greeks", ".SPY1", 0, 1.0, 0.2, 0.5, 0.1, -0.1, 0.0, 0.3]),
    ];

    let kinds: Vec<EventKind> = decode_feed_data(&data, at())
        .iter()
        .map(FeedEvent::kind)
        .collect();
    assert_eq!(kinds, vec![EventKind::Quote, EventKind::Greeks]);
}

#[test]
fn test_decode_full_format() {
    let data = vec![
        json!({"eventType": "Quote", "eventSymbol": "MSFT", "bidPrice": 410.1, "askPrice": 410.3}),
        json!({"eventType": "Trade", "eventSymbol": "MSFT", "price": 410.2}),
    ];

    let events = decode_feed_data(&data, at());
    assert_eq!(events.len(), 1);
    let FeedEvent::Quote(quote) = &events[0] else {
        panic!("expected quote");
    };
    assert_eq!(quote.midpoint(), Some(dec!(410.2)));
}

#[test]
fn test_decode_unknown_compact_type_skipped() {
    let data = vec![json!("Trade"), json!(["Trade", "SPY", 1.0])];

    assert!(decode_feed_data(&data, at()).is_empty());
}

#[test]
fn test_quote_midpoint() {
    let quote = QuoteEvent {
        event_symbol: "X".to_string(),
        bid_price: Some(dec!(1.00)),
        ask_price: Some(dec!(1.05)),
        bid_size: None,
        ask_size: None,
        received_at: at(),
    };

    assert_eq!(quote.midpoint(), Some(dec!(1.025)));
}

// ============================================================================
// Message Tests
// ============================================================================

#[test]
fn test_parse_auth_state() {
    let msg: DxLinkMessage =
        serde_json::from_str(r#"{"type":"AUTH_STATE","channel":0,"state":"AUTHORIZED","userId":"u"}"#)
            .unwrap();

    assert_eq!(
        msg,
        DxLinkMessage::AuthState {
            state: "AUTHORIZED".to_string()
        }
    );
}

#[test]
fn test_parse_feed_data() {
    let msg: DxLinkMessage = serde_json::from_str(
        r#"{"type":"FEED_DATA","channel":1,"data":["Quote",["Quote","SPY",1,2,3,4]]}"#,
    )
    .unwrap();

    let DxLinkMessage::FeedData { channel, data } = msg else {
        panic!("expected feed data");
    };
    assert_eq!(channel, 1);
    assert_eq!(data.len(), 2);
}

#[test]
fn test_parse_unknown_message_type() {
    let msg: DxLinkMessage =
        serde_json::from_str(r#"{"type":"SOMETHING_NEW","channel":0}"#).unwrap();

    assert_eq!(msg, DxLinkMessage::Unknown);
}

#[test]
fn test_parse_error_message() {
    let msg: DxLinkMessage =
        serde_json::from_str(r#"{"type":"ERROR","channel":0,"error":"UNAUTHORIZED","message":"bad token"}"#)
            .unwrap();

    assert_eq!(
        msg,
        DxLinkMessage::Error {
            error: "UNAUTHORIZED".to_string(),
            message: "bad token".to_string(),
        }
    );
}

// ============================================================================
// Command Tests
// ============================================================================

#[test]
fn test_setup_command_wire_format() {
    let json = serde_json::to_value(ClientCommand::setup()).unwrap();

    assert_eq!(json["type"], "SETUP");
    assert_eq!(json["channel"], 0);
    assert_eq!(json["keepaliveTimeout"], 60);
    assert_eq!(json["acceptKeepaliveTimeout"], 60);
}

#[test]
fn test_auth_command_redacts_token_in_debug() {
    let cmd = ClientCommand::auth("quote-secret");

    let json = serde_json::to_value(&cmd).unwrap();
    assert_eq!(json["type"], "AUTH");
    assert_eq!(json["token"], "quote-secret");
    assert!(!format!("{:?}", cmd).contains("quote-secret"));
}

#[test]
fn test_feed_setup_requests_compact_fields() {
    let json = serde_json::to_value(ClientCommand::feed_setup(FEED_CHANNEL)).unwrap();

    assert_eq!(json["type"], "FEED_SETUP");
    assert_eq!(json["acceptDataFormat"], "COMPACT");
    assert_eq!(json["acceptEventFields"]["Quote"][2], "bidPrice");
    assert_eq!(json["acceptEventFields"]["Greeks"][5], "delta");
}

#[test]
fn test_feed_subscription_batches_symbols() {
    let symbols = vec!["SPY".to_string(), ".SPY240315P500".to_string()];
    let json =
        serde_json::to_value(ClientCommand::feed_subscription(1, &symbols, EventKind::Greeks))
            .unwrap();

    assert_eq!(json["type"], "FEED_SUBSCRIPTION");
    assert_eq!(json["add"].as_array().unwrap().len(), 2);
    assert_eq!(json["add"][1]["type"], "Greeks");
    assert_eq!(json["add"][1]["symbol"], ".SPY240315P500");
}

#[test]
fn test_command_round_trips_through_parser() {
    let cmd = ClientCommand::channel_request(FEED_CHANNEL);
    let text = serde_json::to_string(&cmd).unwrap();

    let parsed: ClientCommand = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed, cmd);
}
