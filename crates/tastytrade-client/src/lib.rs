//! Async client library for the tastytrade brokerage API.
//!
//! This crate provides a typed HTTP client for the REST endpoints used by
//! the trading agent and a DXLink client for the real-time market-data
//! stream. It is deliberately stateless: every call takes the bearer access
//! token, and session refresh, rate limiting and caching are left to the
//! caller.
//!
//! # Example
//!
//! ```no_run
//! use tastytrade_client::{ClientConfig, TastytradeClient};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tastytrade_client::Error> {
//!     let client = TastytradeClient::new(ClientConfig {
//!         base_url: "https://api.tastyworks.com".into(),
//!         timeout: Duration::from_secs(30),
//!     })?;
//!
//!     let grant = client.exchange_refresh_token("secret", "refresh").await?;
//!     let accounts = client.list_accounts(&grant.access_token).await?;
//!     println!("{} accounts", accounts.len());
//!
//!     Ok(())
//! }
//! ```

mod client;
mod dxlink;
mod error;
mod types;

pub use client::{ClientConfig, PRODUCTION_URL, TastytradeClient};
pub use dxlink::{
    ChannelParameters, ClientCommand, DxLinkClient, DxLinkMessage, EventKind, FEED_CHANNEL,
    FeedEvent, GreeksEvent, QuoteEvent, RedactedToken, Subscription, decode_feed_data,
};
pub use error::Error;
pub use types::*;
