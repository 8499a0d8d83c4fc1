//! # tasty-agent
//!
//! Trading-session and market-data core for a tastytrade brokerage
//! assistant. Tool handlers sit on top of this crate; everything they need
//! to talk to the brokerage safely lives here.
//!
//! ## Components
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`session`] | OAuth access token lifecycle with coalesced refresh |
//! | [`rate_limiter`] | Sliding-window admission for outbound calls |
//! | [`cache`] | TTL cache with lazy eviction |
//! | [`instrument`] | Stock and option resolution over cached chains |
//! | [`streaming`] | Bounded quote and greeks collection over DXLink |
//! | [`pricing`] | Net price of multi-leg orders |
//! | [`remote`] | Session-guarded, rate-limited brokerage access |
//! | [`account`] | Balances, positions, history, orders, watchlists |
//! | [`context`] | The injected bundle of shared components |
//! | [`config`] | Environment and TOML configuration |
//! | [`error`] | Error taxonomy |
//!
//! ## Call path
//!
//! ```text
//! TradingContext
//!   └── RemoteApi::call ── SessionManager::ensure_valid ── RateLimiter::acquire
//!         ├── InstrumentResolver (chain cache)
//!         ├── QuoteCollector ── DxLinkConnector (quote-token cache)
//!         └── account operations
//! ```
//!
//! All shared state sits behind the [`TradingContext`]; there are no
//! process globals.

pub mod account;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod instrument;
pub mod pricing;
pub mod rate_limiter;
pub mod remote;
pub mod session;
pub mod streaming;

pub use config::{Config, ConfigError, Credentials, Settings};
pub use context::{LegSpec, TradingContext};
pub use error::{TradingError, TradingResult};
pub use instrument::{InstrumentIdentity, InstrumentResolver, InstrumentSpec, OptionType};
pub use pricing::{NetPrice, OrderLeg, PriceCalculator};
pub use rate_limiter::RateLimiter;
pub use remote::RemoteApi;
pub use session::{Session, SessionManager};
pub use streaming::{CollectedSnapshot, EventKind, QuoteCollector};
