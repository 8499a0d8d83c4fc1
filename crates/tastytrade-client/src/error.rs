//! Failures surfaced by the REST and DXLink clients.

use thiserror::Error;


/// Errors from talking to the brokerage.
#[derive(Debug, Error)]
pub enum Error {
    /// The request never produced a response.
    #[error("transport failure: {0}")]
    Http(#[from] reqwest::Error),

    /// A response body did not match the expected shape.
    #[error("undecodable response: {0}")]
    Json(#[from] serde_json::Error),

    /// The streaming socket failed.
    #[error("dxlink socket failure: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// A streaming endpoint could not be parsed.
    #[error("bad endpoint url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Non-success status without a more specific variant.
    #[error("brokerage returned {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },

    /// 401, or DXLink refused the quote token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// 429, the brokerage is throttling this login.
    #[error("rate limited by brokerage (retry after {retry_after_secs:?}s)")]
    RateLimited {
        /// Seconds from the `Retry-After` header, when sent.
        retry_after_secs: Option<u64>,
    },

    /// 404 for an account, order, watchlist or symbol.
    #[error("not found: {0}")]
    NotFound(String),

    /// The call was rejected locally before sending.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// DXLink sent an ERROR frame or revoked authorization.
    #[error("dxlink protocol error: {0}")]
    Protocol(String),

    /// The streaming session is gone.
    #[error("dxlink connection closed")]
    ConnectionClosed,
}

impl Error {
    /// Returns true when the server rejected the credentials rather than
    /// the request failing in transit.
    #[must_use]
    pub fn is_auth_rejection(&self) -> bool {
        match self {
            Self::Unauthorized(_) => true,
            Self::Api { status, .. } => matches!(status, 400 | 401 | 403),
            _ => false,
        }
    }

    /// Returns true for failures worth retrying after a pause.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::RateLimited { .. } | Self::WebSocket(_) | Self::ConnectionClosed => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
