// Transport error taxonomy.
//
// Every failure mode of a single API request lands in exactly one of
// these variants, so callers can distinguish "retry later", "fix your
// credentials", and "the server said no" without string matching.

use thiserror::Error;

/// Errors produced while talking to the API over HTTP.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The server rejected the request with 401 Unauthorized.
    #[error("authorization failed (HTTP {status}): {message}")]
    Authorization {
        status: u16,
        message: String,
        body: String,
    },

    // ── Request-level failures ──────────────────────────────────────
    /// The server answered with a non-success status other than 401.
    #[error("request failed (HTTP {status}): {message}")]
    Request {
        status: u16,
        message: String,
        body: String,
    },

    /// A response body could not be parsed as JSON.
    #[error("response body is not valid JSON: {message}")]
    Deserialization { message: String, body: String },

    // ── Connection-level failures ───────────────────────────────────
    /// The HTTP layer failed in a way that is not a status code
    /// (TLS, protocol violations, body streaming).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A request URL (or a redirect target) could not be built.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The caller's cancellation token fired before the request settled.
    #[error("request cancelled")]
    Cancelled,

    // ── Configuration ───────────────────────────────────────────────
    /// The client configuration could not be turned into an HTTP client.
    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl Error {
    /// The HTTP status carried by this error, when there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Authorization { status, .. } | Self::Request { status, .. } => Some(*status),
            Self::Transport(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// True when the failure is an authentication problem the caller
    /// can fix by supplying (or renewing) a token.
    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Authorization { .. })
    }
}
