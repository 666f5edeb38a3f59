//! The closed error taxonomy for the request execution core.
//!
//! Every failure that can escape the core is one variant of [`Error`]. Each
//! variant carries the data the retry engine (`crate::retry`) needs to
//! classify it, and [`Error::retryable`] / [`Error::suggested_strategy`]
//! expose that classification as a pure function of the variant rather than
//! a stored field, so classification can never drift out of sync with the
//! data.

use std::fmt;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Which recovery strategy the retry engine should apply to a retryable error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Re-acquire a token and retry once.
    TokenExpired,
    /// Honor `Retry-After` (or treat as transient if absent).
    RateLimited,
    /// Exponential backoff.
    Transient,
    /// Not retryable.
    None,
}

/// Reasons a caller-supplied auth configuration or grant flow failed.
#[derive(Debug, Clone)]
pub enum AuthFailureKind {
    /// A refresh was attempted but the cached token has no refresh token.
    MissingRefreshToken,
    /// The `state` parameter on a callback URL didn't match the one issued
    /// when the authorization URL was built.
    InvalidCallback,
    /// The authorization server reported `error=...` on the callback.
    AuthorizationDenied {
        code: String,
        description: Option<String>,
    },
    /// The token endpoint returned a non-2xx status.
    TokenEndpointHttp { status: u16, body: String },
    /// The PKCE `code_verifier` did not match the `code_challenge` sent earlier.
    PkceMismatch,
}

impl fmt::Display for AuthFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingRefreshToken => write!(f, "token has no refresh_token to renew with"),
            Self::InvalidCallback => write!(f, "callback state did not match the issued state"),
            Self::AuthorizationDenied { code, description } => match description {
                Some(d) => write!(f, "authorization denied: {code} ({d})"),
                None => write!(f, "authorization denied: {code}"),
            },
            Self::TokenEndpointHttp { status, body } => {
                write!(f, "token endpoint returned {status}: {body}")
            }
            Self::PkceMismatch => write!(f, "PKCE code_verifier did not match code_challenge"),
        }
    }
}

/// The closed error taxonomy described in spec §7.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid request: {reason}")]
    InvalidRequest {
        reason: String,
        parameter: Option<String>,
        valid_range: Option<String>,
    },

    #[error("invalid configuration: {kind}")]
    InvalidConfiguration { kind: String },

    #[error("authentication failure: {kind}")]
    AuthFailure { kind: AuthFailureKind },

    #[error("token storage error: {0}")]
    TokenStorageError(String),

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<std::time::Duration> },

    #[error("http error {status}: {body}")]
    HttpError { status: u16, body: String },

    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("unexpected response: failed to decode a successful response body")]
    UnexpectedResponse,

    #[error("client is offline")]
    Offline,

    #[error("operation canceled")]
    Canceled,
}

impl Error {
    /// Whether the retry engine may attempt this error again, per spec §7.
    pub fn retryable(&self) -> bool {
        match self {
            Error::InvalidRequest { .. }
            | Error::InvalidConfiguration { .. }
            | Error::TokenStorageError(_)
            | Error::UnexpectedResponse
            | Error::Offline
            | Error::Canceled => false,
            Error::AuthFailure { kind } => matches!(
                kind,
                AuthFailureKind::TokenEndpointHttp { status, .. } if *status >= 500
            ),
            Error::RateLimited { .. } => true,
            Error::HttpError { status, .. } => *status >= 500,
            Error::NetworkFailure(_) => true,
        }
    }

    /// The recovery strategy a retryable error should be scheduled under.
    pub fn suggested_strategy(&self) -> RetryStrategy {
        if !self.retryable() {
            return RetryStrategy::None;
        }
        match self {
            Error::RateLimited { .. } => RetryStrategy::RateLimited,
            Error::HttpError { .. } | Error::NetworkFailure(_) | Error::AuthFailure { .. } => {
                RetryStrategy::Transient
            }
            _ => RetryStrategy::None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::NetworkFailure(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(_err: serde_json::Error) -> Self {
        Error::UnexpectedResponse
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::InvalidConfiguration {
            kind: format!("malformed url: {err}"),
        }
    }
}
