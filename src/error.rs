//! Error taxonomy shared by every component of the SDK.
//!
//! Mirrors the tag set the original HERE OLP C++ SDK exposes through
//! `olp::client::ErrorCode`; every repository and client method in this
//! crate returns `Result<T, OlpError>`.

use thiserror::Error;

/// The single error type returned by every public operation in this crate.
#[derive(Error, Debug, Clone)]
pub enum OlpError {
    /// The operation was aborted by a cancellation signal.
    #[error("operation cancelled")]
    Cancelled,

    /// The configured deadline elapsed before the operation completed.
    #[error("request timed out")]
    RequestTimeout,

    /// The requested resource does not exist (cache miss under `CacheOnly`,
    /// unknown partition, tile not present in any reachable quad-tree).
    #[error("not found: {0}")]
    NotFound(String),

    /// The requested (service, version) pair was not present in a lookup
    /// response.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// HTTP 401/403 from an upstream service.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The request as constructed cannot succeed (conflicting fields,
    /// missing data handle, protocol misuse such as double-subscribe).
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Malformed input supplied by the caller.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The underlying cache implementation returned an error and
    /// `propagate_all_cache_errors` is enabled.
    #[error("cache I/O error: {0}")]
    CacheIO(String),

    /// Anything else: transport failures, parse failures, and other
    /// conditions that don't map onto a more specific tag.
    #[error("{0}")]
    Unknown(String),
}

impl OlpError {
    /// True for [`OlpError::Cancelled`]; convenience for call sites that
    /// need to special-case cancellation without a full match.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, OlpError::Cancelled)
    }

    /// Construct an [`OlpError::AccessDenied`]/[`OlpError::Unknown`] from an
    /// HTTP status code, the way repositories classify transport responses.
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            401 | 403 => OlpError::AccessDenied(message.into()),
            404 => OlpError::NotFound(message.into()),
            408 => OlpError::RequestTimeout,
            _ => OlpError::Unknown(message.into()),
        }
    }
}

/// Result alias used throughout the crate.
pub type OlpResult<T> = Result<T, OlpError>;
