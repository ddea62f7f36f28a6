//! Error taxonomy for tap operations.
//!
//! Every remote failure is surfaced as a distinct [`TapError`] variant; the
//! engine never collapses "fetch failed" into "no data".

use thiserror::Error;

use crate::http::HttpError;

/// Errors that can occur while extracting from the remote API.
#[derive(Debug, Error)]
pub enum TapError {
    /// Credential rejected by the remote service (HTTP 401/403).
    #[error("authentication failed (HTTP {status})")]
    Auth { status: u16 },

    /// Non-2xx response from the remote API.
    #[error("API error (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    /// Connection, DNS, or timeout failure below the HTTP layer.
    #[error("network error: {message}")]
    Network { message: String },

    /// Response body was not the JSON shape the endpoint promises.
    #[error("malformed response from {context}: {message}")]
    MalformedResponse { context: String, message: String },

    /// The pagination guard-rail tripped before the cursor chain ended.
    #[error("pagination exceeded the configured limit of {max_pages} pages")]
    PaginationLimitExceeded { max_pages: u32 },

    /// Sync was cancelled by a shutdown request before the stream drained.
    #[error("sync cancelled by shutdown request")]
    Cancelled,

    /// Unexpected internal failure (task join, sink I/O, state persistence).
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl TapError {
    /// Classify an HTTP status into the right error variant.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        match status {
            401 | 403 => Self::Auth { status },
            _ => Self::Api {
                status,
                body: body.into(),
            },
        }
    }

    #[inline]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    #[inline]
    pub fn malformed(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            context: context.into(),
            message: message.into(),
        }
    }

    #[inline]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Transient errors worth retrying before the stream gives up.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

impl From<HttpError> for TapError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Transport(message) => Self::Network { message },
            HttpError::NoMockResponse { url } => Self::Internal {
                message: format!("no mock response registered for GET {url}"),
            },
        }
    }
}

/// Result type for tap operations.
pub type Result<T> = std::result::Result<T, TapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_map_to_auth_variant() {
        assert!(matches!(
            TapError::from_status(401, ""),
            TapError::Auth { status: 401 }
        ));
        assert!(matches!(
            TapError::from_status(403, ""),
            TapError::Auth { status: 403 }
        ));
        assert!(matches!(
            TapError::from_status(500, "boom"),
            TapError::Api { status: 500, .. }
        ));
    }

    #[test]
    fn only_network_errors_are_retryable() {
        assert!(TapError::network("reset").is_retryable());
        assert!(!TapError::from_status(500, "").is_retryable());
        assert!(!TapError::PaginationLimitExceeded { max_pages: 3 }.is_retryable());
    }
}
