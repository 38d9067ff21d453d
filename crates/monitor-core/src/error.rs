//! Error types for monitor-core.
//!
//! # Recovery
//!
//! | Error Type | Strategy |
//! |------------|----------|
//! | [`Error::Http`] | Retry later, the source or network may be down |
//! | [`Error::Remote`] | Retry later for 5xx, fix the request for other codes |
//! | [`Error::Throttled`] | Retry later, the source kept answering 429 |
//! | [`Error::Timeout`] | Retry later with a larger wait budget |
//! | [`Error::Unauthorized`] | Refresh the access token, then call again |
//! | [`Error::InvalidPayload`] | Do not retry, report to the user |
//! | [`Error::NotConnected`] | Register the account before syncing it |
//! | [`Error::Cancelled`] | Shutdown in progress, stop |
//!
//! A failed fetch never records the shape as fetched, so calling the same
//! operation again issues a new remote request.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while synchronizing with the remote API.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Transport-level failure (connect, TLS, body read, request timeout).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote API answered with an unexpected status.
    #[error("Remote API returned {status}: {message}")]
    Remote {
        /// HTTP status code.
        status: u16,
        /// Error text extracted from the body, if any.
        message: String,
    },

    /// The remote API rejected the access token.
    #[error("Remote API rejected the access token")]
    Unauthorized,

    /// Still rate limited after the configured number of attempts.
    #[error("Still rate limited after {attempts} attempts")]
    Throttled {
        /// Requests issued before giving up.
        attempts: u32,
    },

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Response body was not the expected JSON shape.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Endpoint discovery returned no usable endpoint.
    #[error("Endpoint discovery failed: {0}")]
    Discovery(String),

    /// No account with a token is registered for this token.
    #[error("No connected account for token")]
    NotConnected,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Local store error.
    #[error("Store error: {0}")]
    Store(#[from] monitor_store::Error),
}

impl Error {
    /// Whether calling the same operation again later may succeed unchanged.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(_) | Error::Throttled { .. } | Error::Timeout { .. } => true,
            Error::Remote { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Result type alias using monitor-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Remote {
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Remote API returned 500: boom");

        let err = Error::Throttled { attempts: 20 };
        assert_eq!(err.to_string(), "Still rate limited after 20 attempts");

        let err = Error::Timeout {
            operation: "fetch".to_string(),
            duration: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "Operation 'fetch' timed out after 30s");
    }

    #[test]
    fn test_is_transient() {
        assert!(Error::Throttled { attempts: 3 }.is_transient());
        assert!(
            Error::Remote {
                status: 503,
                message: String::new()
            }
            .is_transient()
        );
        assert!(
            !Error::Remote {
                status: 404,
                message: String::new()
            }
            .is_transient()
        );
        assert!(!Error::Unauthorized.is_transient());
        assert!(!Error::InvalidPayload("x".to_string()).is_transient());
        assert!(!Error::Cancelled.is_transient());
    }

    #[test]
    fn test_store_error_conversion() {
        let err: Error = monitor_store::Error::UnknownCollection("users".to_string()).into();
        assert!(matches!(err, Error::Store(_)));
        assert!(err.to_string().contains("users"));
    }
}
