//! Error types for parsing remote telemetry records in monitor-types.

use thiserror::Error;

/// Errors that can occur when interpreting a record returned by the remote API.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    /// The item is `null` or not a JSON object.
    #[error("Item is not an object")]
    NotAnObject,

    /// A required field is absent or null.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// A timestamp did not match `YYYY-MM-DDTHH:MM:SSZ`.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Any other malformed content.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias using monitor-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
