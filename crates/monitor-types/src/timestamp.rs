//! Timestamp handling for remote records.
//!
//! The remote API reports instants as `YYYY-MM-DDTHH:MM:SSZ` (UTC, second
//! precision). Locally every instant is an [`OffsetDateTime`] in UTC and is
//! persisted as whole Unix seconds.

use time::format_description::BorrowedFormatItem;
use time::macros::{datetime, format_description};
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::error::{ParseError, ParseResult};

/// Wire format of remote timestamps.
const REMOTE_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");

/// Instant reported for a query shape that was never fetched.
///
/// Far enough in the past that every shape is stale and the first incremental
/// fetch asks for the complete history.
pub const EPOCH_SENTINEL: OffsetDateTime = datetime!(1900-01-01 0:00 UTC);

/// Parse a remote `YYYY-MM-DDTHH:MM:SSZ` timestamp.
///
/// # Examples
///
/// ```
/// use monitor_types::parse_remote_timestamp;
///
/// let ts = parse_remote_timestamp("2016-04-20T08:15:00Z").unwrap();
/// assert_eq!(ts.unix_timestamp(), 1_461_140_100);
/// assert!(parse_remote_timestamp("2016-04-20 08:15:00").is_err());
/// ```
pub fn parse_remote_timestamp(s: &str) -> ParseResult<OffsetDateTime> {
    PrimitiveDateTime::parse(s.trim(), REMOTE_FORMAT)
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|e| ParseError::InvalidTimestamp(format!("{s:?}: {e}")))
}

/// Convert stored Unix seconds back into an instant.
pub fn from_unix_seconds(secs: i64) -> ParseResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|e| ParseError::InvalidTimestamp(format!("{secs}: {e}")))
}

/// Drop sub-second precision so an instant compares equal to its stored form.
pub fn truncate_to_seconds(ts: OffsetDateTime) -> OffsetDateTime {
    ts.replace_nanosecond(0).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_remote_timestamp() {
        let ts = parse_remote_timestamp("2016-04-25T23:59:59Z").unwrap();
        assert_eq!(ts, datetime!(2016-04-25 23:59:59 UTC));
    }

    #[test]
    fn test_parse_rejects_offsets_and_fractions() {
        assert!(parse_remote_timestamp("2016-04-25T23:59:59+02:00").is_err());
        assert!(parse_remote_timestamp("2016-04-25T23:59:59.120Z").is_err());
        assert!(parse_remote_timestamp("").is_err());
    }

    #[test]
    fn test_epoch_sentinel_is_before_unix_epoch() {
        assert_eq!(EPOCH_SENTINEL.unix_timestamp(), -2_208_988_800);
    }

    #[test]
    fn test_truncate_to_seconds() {
        let ts = datetime!(2016-04-20 08:05:09.750 UTC);
        assert_eq!(truncate_to_seconds(ts), datetime!(2016-04-20 08:05:09 UTC));
    }
}
