//! Freshness tracking per query shape.
//!
//! One call record per [`QueryShape`] stores when that shape was last fetched
//! successfully. A shape never fetched reads as [`EPOCH_SENTINEL`], which is
//! stale under any window and, sent as `since`, asks the source for
//! everything it has.

use std::time::Duration;

use time::OffsetDateTime;

use monitor_store::Store;
use monitor_types::{EPOCH_SENTINEL, QueryShape};

use crate::error::Result;

/// When `shape` was last fetched, or the sentinel if never.
pub fn last_fetch(store: &Store, shape: &QueryShape) -> Result<OffsetDateTime> {
    Ok(store.get_call_date(shape)?.unwrap_or(EPOCH_SENTINEL))
}

/// Record that `shape` was fetched at `now`. Never moves the record back.
pub fn mark_fetched(store: &Store, shape: &QueryShape, now: OffsetDateTime) -> Result<()> {
    store.record_call(shape, now)?;
    Ok(())
}

/// Whether data last fetched at `last` must be refetched at `now`.
///
/// Stale once `window` has fully elapsed; a zero window is always stale.
pub fn is_stale(last: OffsetDateTime, now: OffsetDateTime, window: Duration) -> bool {
    now - last >= window
}

#[cfg(test)]
mod tests {
    use super::*;
    use monitor_types::truncate_to_seconds;
    use time::macros::datetime;

    #[test]
    fn test_last_fetch_defaults_to_sentinel() {
        let store = Store::open_in_memory().unwrap();
        let shape = QueryShape::things("tok1", "all");
        assert_eq!(last_fetch(&store, &shape).unwrap(), EPOCH_SENTINEL);
    }

    #[test]
    fn test_mark_then_read() {
        let store = Store::open_in_memory().unwrap();
        let shape = QueryShape::states("tok1", "d1", Some("temperature"));
        let now = truncate_to_seconds(OffsetDateTime::now_utc());

        mark_fetched(&store, &shape, now).unwrap();
        assert_eq!(last_fetch(&store, &shape).unwrap(), now);

        // The bounds-free shape of another attribute is independent.
        let other = QueryShape::states("tok1", "d1", Some("humidity"));
        assert_eq!(last_fetch(&store, &other).unwrap(), EPOCH_SENTINEL);
    }

    #[test]
    fn test_mark_is_forward_only() {
        let store = Store::open_in_memory().unwrap();
        let shape = QueryShape::things("tok1", "all");
        let later = datetime!(2016-04-20 12:00 UTC);

        mark_fetched(&store, &shape, later).unwrap();
        mark_fetched(&store, &shape, datetime!(2016-04-20 11:00 UTC)).unwrap();
        assert_eq!(last_fetch(&store, &shape).unwrap(), later);
    }

    #[test]
    fn test_is_stale_boundaries() {
        let last = datetime!(2016-04-20 12:00 UTC);
        let window = Duration::from_secs(10 * 60);

        assert!(!is_stale(last, datetime!(2016-04-20 12:09:59 UTC), window));
        assert!(is_stale(last, datetime!(2016-04-20 12:10 UTC), window));
        assert!(is_stale(last, datetime!(2016-04-20 13:00 UTC), window));
    }

    #[test]
    fn test_zero_window_always_stale() {
        let now = datetime!(2016-04-20 12:00 UTC);
        assert!(is_stale(now, now, Duration::ZERO));
    }

    #[test]
    fn test_sentinel_is_stale() {
        let now = datetime!(2016-04-20 12:00 UTC);
        assert!(is_stale(EPOCH_SENTINEL, now, Duration::from_secs(120 * 60)));
    }

    #[test]
    fn test_future_record_is_fresh() {
        let now = datetime!(2016-04-20 12:00 UTC);
        let ahead = datetime!(2016-04-20 12:05 UTC);
        assert!(!is_stale(ahead, now, Duration::from_secs(60)));
    }
}
