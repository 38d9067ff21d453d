//! Merging fetched pages into the local store.
//!
//! Items are matched against stored rows by natural key: `(token, id)` for
//! things, `(thing_id, state, date)` for states. Matching rows are replaced,
//! others inserted. Malformed items are skipped without failing the page.
//!
//! These functions do not open a transaction; the caller wraps a page in
//! [`Store::with_transaction`] so it lands all-or-nothing.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use monitor_store::Store;
use monitor_types::{State, Thing};

use crate::error::{Error, Result};

/// Outcome of reconciling one page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileCounts {
    /// Items stored under a new natural key.
    pub inserted: usize,
    /// Items that replaced an existing row.
    pub replaced: usize,
    /// Malformed items that were ignored.
    pub skipped: usize,
}

impl ReconcileCounts {
    /// Items written to the store.
    pub fn saved(&self) -> usize {
        self.inserted + self.replaced
    }

    fn record(&mut self, inserted: bool) {
        if inserted {
            self.inserted += 1;
        } else {
            self.replaced += 1;
        }
    }
}

impl std::ops::AddAssign for ReconcileCounts {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.replaced += other.replaced;
        self.skipped += other.skipped;
    }
}

/// Decode a response body into page items.
///
/// The body must be a JSON array; `null` counts as an empty page.
pub fn parse_page(body: &str) -> Result<Vec<Value>> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| Error::InvalidPayload(format!("response is not JSON: {}", e)))?;
    match value {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(Error::InvalidPayload(format!(
            "expected a JSON array, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Replace the thing list of `token` with `page`.
///
/// Every stored thing of the token is marked inactive first, so afterwards
/// exactly the things in `page` are active.
pub fn reconcile_things(store: &Store, token: &str, page: &[Value]) -> Result<ReconcileCounts> {
    let mut counts = ReconcileCounts::default();
    let mut things = Vec::with_capacity(page.len());
    for item in page.iter().filter(|item| !item.is_null()) {
        match Thing::from_remote(token, item) {
            Ok(thing) => things.push(thing),
            Err(e) => {
                warn!("Skipping malformed thing: {}", e);
                counts.skipped += 1;
            }
        }
    }

    store.mark_things_inactive(token)?;
    for thing in &things {
        counts.record(store.upsert_thing(thing)?);
    }

    info!(
        "Saved {} things: {} new, {} replaced.",
        counts.saved(),
        counts.inserted,
        counts.replaced
    );
    Ok(counts)
}

/// Merge a page of states of one thing.
///
/// `state` is the attribute that was requested, if any. Items without a
/// parsable `date` or without an attribute name are skipped.
pub fn reconcile_states(
    store: &Store,
    thing_id: &str,
    state: Option<&str>,
    page: &[Value],
) -> Result<ReconcileCounts> {
    let mut counts = ReconcileCounts::default();
    for item in page {
        if item.is_null() {
            continue;
        }
        let parsed = match State::from_remote(thing_id, state, item) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("Skipping malformed state of {}: {}", thing_id, e);
                counts.skipped += 1;
                continue;
            }
        };
        counts.record(store.upsert_state(&parsed)?);
    }

    if counts.skipped > 0 {
        warn!("Skipped {} malformed states of {}", counts.skipped, thing_id);
    }
    info!(
        "Saved {} states: {} new, {} replaced.",
        counts.saved(),
        counts.inserted,
        counts.replaced
    );
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use monitor_store::{StateQuery, ThingQuery};
    use serde_json::json;
    use time::macros::datetime;

    fn things_page(ids: &[&str]) -> Vec<Value> {
        ids.iter()
            .map(|id| json!({"id": id, "label": format!("Sensor {}", id)}))
            .collect()
    }

    #[test]
    fn test_parse_page() {
        assert_eq!(parse_page("[1, null]").unwrap().len(), 2);
        assert!(parse_page("null").unwrap().is_empty());
        assert!(matches!(
            parse_page(r#"{"error":"x"}"#),
            Err(Error::InvalidPayload(msg)) if msg.contains("an object")
        ));
        assert!(matches!(parse_page("<html>"), Err(Error::InvalidPayload(_))));
    }

    #[test]
    fn test_reconcile_things_sets_active_to_page() {
        let store = Store::open_in_memory().unwrap();
        reconcile_things(&store, "tok1", &things_page(&["a", "b", "c"])).unwrap();

        let counts = reconcile_things(&store, "tok1", &things_page(&["b", "d"])).unwrap();
        assert_eq!(counts.inserted, 1);
        assert_eq!(counts.replaced, 1);

        let active: Vec<String> = store
            .query_things(&ThingQuery::new().token("tok1").active(true))
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(active, vec!["b", "d"]);

        // Things that dropped out stay stored but inactive.
        let a = store.get_thing("tok1", "a").unwrap().unwrap();
        assert!(!a.active);
    }

    #[test]
    fn test_reconcile_things_partitioned_by_token() {
        let store = Store::open_in_memory().unwrap();
        reconcile_things(&store, "tok1", &things_page(&["a"])).unwrap();
        reconcile_things(&store, "tok2", &things_page(&["a", "b"])).unwrap();
        reconcile_things(&store, "tok2", &[]).unwrap();

        assert!(store.get_thing("tok1", "a").unwrap().unwrap().active);
        assert!(!store.get_thing("tok2", "a").unwrap().unwrap().active);
        assert!(!store.get_thing("tok2", "b").unwrap().unwrap().active);
    }

    #[test]
    fn test_reconcile_things_skips_malformed() {
        let store = Store::open_in_memory().unwrap();
        let page = vec![json!(null), json!("junk"), json!({"label": "no id"}), json!({"id": "a"})];
        let counts = reconcile_things(&store, "tok1", &page).unwrap();
        assert_eq!(counts.inserted, 1);
        assert_eq!(counts.skipped, 2);
    }

    #[test]
    fn test_reconcile_states_skips_nulls_and_malformed() {
        let store = Store::open_in_memory().unwrap();
        let page = vec![
            json!(null),
            json!({"date": "2016-04-20T00:00:00Z", "value": 71.5, "unit": "F"}),
            json!(null),
            json!({"value": 70}),
            json!({"date": "2016-04-20 00:00:00", "value": 70}),
            json!([]),
        ];

        let counts = reconcile_states(&store, "d1", Some("temperature"), &page).unwrap();
        assert_eq!(counts.inserted, 1);
        assert_eq!(counts.skipped, 3);

        let states = store
            .query_states(&StateQuery::new().thing("d1"))
            .unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].state, "temperature");
        assert_eq!(states[0].date, datetime!(2016-04-20 0:00 UTC));
        assert_eq!(states[0].unit.as_deref(), Some("F"));
    }

    #[test]
    fn test_reconcile_states_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let page = vec![
            json!({"date": "2016-04-20T00:00:00Z", "value": 70}),
            json!({"date": "2016-04-20T01:00:00Z", "value": 71}),
            json!({"date": "2016-04-20T02:00:00Z", "value": 72}),
        ];

        let first = reconcile_states(&store, "d1", Some("temperature"), &page).unwrap();
        assert_eq!(first.inserted, 3);

        let second = reconcile_states(&store, "d1", Some("temperature"), &page).unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.replaced, 3);
        assert_eq!(store.count_states(Some("d1")).unwrap(), 3);
    }

    #[test]
    fn test_reconcile_states_uses_item_attribute() {
        let store = Store::open_in_memory().unwrap();
        let page = vec![
            json!({"date": "2016-04-20T00:00:00Z", "state": "temperature", "value": 70}),
            json!({"date": "2016-04-20T00:00:00Z", "name": "humidity", "value": 40}),
            json!({"date": "2016-04-20T00:00:00Z", "value": 1}),
        ];

        let counts = reconcile_states(&store, "d1", None, &page).unwrap();
        assert_eq!(counts.inserted, 3);
        assert_eq!(counts.skipped, 0);
        assert!(
            store
                .state_exists("d1", "humidity", datetime!(2016-04-20 0:00 UTC))
                .unwrap()
        );
        assert!(
            store
                .state_exists("d1", "", datetime!(2016-04-20 0:00 UTC))
                .unwrap()
        );
    }

    #[test]
    fn test_counts_add_assign() {
        let mut total = ReconcileCounts::default();
        total += ReconcileCounts {
            inserted: 2,
            replaced: 1,
            skipped: 0,
        };
        total += ReconcileCounts {
            inserted: 0,
            replaced: 3,
            skipped: 1,
        };
        assert_eq!(total.saved(), 6);
        assert_eq!(total.skipped, 1);
    }
}
