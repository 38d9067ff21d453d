//! Query builders for things and states.
//!
//! Both [`ThingQuery`] and [`StateQuery`] follow the builder pattern. Filters
//! are equality predicates plus, for states, a half-open time range
//! (`since` inclusive, `until` exclusive).
//!
//! # Example
//!
//! ```
//! use monitor_store::{StateQuery, Store, ThingQuery};
//! use time::{Duration, OffsetDateTime};
//!
//! let store = Store::open_in_memory()?;
//! let yesterday = OffsetDateTime::now_utc() - Duration::hours(24);
//!
//! let things = store.query_things(&ThingQuery::new().token("tok1").active(true))?;
//!
//! let query = StateQuery::new()
//!     .thing("d1")
//!     .state("temperature")
//!     .since(yesterday);
//! let states = store.query_states(&query)?;
//! # Ok::<(), monitor_store::Error>(())
//! ```

use time::OffsetDateTime;

type SqlParams = Vec<Box<dyn rusqlite::ToSql>>;

fn where_clause(conditions: &[&str]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    }
}

fn push_paging(sql: &mut String, limit: Option<u32>, offset: Option<u32>) {
    match (limit, offset) {
        (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
        (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
        // SQLite needs a LIMIT before OFFSET
        (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
        (None, None) => {}
    }
}

/// Fluent query builder for things.
///
/// Results are ordered by `id`.
#[derive(Debug, Default, Clone)]
pub struct ThingQuery {
    /// Filter by owning account token.
    pub token: Option<String>,
    /// Filter by thing id.
    pub id: Option<String>,
    /// Filter by the `active` flag.
    pub active: Option<bool>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
}

impl ThingQuery {
    /// Create a query matching every thing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only things of this account token.
    pub fn token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Only the thing with this id.
    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    /// Only active (or only inactive) things.
    pub fn active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    /// Limit the maximum number of results returned.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub(crate) fn build_where(&self) -> (String, SqlParams) {
        let mut conditions = Vec::new();
        let mut params: SqlParams = Vec::new();

        if let Some(ref token) = self.token {
            conditions.push("token = ?");
            params.push(Box::new(token.clone()));
        }

        if let Some(ref id) = self.id {
            conditions.push("id = ?");
            params.push(Box::new(id.clone()));
        }

        if let Some(active) = self.active {
            conditions.push("active = ?");
            params.push(Box::new(active));
        }

        (where_clause(&conditions), params)
    }

    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let mut sql = format!(
            "SELECT token, id, label, capabilities, active FROM things {} ORDER BY id ASC",
            where_clause
        );
        push_paging(&mut sql, self.limit, self.offset);
        sql
    }
}

/// Fluent query builder for states.
///
/// By default results are ordered by `date` ascending (oldest first).
///
/// # Example
///
/// ```
/// use monitor_store::StateQuery;
/// use time::macros::datetime;
///
/// // Everything stored for one thing and attribute in a five day window
/// let query = StateQuery::new()
///     .thing("d1")
///     .state("temperature")
///     .since(datetime!(2016-04-20 0:00 UTC))
///     .until(datetime!(2016-04-25 0:00 UTC));
///
/// // Latest value
/// let latest = StateQuery::new().thing("d1").newest_first().limit(1);
/// ```
#[derive(Debug, Default, Clone)]
pub struct StateQuery {
    /// Filter by thing id.
    pub thing_id: Option<String>,
    /// Filter by attribute name.
    pub state: Option<String>,
    /// Include only states at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Include only states strictly before this time.
    pub until: Option<OffsetDateTime>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
    /// Order by date descending.
    pub newest_first: bool,
}

impl StateQuery {
    /// Create a query matching every state, oldest first.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only states of this thing.
    pub fn thing(mut self, thing_id: &str) -> Self {
        self.thing_id = Some(thing_id.to_string());
        self
    }

    /// Only states of this attribute.
    pub fn state(mut self, state: &str) -> Self {
        self.state = Some(state.to_string());
        self
    }

    /// Only states of this attribute, when one is given.
    pub fn maybe_state(mut self, state: Option<&str>) -> Self {
        self.state = state.map(str::to_string);
        self
    }

    /// Include states at or after `time`.
    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    /// Include states strictly before `time`.
    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    /// Limit the maximum number of results returned.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Order results newest first.
    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    pub(crate) fn build_where(&self) -> (String, SqlParams) {
        let mut conditions = Vec::new();
        let mut params: SqlParams = Vec::new();

        if let Some(ref thing_id) = self.thing_id {
            conditions.push("thing_id = ?");
            params.push(Box::new(thing_id.clone()));
        }

        if let Some(ref state) = self.state {
            conditions.push("state = ?");
            params.push(Box::new(state.clone()));
        }

        if let Some(since) = self.since {
            conditions.push("date >= ?");
            params.push(Box::new(since.unix_timestamp()));
        }

        if let Some(until) = self.until {
            conditions.push("date < ?");
            params.push(Box::new(until.unix_timestamp()));
        }

        (where_clause(&conditions), params)
    }

    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };
        let mut sql = format!(
            "SELECT thing_id, state, date, value, unit FROM states {} \
             ORDER BY date {}, state ASC",
            where_clause, order
        );
        push_paging(&mut sql, self.limit, self.offset);
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_state_query_default_order() {
        let sql = StateQuery::new().build_sql();
        assert!(sql.contains("ORDER BY date ASC"));
        assert!(!sql.contains("WHERE"));
    }

    #[test]
    fn test_state_query_half_open_range() {
        let query = StateQuery::new()
            .thing("d1")
            .since(datetime!(2016-04-20 0:00 UTC))
            .until(datetime!(2016-04-25 0:00 UTC));
        let (clause, params) = query.build_where();
        assert_eq!(clause, "WHERE thing_id = ? AND date >= ? AND date < ?");
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_offset_without_limit() {
        let sql = ThingQuery::new().offset(5).build_sql();
        assert!(sql.ends_with("LIMIT -1 OFFSET 5"));
    }

    #[test]
    fn test_thing_query_filters() {
        let (clause, params) = ThingQuery::new().token("tok1").active(true).build_where();
        assert_eq!(clause, "WHERE token = ? AND active = ?");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_maybe_state() {
        assert_eq!(StateQuery::new().maybe_state(None).state, None);
        assert_eq!(
            StateQuery::new().maybe_state(Some("temperature")).state.as_deref(),
            Some("temperature")
        );
    }
}
