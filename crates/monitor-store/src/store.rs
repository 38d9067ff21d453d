//! Main store implementation.

use std::path::Path;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, info};

use monitor_types::{Account, QueryShape, State, Thing, from_unix_seconds};

use crate::error::{Error, Result};
use crate::models::{CallRecord, Collection, CollectionCounts, StatesRange};
use crate::queries::{StateQuery, ThingQuery};
use crate::schema;

/// SQLite-based store for synchronized telemetry.
///
/// Every write is atomic per record. Callers that need several writes to
/// land together use [`Store::with_transaction`].
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    /// Run `f` inside a single transaction.
    ///
    /// The transaction commits when `f` returns `Ok` and rolls back otherwise.
    /// Transactions do not nest: `f` must not call `with_transaction` itself.
    pub fn with_transaction<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Store) -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let tx = self.conn.unchecked_transaction().map_err(Error::from)?;
        let value = f(self)?;
        tx.commit().map_err(Error::from)?;
        Ok(value)
    }
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn instant_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<OffsetDateTime> {
    let secs: i64 = row.get(idx)?;
    from_unix_seconds(secs)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn thing_from_row(row: &Row<'_>) -> rusqlite::Result<Thing> {
    Ok(Thing {
        token: row.get(0)?,
        id: row.get(1)?,
        label: row.get(2)?,
        capabilities: json_column(row, 3)?,
        active: row.get(4)?,
    })
}

fn state_from_row(row: &Row<'_>) -> rusqlite::Result<State> {
    Ok(State {
        thing_id: row.get(0)?,
        state: row.get(1)?,
        date: instant_column(row, 2)?,
        value: json_column(row, 3)?,
        unit: row.get(4)?,
    })
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    let token_dict = match row.get::<_, Option<String>>(2)? {
        Some(text) => Some(
            serde_json::from_str::<Value>(&text).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e))
            })?,
        ),
        None => None,
    };
    Ok(Account {
        name: row.get(0)?,
        token: row.get(1)?,
        token_dict,
        endpoint: row.get(3)?,
    })
}

// Thing operations
impl Store {
    /// Insert a thing, or replace the one with the same `(token, id)`.
    ///
    /// Returns `true` when a new row was inserted.
    pub fn upsert_thing(&self, thing: &Thing) -> Result<bool> {
        let capabilities = serde_json::to_string(&thing.capabilities)?;
        let now = now_unix();

        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO things (token, id, label, capabilities, active, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                thing.token,
                thing.id,
                thing.label,
                capabilities,
                thing.active,
                now
            ],
        )?;

        if inserted == 0 {
            self.conn.execute(
                "UPDATE things SET label = ?3, capabilities = ?4, active = ?5, updated_at = ?6
                 WHERE token = ?1 AND id = ?2",
                rusqlite::params![
                    thing.token,
                    thing.id,
                    thing.label,
                    capabilities,
                    thing.active,
                    now
                ],
            )?;
        }

        Ok(inserted > 0)
    }

    /// Set `active = false` on every thing of `token`.
    pub fn mark_things_inactive(&self, token: &str) -> Result<usize> {
        let updated = self.conn.execute(
            "UPDATE things SET active = 0 WHERE token = ?1 AND active = 1",
            [token],
        )?;
        debug!("Marked {} things inactive", updated);
        Ok(updated)
    }

    /// Get one thing of `token` regardless of its `active` flag.
    pub fn get_thing(&self, token: &str, id: &str) -> Result<Option<Thing>> {
        let thing = self
            .conn
            .query_row(
                "SELECT token, id, label, capabilities, active FROM things
                 WHERE token = ?1 AND id = ?2",
                [token, id],
                thing_from_row,
            )
            .optional()?;
        Ok(thing)
    }

    /// Whether a thing with this natural key is stored.
    pub fn thing_exists(&self, token: &str, id: &str) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM things WHERE token = ?1 AND id = ?2)",
            [token, id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Query things with filters.
    pub fn query_things(&self, query: &ThingQuery) -> Result<Vec<Thing>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = self.conn.prepare(&sql)?;
        let things = stmt
            .query_map(params_ref.as_slice(), thing_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(things)
    }

    /// Count things, optionally for one token.
    pub fn count_things(&self, token: Option<&str>) -> Result<u64> {
        let count: i64 = match token {
            Some(token) => self.conn.query_row(
                "SELECT COUNT(*) FROM things WHERE token = ?",
                [token],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM things", [], |row| row.get(0))?,
        };
        Ok(count as u64)
    }
}

// State operations
impl Store {
    /// Insert a state, or replace the one with the same
    /// `(thing_id, state, date)`.
    ///
    /// Returns `true` when a new row was inserted.
    pub fn upsert_state(&self, state: &State) -> Result<bool> {
        let value = serde_json::to_string(&state.value)?;
        let date = state.date.unix_timestamp();
        let now = now_unix();

        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO states (thing_id, state, date, value, unit, synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![state.thing_id, state.state, date, value, state.unit, now],
        )?;

        if inserted == 0 {
            self.conn.execute(
                "UPDATE states SET value = ?4, unit = ?5, synced_at = ?6
                 WHERE thing_id = ?1 AND state = ?2 AND date = ?3",
                rusqlite::params![state.thing_id, state.state, date, value, state.unit, now],
            )?;
        }

        Ok(inserted > 0)
    }

    /// Whether a state with this natural key is stored.
    pub fn state_exists(&self, thing_id: &str, state: &str, date: OffsetDateTime) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM states WHERE thing_id = ?1 AND state = ?2 AND date = ?3)",
            rusqlite::params![thing_id, state, date.unix_timestamp()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Query states with filters.
    pub fn query_states(&self, query: &StateQuery) -> Result<Vec<State>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = self.conn.prepare(&sql)?;
        let states = stmt
            .query_map(params_ref.as_slice(), state_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(states)
    }

    /// Earliest and latest stored instants for a thing, optionally one
    /// attribute. `None` when nothing is stored.
    pub fn state_extent(&self, thing_id: &str, state: Option<&str>) -> Result<Option<StatesRange>> {
        let (min, max): (Option<i64>, Option<i64>) = self.conn.query_row(
            "SELECT MIN(date), MAX(date) FROM states
             WHERE thing_id = ?1 AND (?2 IS NULL OR state = ?2)",
            rusqlite::params![thing_id, state],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        match (min, max) {
            (Some(min), Some(max)) => {
                let to_instant = |secs: i64| {
                    from_unix_seconds(secs).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(e))
                    })
                };
                Ok(Some(StatesRange {
                    min: to_instant(min)?,
                    max: to_instant(max)?,
                }))
            }
            _ => Ok(None),
        }
    }

    /// Count states, optionally for one thing.
    pub fn count_states(&self, thing_id: Option<&str>) -> Result<u64> {
        let count: i64 = match thing_id {
            Some(id) => self.conn.query_row(
                "SELECT COUNT(*) FROM states WHERE thing_id = ?",
                [id],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM states", [], |row| row.get(0))?,
        };
        Ok(count as u64)
    }
}

// Call record operations
impl Store {
    /// Get the call record of a query shape.
    pub fn get_call(&self, shape: &QueryShape) -> Result<Option<CallRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT shape, function, kind, thing_id, state, token, date
                 FROM calls WHERE shape = ?",
                [shape.key()],
                |row| {
                    Ok(CallRecord {
                        shape: row.get(0)?,
                        function: row.get(1)?,
                        kind: row.get(2)?,
                        thing_id: row.get(3)?,
                        state: row.get(4)?,
                        token: row.get(5)?,
                        date: instant_column(row, 6)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Time of the last successful call for a query shape.
    pub fn get_call_date(&self, shape: &QueryShape) -> Result<Option<OffsetDateTime>> {
        Ok(self.get_call(shape)?.map(|record| record.date))
    }

    /// Record a successful call for a query shape at `date`.
    ///
    /// The stored date never moves backwards.
    pub fn record_call(&self, shape: &QueryShape, date: OffsetDateTime) -> Result<()> {
        self.conn.execute(
            "INSERT INTO calls (shape, function, kind, thing_id, state, token, date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(shape) DO UPDATE SET date = MAX(calls.date, excluded.date)",
            rusqlite::params![
                shape.key(),
                shape.function(),
                shape.get("kind"),
                shape.get("thing_id"),
                shape.get("state"),
                shape.token(),
                date.unix_timestamp(),
            ],
        )?;

        debug!("Recorded call for {} at {}", shape.function(), date);
        Ok(())
    }
}

// Account operations
impl Store {
    /// Insert or update an account by name.
    ///
    /// A changed token discards the endpoint and token data stored for the
    /// previous token unless new ones are supplied.
    pub fn upsert_account(&self, account: &Account) -> Result<()> {
        let token_dict = account
            .token_dict
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn.execute(
            "INSERT INTO accounts (name, token, token_dict, endpoint, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(name) DO UPDATE SET
                token = excluded.token,
                token_dict = CASE WHEN accounts.token IS excluded.token
                    THEN COALESCE(excluded.token_dict, accounts.token_dict)
                    ELSE excluded.token_dict END,
                endpoint = CASE WHEN accounts.token IS excluded.token
                    THEN COALESCE(excluded.endpoint, accounts.endpoint)
                    ELSE excluded.endpoint END",
            rusqlite::params![
                account.name,
                account.token,
                token_dict,
                account.endpoint,
                now_unix()
            ],
        )?;

        Ok(())
    }

    /// Get an account by name.
    pub fn get_account(&self, name: &str) -> Result<Option<Account>> {
        let account = self
            .conn
            .query_row(
                "SELECT name, token, token_dict, endpoint FROM accounts WHERE name = ?",
                [name],
                account_from_row,
            )
            .optional()?;
        Ok(account)
    }

    /// Get the account holding `token`.
    pub fn get_account_by_token(&self, token: &str) -> Result<Option<Account>> {
        let account = self
            .conn
            .query_row(
                "SELECT name, token, token_dict, endpoint FROM accounts WHERE token = ?",
                [token],
                account_from_row,
            )
            .optional()?;
        Ok(account)
    }

    /// Store the discovered endpoint for the account holding `token`.
    pub fn set_account_endpoint(&self, token: &str, endpoint: &str) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE accounts SET endpoint = ?2 WHERE token = ?1",
            [token, endpoint],
        )?;
        if updated == 0 {
            return Err(Error::AccountNotFound("<token>".to_string()));
        }
        Ok(())
    }

    /// Accounts that hold a token, i.e. have been connected to the API.
    pub fn accounts(&self) -> Result<Vec<Account>> {
        self.select_accounts(
            "SELECT name, token, token_dict, endpoint FROM accounts
             WHERE token IS NOT NULL ORDER BY name",
        )
    }

    /// Every account, connected or not.
    pub fn list_accounts(&self) -> Result<Vec<Account>> {
        self.select_accounts(
            "SELECT name, token, token_dict, endpoint FROM accounts ORDER BY name",
        )
    }

    fn select_accounts(&self, sql: &str) -> Result<Vec<Account>> {
        let mut stmt = self.conn.prepare(sql)?;
        let accounts = stmt
            .query_map([], account_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(accounts)
    }
}

// Maintenance
impl Store {
    /// Delete every document of one collection.
    pub fn clear(&self, collection: Collection) -> Result<usize> {
        let deleted = self
            .conn
            .execute(&format!("DELETE FROM {}", collection.table()), [])?;
        info!("Deleted {} documents from {}", deleted, collection);
        Ok(deleted)
    }

    /// Delete every document of every collection.
    pub fn clear_all(&self) -> Result<usize> {
        self.with_transaction(|store| {
            Collection::ALL
                .into_iter()
                .try_fold(0usize, |total, collection| -> Result<usize> {
                    Ok(total + store.clear(collection)?)
                })
        })
    }

    /// Number of documents in each collection.
    pub fn collection_counts(&self) -> Result<CollectionCounts> {
        let count = |collection: Collection| -> Result<u64> {
            let n: i64 = self.conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", collection.table()),
                [],
                |row| row.get(0),
            )?;
            Ok(n as u64)
        };

        Ok(CollectionCounts {
            accounts: count(Collection::Accounts)?,
            things: count(Collection::Things)?,
            states: count(Collection::States)?,
            calls: count(Collection::Calls)?,
        })
    }
}
