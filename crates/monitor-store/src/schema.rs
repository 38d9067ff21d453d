//! Database schema and migrations.

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn initialize(conn: &Connection) -> Result<()> {
    let version = get_schema_version(conn)?;

    if version == 0 {
        create_schema_v1(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if version < SCHEMA_VERSION {
        migrate(conn, version)?;
    }

    Ok(())
}

/// Get the current schema version.
fn get_schema_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 =
        conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?;

    Ok(version)
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?)",
        [version],
    )?;
    Ok(())
}

/// Create the initial schema (version 1).
///
/// Instants are whole Unix seconds (UTC).
fn create_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );

        -- Connected accounts; token is NULL until the account is authorized
        CREATE TABLE IF NOT EXISTS accounts (
            name TEXT PRIMARY KEY,
            token TEXT UNIQUE,
            token_dict TEXT,
            endpoint TEXT,
            created_at INTEGER NOT NULL
        );

        -- Things, partitioned per account token
        CREATE TABLE IF NOT EXISTS things (
            token TEXT NOT NULL,
            id TEXT NOT NULL,
            label TEXT,
            capabilities TEXT NOT NULL DEFAULT '[]',
            active INTEGER NOT NULL DEFAULT 1,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (token, id)
        );
        CREATE INDEX IF NOT EXISTS idx_things_token_active
            ON things(token, active);

        -- States; the primary key is the natural key reconciliation upserts on
        CREATE TABLE IF NOT EXISTS states (
            thing_id TEXT NOT NULL,
            state TEXT NOT NULL,
            date INTEGER NOT NULL,
            value TEXT NOT NULL,
            unit TEXT,
            synced_at INTEGER NOT NULL,
            PRIMARY KEY (thing_id, state, date)
        );
        CREATE INDEX IF NOT EXISTS idx_states_thing_date
            ON states(thing_id, date);

        -- Last successful fetch per query shape
        CREATE TABLE IF NOT EXISTS calls (
            shape TEXT PRIMARY KEY,
            function TEXT NOT NULL,
            kind TEXT,
            thing_id TEXT,
            state TEXT,
            token TEXT NOT NULL,
            date INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_calls_token
            ON calls(token);
        "#,
    )?;

    Ok(())
}

/// Run migrations from old_version to current.
fn migrate(conn: &Connection, old_version: i32) -> Result<()> {
    // if old_version < 2 { migrate_to_v2(conn)?; }
    let _ = old_version;
    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in ["accounts", "things", "states", "calls", "schema_version"] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn test_schema_version_tracking() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 0);

        initialize(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);

        // Re-initializing an up-to-date database is a no-op
        initialize(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }
}
