//! Local data persistence for synchronized telemetry.
//!
//! This crate provides SQLite-based storage for the records the sync engine
//! reconciles from the remote API, so reads are served locally.
//!
//! # Features
//!
//! - Things partitioned per account token, with an `active` membership flag
//! - States keyed by `(thing_id, state, date)` so overlapping fetches are idempotent
//! - Call records: the last successful fetch time per query shape
//! - Accounts holding the token and discovered endpoint
//! - Query by thing, attribute and half-open time range
//!
//! # Example
//!
//! ```no_run
//! use monitor_store::{StateQuery, Store};
//!
//! let store = Store::open_default()?;
//!
//! let query = StateQuery::new()
//!     .thing("d1")
//!     .state("temperature")
//!     .limit(10);
//! let states = store.query_states(&query)?;
//! # Ok::<(), monitor_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::{CallRecord, Collection, CollectionCounts, StatesRange};
pub use queries::{StateQuery, ThingQuery};
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/monitor/data.db`
/// - macOS: `~/Library/Application Support/monitor/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\monitor\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("monitor")
        .join("data.db")
}
