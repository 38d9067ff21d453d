//! Data models for stored bookkeeping.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::Error;

/// Earliest and latest instants stored for a thing (and attribute).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatesRange {
    /// Earliest stored state.
    #[serde(with = "time::serde::rfc3339")]
    pub min: OffsetDateTime,
    /// Latest stored state.
    #[serde(with = "time::serde::rfc3339")]
    pub max: OffsetDateTime,
}

/// Bookkeeping row: when a query shape was last fetched successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Canonical shape key.
    pub shape: String,
    /// `function` parameter of the shape.
    pub function: String,
    /// `kind` parameter for thing listings.
    pub kind: Option<String>,
    /// Thing id for state reads.
    pub thing_id: Option<String>,
    /// Attribute name for state reads.
    pub state: Option<String>,
    /// Account token.
    pub token: String,
    /// Time of the last successful call.
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
}

/// Collections the sync engine maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Accounts,
    Things,
    States,
    Calls,
}

impl Collection {
    /// Every collection, in report order.
    pub const ALL: [Collection; 4] = [
        Collection::Accounts,
        Collection::Things,
        Collection::States,
        Collection::Calls,
    ];

    pub(crate) fn table(self) -> &'static str {
        match self {
            Collection::Accounts => "accounts",
            Collection::Things => "things",
            Collection::States => "states",
            Collection::Calls => "calls",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

impl FromStr for Collection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .into_iter()
            .find(|c| c.table().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnknownCollection(s.to_string()))
    }
}

/// Document counts per collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionCounts {
    pub accounts: u64,
    pub things: u64,
    pub states: u64,
    pub calls: u64,
}

impl CollectionCounts {
    /// Count for one collection.
    pub fn get(&self, collection: Collection) -> u64 {
        match collection {
            Collection::Accounts => self.accounts,
            Collection::Things => self.things,
            Collection::States => self.states,
            Collection::Calls => self.calls,
        }
    }
}

impl fmt::Display for CollectionCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, collection) in Collection::ALL.into_iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(
                f,
                "Collection {} has {} documents.",
                collection,
                self.get(collection)
            )?;
        }
        Ok(())
    }
}
