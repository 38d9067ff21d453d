//! Record types for the telemetry sync engine.
//!
//! This crate holds the types shared by the local store (`monitor-store`)
//! and the synchronization engine (`monitor-core`).
//!
//! # Features
//!
//! - [`Thing`], [`State`] and [`Account`] records with their remote parsing rules
//! - [`QueryShape`], the order-independent key freshness is tracked against
//! - Strict parsing of the remote `YYYY-MM-DDTHH:MM:SSZ` timestamp format
//!
//! # Example
//!
//! ```
//! use monitor_types::{QueryShape, Thing};
//! use serde_json::json;
//!
//! let thing = Thing::from_remote("tok1", &json!({"id": "d1", "label": "Outdoor"})).unwrap();
//! assert!(thing.active);
//!
//! let shape = QueryShape::states("tok1", "d1", Some("temperature"));
//! assert_eq!(shape.function(), "states");
//! ```

pub mod error;
pub mod shape;
pub mod timestamp;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use shape::{FUNCTION_STATES, FUNCTION_THINGS, QueryShape};
pub use timestamp::{
    EPOCH_SENTINEL, from_unix_seconds, parse_remote_timestamp, truncate_to_seconds,
};
pub use types::{Account, Capability, State, Thing};
