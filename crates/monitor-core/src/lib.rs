//! Cache-first synchronization with a rate-limited telemetry API.
//!
//! This crate keeps a local copy of things and their states up to date with
//! a remote API that throttles clients, and answers queries from that copy.
//!
//! # Features
//!
//! - **Freshness tracking**: one call record per query shape decides when a
//!   remote call is due
//! - **Rate-limited fetching**: HTTP 429 responses are waited out using the
//!   `x-ratelimit-ttl` header, within configurable bounds
//! - **Reconciliation**: fetched pages are merged by natural key, malformed
//!   items are skipped
//! - **Incremental reads**: state fetches ask only for what arrived since the
//!   previous successful fetch
//! - **Per-shape leases**: concurrent callers of the same query make one
//!   remote call
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use monitor_core::{Fetcher, HttpTransport, SyncEngine, SyncSettings, ThrottlePolicy};
//! use monitor_store::Store;
//! use tokio::sync::Mutex;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(Mutex::new(Store::open_default()?));
//!     let transport = Arc::new(HttpTransport::new(Duration::from_secs(30))?);
//!     let fetcher = Fetcher::new(transport, ThrottlePolicy::default());
//!     let engine = SyncEngine::new(store, fetcher, SyncSettings::default());
//!
//!     for account in engine.accounts().await? {
//!         let Some(token) = account.token.as_deref() else { continue };
//!         let ctx = engine.connect(token).await?;
//!         for thing in engine.things(&ctx, "temperature", false).await? {
//!             if let Some(range) = engine.states_range(&ctx, &thing.id, Some("temperature")).await? {
//!                 println!("{}: {} .. {}", thing.display_name(), range.min, range.max);
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod error;
pub mod fetcher;
pub mod freshness;
pub mod lease;
pub mod mock;
pub mod reconcile;
pub mod series;
pub mod transport;

pub use engine::{
    ApiContext, DEFAULT_ENDPOINTS_URL, RefreshOutcome, StateSelector, SyncEngine, SyncSettings,
    UpdateSummary,
};
pub use error::{Error, Result};
pub use fetcher::{Fetched, Fetcher, ThrottlePolicy};
pub use lease::{ShapeLease, ShapeLeases};
pub use mock::MockTransport;
pub use reconcile::{ReconcileCounts, parse_page, reconcile_states, reconcile_things};
pub use series::{SeriesOptions, SeriesPoint};
pub use transport::{
    DEFAULT_REQUEST_TIMEOUT, HttpRequest, HttpTransport, RateLimit, RawResponse, Transport,
};

// Re-export the crates callers need alongside the engine.
pub use monitor_store;
pub use monitor_types;
