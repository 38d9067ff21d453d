//! Scheduled sync and command line for the monitor telemetry cache.
//!
//! This crate provides a service that:
//! - Syncs every connected account on a schedule
//! - Keeps the local database the source of every answer it prints
//! - Registers accounts and clears collections from the command line
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/monitor/service.toml`:
//!
//! ```toml
//! [storage]
//! path = "~/.local/share/monitor/data.db"
//!
//! [api]
//! endpoints_url = "https://graph.api.smartthings.com/api/smartapps/endpoints"
//! timeout_secs = 30
//!
//! [sync]
//! things_freshness_mins = 10
//! states_freshness_mins = 120
//! max_throttle_attempts = 20
//! concurrency = 2
//!
//! [schedule]
//! interval_secs = 43200
//! selectors = ["all", "temperature"]
//! ```

pub mod collector;
pub mod config;

pub use collector::{Collector, CollectorError, PassReport};
pub use config::{
    ApiConfig, Config, ConfigError, ScheduleConfig, StorageConfig, SyncConfig, ValidationError,
    default_config_path,
};
