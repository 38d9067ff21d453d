//! Scheduled sync passes over every connected account.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use monitor_core::{StateSelector, SyncEngine, UpdateSummary};
use monitor_store::CollectionCounts;
use monitor_types::Account;

use crate::config::Config;

/// Runs sync passes on a fixed interval until the engine is cancelled.
pub struct Collector {
    engine: Arc<SyncEngine>,
    selectors: Vec<StateSelector>,
    interval: Duration,
    concurrency: usize,
}

/// Outcome of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Accounts holding a token when the pass started.
    pub accounts: usize,
    /// Accounts whose sync failed.
    pub failed: usize,
    /// Totals over the accounts that synced.
    pub summary: UpdateSummary,
    pub before: CollectionCounts,
    pub after: CollectionCounts,
}

impl Collector {
    /// Create a collector for the `[schedule]` and `[sync]` sections.
    pub fn new(engine: Arc<SyncEngine>, config: &Config) -> Self {
        Self {
            engine,
            selectors: config.schedule.selectors(),
            interval: config.schedule.interval(),
            concurrency: config.sync.concurrency.max(1),
        }
    }

    /// Replace the selectors synced each pass.
    #[must_use]
    pub fn with_selectors(mut self, selectors: Vec<StateSelector>) -> Self {
        self.selectors = selectors;
        self
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Run passes until the engine's cancellation token fires.
    ///
    /// The first pass starts immediately.
    pub async fn run(&self) {
        let cancel = self.engine.cancellation_token().clone();
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Starting collector (interval: {}s, selectors: {})",
            self.interval.as_secs(),
            self.selectors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.run_once().await {
                Ok(report) => info!(
                    "Sync pass finished: {} accounts, {} failed, {} new states",
                    report.accounts, report.failed, report.summary.inserted
                ),
                Err(e) => error!("Sync pass failed: {}", e),
            }
        }

        info!("Collector stopped");
    }

    /// Sync every connected account once.
    ///
    /// A failing account is logged and counted; the pass continues with the
    /// others.
    pub async fn run_once(&self) -> Result<PassReport, CollectorError> {
        let before = self.counts().await?;
        log_counts(&before);

        let accounts = self.engine.accounts().await?;
        let results: Vec<_> = stream::iter(accounts.iter().cloned())
            .map(|account| async move {
                let result = self.sync_account(&account).await;
                (account, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = PassReport {
            accounts: accounts.len(),
            ..Default::default()
        };
        for (account, result) in results {
            match result {
                Ok(summary) => report.summary += summary,
                Err(CollectorError::Engine(monitor_core::Error::Unauthorized)) => {
                    report.failed += 1;
                    warn!(
                        "Token of account {} was rejected; reconnect the account",
                        account.name
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    warn!("Failed to sync account {}: {}", account.name, e);
                }
            }
        }

        report.before = before;
        report.after = self.counts().await?;
        log_counts(&report.after);
        Ok(report)
    }

    /// Sync one account for every configured selector.
    pub async fn sync_account(&self, account: &Account) -> Result<UpdateSummary, CollectorError> {
        let token = account
            .token
            .as_deref()
            .ok_or_else(|| CollectorError::NotConnected(account.name.clone()))?;
        let ctx = self.engine.connect(token).await?;

        let mut total = UpdateSummary::default();
        for selector in &self.selectors {
            debug!("Syncing account {} ({})", account.name, selector);
            total += self.engine.update_account(&ctx, selector).await?;
        }
        Ok(total)
    }

    async fn counts(&self) -> Result<CollectionCounts, CollectorError> {
        Ok(self.engine.store().lock().await.collection_counts()?)
    }
}

fn log_counts(counts: &CollectionCounts) {
    for line in counts.to_string().lines() {
        info!("{}", line);
    }
}

/// Collector errors.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Account {0} has no token")]
    NotConnected(String),
    #[error("Sync failed: {0}")]
    Engine(#[from] monitor_core::Error),
    #[error("Failed to read store: {0}")]
    Store(#[from] monitor_store::Error),
}
