//! Monitor Service - scheduled telemetry sync and local queries.
//!
//! Run with: `cargo run -p monitor-service`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use monitor_core::series::{self, SeriesOptions};
use monitor_core::{Fetcher, HttpTransport, StateSelector, SyncEngine};
use monitor_service::{Collector, Config};
use monitor_store::{Collection, Store};
use monitor_types::Account;

/// Monitor Service - keeps a local copy of remote telemetry in sync.
#[derive(Parser, Debug)]
#[command(name = "monitor-service")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path (overrides config).
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run scheduled sync passes in the foreground (default behavior).
    Run,

    /// Run one sync pass over every connected account and exit.
    Sync {
        /// State selector ("all" or an attribute name); repeatable.
        #[arg(short, long = "selector")]
        selectors: Vec<String>,
    },

    /// Print document counts of every collection.
    Stats,

    /// Manage accounts.
    Account {
        #[command(subcommand)]
        action: AccountAction,
    },

    /// List active things of an account.
    Things {
        /// Access token of the account.
        #[arg(long)]
        token: String,
        /// Kind of things to refresh.
        #[arg(long, default_value = "all")]
        kind: String,
        /// Refetch the listing even if it is fresh.
        #[arg(long)]
        refresh: bool,
    },

    /// Print states of one thing.
    States {
        #[arg(long)]
        token: String,
        /// Thing id.
        #[arg(long)]
        thing: String,
        /// Attribute name.
        #[arg(long)]
        state: Option<String>,
        /// Inclusive lower bound (RFC 3339).
        #[arg(long, value_parser = parse_time)]
        since: Option<OffsetDateTime>,
        /// Exclusive upper bound (RFC 3339).
        #[arg(long, value_parser = parse_time)]
        until: Option<OffsetDateTime>,
    },

    /// Print the earliest and latest stored state of one thing.
    Range {
        #[arg(long)]
        token: String,
        #[arg(long)]
        thing: String,
        #[arg(long)]
        state: Option<String>,
    },

    /// Print one attribute of several things as a flat series.
    Series {
        #[arg(long)]
        token: String,
        #[arg(long, default_value = "temperature")]
        kind: String,
        #[arg(long, default_value = "temperature")]
        state: String,
        #[arg(long, value_parser = parse_time)]
        since: Option<OffsetDateTime>,
        #[arg(long, value_parser = parse_time)]
        until: Option<OffsetDateTime>,
        /// Maximum number of things.
        #[arg(long, default_value_t = 5)]
        max_things: usize,
        /// Drop values at or above this.
        #[arg(long, default_value_t = 150.0, conflicts_with = "no_ceiling")]
        ceiling: f64,
        /// Keep every value.
        #[arg(long)]
        no_ceiling: bool,
    },

    /// Delete documents of one collection, or of all of them.
    Clear {
        /// accounts, things, states or calls.
        collection: Option<Collection>,
    },
}

#[derive(Subcommand, Debug)]
enum AccountAction {
    /// Register an account with an access token.
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        token: String,
        /// API endpoint, if already known (skips discovery).
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// List registered accounts.
    List,
}

fn parse_time(s: &str) -> Result<OffsetDateTime, String> {
    OffsetDateTime::parse(s, &Rfc3339).map_err(|e| format!("invalid RFC 3339 time '{}': {}", s, e))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("monitor_service=info".parse()?)
                .add_directive("monitor_core=info".parse()?),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    if let Some(db_path) = args.database {
        config.storage.path = db_path;
    }
    config.validate()?;

    let store = Store::open(&config.storage.path)
        .with_context(|| format!("opening {}", config.storage.path.display()))?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(&config, store).await,
        Command::Sync { selectors } => sync(&config, store, &selectors).await,
        Command::Stats => {
            println!("{}", store.collection_counts()?);
            Ok(())
        }
        Command::Account { action } => account(&store, action),
        Command::Clear { collection } => {
            let deleted = match collection {
                Some(collection) => store.clear(collection)?,
                None => store.clear_all()?,
            };
            println!("Deleted {} documents", deleted);
            Ok(())
        }
        Command::Things {
            token,
            kind,
            refresh,
        } => {
            let engine = build_engine(&config, store, CancellationToken::new())?;
            let ctx = engine.connect(&token).await?;
            print_json(&engine.things(&ctx, &kind, refresh).await?)
        }
        Command::States {
            token,
            thing,
            state,
            since,
            until,
        } => {
            let engine = build_engine(&config, store, CancellationToken::new())?;
            let ctx = engine.connect(&token).await?;
            let states = engine
                .states(&ctx, &thing, state.as_deref(), since, until)
                .await?;
            print_json(&states)
        }
        Command::Range {
            token,
            thing,
            state,
        } => {
            let engine = build_engine(&config, store, CancellationToken::new())?;
            let ctx = engine.connect(&token).await?;
            match engine.states_range(&ctx, &thing, state.as_deref()).await? {
                Some(range) => print_json(&range),
                None => {
                    println!("No states stored for {}", thing);
                    Ok(())
                }
            }
        }
        Command::Series {
            token,
            kind,
            state,
            since,
            until,
            max_things,
            ceiling,
            no_ceiling,
        } => {
            let engine = build_engine(&config, store, CancellationToken::new())?;
            let ctx = engine.connect(&token).await?;
            let options = SeriesOptions {
                kind,
                state,
                since,
                until,
                max_things,
                ceiling: (!no_ceiling).then_some(ceiling),
            };
            print_json(&series::collect(&engine, &ctx, &options).await?)
        }
    }
}

fn build_engine(
    config: &Config,
    store: Store,
    cancel: CancellationToken,
) -> anyhow::Result<Arc<SyncEngine>> {
    let transport = Arc::new(HttpTransport::new(config.api.timeout())?);
    let fetcher = Fetcher::new(transport, config.sync.throttle_policy());
    let engine = SyncEngine::new(Arc::new(Mutex::new(store)), fetcher, config.sync_settings())
        .with_cancellation(cancel);
    Ok(Arc::new(engine))
}

/// Cancel `cancel` on Ctrl-C.
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutting down");
                cancel.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });
}

async fn run(config: &Config, store: Store) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let engine = build_engine(config, store, cancel)?;
    Collector::new(engine, config).run().await;
    Ok(())
}

async fn sync(config: &Config, store: Store, selectors: &[String]) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let engine = build_engine(config, store, cancel)?;
    let mut collector = Collector::new(engine, config);
    if !selectors.is_empty() {
        let selectors = selectors
            .iter()
            .map(|s| s.parse::<StateSelector>())
            .collect::<Result<Vec<_>, _>>()?;
        collector = collector.with_selectors(selectors);
    }

    let report = collector.run_once().await?;
    print_json(&report)
}

fn account(store: &Store, action: AccountAction) -> anyhow::Result<()> {
    match action {
        AccountAction::Add {
            name,
            token,
            endpoint,
        } => {
            let account = Account {
                endpoint,
                ..Account::new(&name, &token)
            };
            store.upsert_account(&account)?;
            println!("Saved account {}", name);
        }
        AccountAction::List => {
            let accounts = store.list_accounts()?;
            if accounts.is_empty() {
                println!("No accounts registered");
            }
            for account in accounts {
                println!(
                    "{:<20} {:<13} {}",
                    account.name,
                    if account.token.is_some() {
                        "connected"
                    } else {
                        "not connected"
                    },
                    account.endpoint.as_deref().unwrap_or("-")
                );
            }
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
