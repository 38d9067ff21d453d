//! Sync orchestration: serve queries from the local store, refreshing it
//! from the remote API when a query shape is stale.
//!
//! Every operation follows the same path:
//!
//! 1. Take the lease of the query shape.
//! 2. Compare the shape's last fetch against its freshness window.
//! 3. If stale, fetch (waiting out rate limits), reconcile the page and mark
//!    the shape fetched, all before the lease is released.
//! 4. Answer from the local store.
//!
//! A failed fetch propagates and leaves the shape unmarked; the stored data
//! is never served in its place.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use monitor_store::{StateQuery, StatesRange, Store, ThingQuery};
use monitor_types::{Account, QueryShape, State, Thing, truncate_to_seconds};

use crate::error::{Error, Result};
use crate::fetcher::Fetcher;
use crate::freshness;
use crate::lease::ShapeLeases;
use crate::reconcile::{self, ReconcileCounts};
use crate::transport::HttpRequest;

/// Discovery document listing the endpoints granted to a token.
pub const DEFAULT_ENDPOINTS_URL: &str = "https://graph.api.smartthings.com/api/smartapps/endpoints";

/// Freshness windows and endpoints used by a [`SyncEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// How long a thing listing stays fresh.
    pub things_freshness: Duration,
    /// How long a states read stays fresh.
    pub states_freshness: Duration,
    /// Endpoint discovery URL.
    pub endpoints_url: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            things_freshness: Duration::from_secs(10 * 60),
            states_freshness: Duration::from_secs(120 * 60),
            endpoints_url: DEFAULT_ENDPOINTS_URL.to_string(),
        }
    }
}

/// Access token and API endpoint for one account.
///
/// Immutable; build a new context when the token is refreshed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiContext {
    token: String,
    endpoint: String,
}

impl ApiContext {
    pub fn new(token: &str, endpoint: &str) -> Self {
        Self {
            token: token.to_string(),
            endpoint: endpoint.to_string(),
        }
    }

    /// Context of an account whose endpoint is already known.
    pub fn from_account(account: &Account) -> Option<Self> {
        match (&account.token, &account.endpoint) {
            (Some(token), Some(endpoint)) => Some(Self::new(token, endpoint)),
            _ => None,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Which attributes an account update pass reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StateSelector {
    /// Every attribute of every active thing.
    All,
    /// One attribute, on things of the matching kind.
    Named(String),
}

impl StateSelector {
    /// The `kind` of thing listing this selector refreshes.
    pub fn kind(&self) -> &str {
        match self {
            StateSelector::All => "all",
            StateSelector::Named(name) => name,
        }
    }
}

impl fmt::Display for StateSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

impl FromStr for StateSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" => Err(Error::InvalidConfig("empty state selector".to_string())),
            "all" => Ok(StateSelector::All),
            name => Ok(StateSelector::Named(name.to_string())),
        }
    }
}

/// Whether a refresh went to the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The shape was fresh; nothing was fetched.
    Fresh,
    /// A page was fetched and reconciled.
    Fetched(ReconcileCounts),
}

/// Totals of one account update pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateSummary {
    /// Active things visited.
    pub things: usize,
    /// State shapes fetched from the remote API.
    pub fetched: usize,
    /// State shapes still fresh.
    pub fresh: usize,
    pub inserted: usize,
    pub replaced: usize,
    pub skipped: usize,
}

impl UpdateSummary {
    fn add(&mut self, outcome: RefreshOutcome) {
        match outcome {
            RefreshOutcome::Fresh => self.fresh += 1,
            RefreshOutcome::Fetched(counts) => {
                self.fetched += 1;
                self.inserted += counts.inserted;
                self.replaced += counts.replaced;
                self.skipped += counts.skipped;
            }
        }
    }
}

impl std::ops::AddAssign for UpdateSummary {
    fn add_assign(&mut self, other: Self) {
        self.things += other.things;
        self.fetched += other.fetched;
        self.fresh += other.fresh;
        self.inserted += other.inserted;
        self.replaced += other.replaced;
        self.skipped += other.skipped;
    }
}

/// Serves things and states from the local store, keeping it in sync with
/// the remote API.
pub struct SyncEngine {
    store: Arc<Mutex<Store>>,
    fetcher: Fetcher,
    leases: ShapeLeases,
    settings: SyncSettings,
    cancel: CancellationToken,
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("fetcher", &self.fetcher)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn new(store: Arc<Mutex<Store>>, fetcher: Fetcher, settings: SyncSettings) -> Self {
        Self {
            store,
            fetcher,
            leases: ShapeLeases::new(),
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `cancel` to interrupt rate-limit waits on shutdown.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn store(&self) -> &Arc<Mutex<Store>> {
        &self.store
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Every account that holds a token.
    pub async fn accounts(&self) -> Result<Vec<Account>> {
        Ok(self.store.lock().await.accounts()?)
    }

    /// Build the context for `token`, discovering and saving its endpoint
    /// on first use.
    pub async fn connect(&self, token: &str) -> Result<ApiContext> {
        let account = self
            .store
            .lock()
            .await
            .get_account_by_token(token)?
            .ok_or(Error::NotConnected)?;

        if let Some(endpoint) = account.endpoint.as_deref() {
            return Ok(ApiContext::new(token, endpoint));
        }

        let endpoint = self
            .fetcher
            .discover_endpoint(&self.settings.endpoints_url, token, &self.cancel)
            .await?;
        self.store
            .lock()
            .await
            .set_account_endpoint(token, &endpoint)?;
        info!("Discovered endpoint for account {}", account.name);

        Ok(ApiContext::new(token, &endpoint))
    }

    /// Active things of the account.
    ///
    /// The listing of `kind` is refetched when older than the things window,
    /// or unconditionally with `refresh`. A refetch replaces the account's
    /// active set with the listing.
    pub async fn things(&self, ctx: &ApiContext, kind: &str, refresh: bool) -> Result<Vec<Thing>> {
        self.refresh_things(ctx, kind, refresh).await?;
        let store = self.store.lock().await;
        Ok(store.query_things(&ThingQuery::new().token(ctx.token()).active(true))?)
    }

    /// One stored thing of the account, active or not. Never fetches.
    pub async fn thing(&self, ctx: &ApiContext, id: &str) -> Result<Option<Thing>> {
        Ok(self.store.lock().await.get_thing(ctx.token(), id)?)
    }

    /// States of one thing, optionally one attribute, oldest first.
    ///
    /// `since` is inclusive and `until` exclusive. They filter the local
    /// answer only; the remote request asks for everything since the shape
    /// was last fetched.
    pub async fn states(
        &self,
        ctx: &ApiContext,
        thing_id: &str,
        state: Option<&str>,
        since: Option<OffsetDateTime>,
        until: Option<OffsetDateTime>,
    ) -> Result<Vec<State>> {
        self.refresh_states(ctx, thing_id, state).await?;

        let mut query = StateQuery::new().thing(thing_id).maybe_state(state);
        if let Some(since) = since {
            query = query.since(since);
        }
        if let Some(until) = until {
            query = query.until(until);
        }
        let store = self.store.lock().await;
        Ok(store.query_states(&query)?)
    }

    /// Earliest and latest stored state after a refresh, `None` when there
    /// are none.
    pub async fn states_range(
        &self,
        ctx: &ApiContext,
        thing_id: &str,
        state: Option<&str>,
    ) -> Result<Option<StatesRange>> {
        self.refresh_states(ctx, thing_id, state).await?;
        Ok(self.store.lock().await.state_extent(thing_id, state)?)
    }

    /// Refresh the thing listing and then the states of every active thing.
    pub async fn update_account(
        &self,
        ctx: &ApiContext,
        selector: &StateSelector,
    ) -> Result<UpdateSummary> {
        let things = self.things(ctx, selector.kind(), false).await?;
        let mut summary = UpdateSummary {
            things: things.len(),
            ..Default::default()
        };

        for thing in &things {
            let attributes: Vec<String> = match selector {
                StateSelector::All => thing.attributes().into_iter().collect(),
                StateSelector::Named(name) => vec![name.clone()],
            };
            debug!(
                "Updating {} attributes of {}",
                attributes.len(),
                thing.display_name()
            );
            for attribute in &attributes {
                let outcome = self
                    .refresh_states(ctx, &thing.id, Some(attribute))
                    .await?;
                summary.add(outcome);
            }
        }

        info!(
            "Updated {} things ({}): {} shapes fetched, {} fresh, {} new states",
            summary.things, selector, summary.fetched, summary.fresh, summary.inserted
        );
        Ok(summary)
    }

    /// Refetch the thing listing of `kind` if stale.
    pub async fn refresh_things(
        &self,
        ctx: &ApiContext,
        kind: &str,
        refresh: bool,
    ) -> Result<RefreshOutcome> {
        let window = if refresh {
            Duration::ZERO
        } else {
            self.settings.things_freshness
        };
        let shape = QueryShape::things(ctx.token(), kind);
        self.refresh(ctx, &shape, window, false, |store, page| {
            reconcile::reconcile_things(store, ctx.token(), page)
        })
        .await
    }

    /// Refetch the states of one thing if stale.
    pub async fn refresh_states(
        &self,
        ctx: &ApiContext,
        thing_id: &str,
        state: Option<&str>,
    ) -> Result<RefreshOutcome> {
        let shape = QueryShape::states(ctx.token(), thing_id, state);
        self.refresh(
            ctx,
            &shape,
            self.settings.states_freshness,
            true,
            |store, page| reconcile::reconcile_states(store, thing_id, state, page),
        )
        .await
    }

    async fn refresh<F>(
        &self,
        ctx: &ApiContext,
        shape: &QueryShape,
        window: Duration,
        incremental: bool,
        apply: F,
    ) -> Result<RefreshOutcome>
    where
        F: FnOnce(&Store, &[Value]) -> Result<ReconcileCounts>,
    {
        let _lease = self.leases.acquire(shape).await;

        let now = truncate_to_seconds(OffsetDateTime::now_utc());
        let last = freshness::last_fetch(&*self.store.lock().await, shape)?;
        if !freshness::is_stale(last, now, window) {
            debug!(
                "Skipping; got {} within {} minutes.",
                shape.function(),
                window.as_secs() / 60
            );
            return Ok(RefreshOutcome::Fresh);
        }

        let mut request = HttpRequest::new(ctx.endpoint(), ctx.token()).params(shape.request_params());
        if incremental {
            request = request.param("since", last.unix_timestamp().to_string());
        }

        let fetched = self.fetcher.fetch(&request, &self.cancel).await?;
        let page = reconcile::parse_page(&fetched.response.body)?;

        let store = self.store.lock().await;
        let counts = store.with_transaction(|store| -> Result<ReconcileCounts> {
            let counts = apply(store, &page)?;
            freshness::mark_fetched(store, shape, now)?;
            Ok(counts)
        })?;

        Ok(RefreshOutcome::Fetched(counts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::ThrottlePolicy;
    use crate::mock::MockTransport;
    use monitor_types::EPOCH_SENTINEL;
    use serde_json::json;

    const ENDPOINT: &str = "https://api.test/installations/1/endpoint";

    fn engine() -> (SyncEngine, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let store = Store::open_in_memory().unwrap();
        let engine = SyncEngine::new(
            Arc::new(Mutex::new(store)),
            Fetcher::new(transport.clone(), ThrottlePolicy::default()),
            SyncSettings::default(),
        );
        (engine, transport)
    }

    #[test]
    fn test_settings_default() {
        let settings = SyncSettings::default();
        assert_eq!(settings.things_freshness, Duration::from_secs(600));
        assert_eq!(settings.states_freshness, Duration::from_secs(7200));
        assert_eq!(settings.endpoints_url, DEFAULT_ENDPOINTS_URL);
    }

    #[test]
    fn test_state_selector_parse() {
        assert_eq!("all".parse::<StateSelector>().unwrap(), StateSelector::All);
        assert_eq!(
            "temperature".parse::<StateSelector>().unwrap(),
            StateSelector::Named("temperature".to_string())
        );
        assert!(" ".parse::<StateSelector>().is_err());
        assert_eq!(StateSelector::All.kind(), "all");
        assert_eq!(StateSelector::Named("humidity".into()).to_string(), "humidity");
    }

    #[test]
    fn test_context_from_account() {
        let mut account = Account::new("home", "tok1");
        assert_eq!(ApiContext::from_account(&account), None);
        account.endpoint = Some(ENDPOINT.to_string());
        let ctx = ApiContext::from_account(&account).unwrap();
        assert_eq!(ctx.token(), "tok1");
        assert_eq!(ctx.endpoint(), ENDPOINT);
    }

    #[tokio::test]
    async fn test_first_states_fetch_sends_sentinel_since() {
        let (engine, transport) = engine();
        transport.push_json(&json!([]));
        let ctx = ApiContext::new("tok1", ENDPOINT);

        engine.states(&ctx, "d1", Some("temperature"), None, None).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let since = EPOCH_SENTINEL.unix_timestamp().to_string();
        assert_eq!(requests[0].get_param("since"), Some(since.as_str()));
        assert_eq!(requests[0].get_param("function"), Some("states"));
        assert_eq!(requests[0].get_param("thing_id"), Some("d1"));
        assert_eq!(requests[0].get_param("state"), Some("temperature"));
        assert_eq!(requests[0].get_param("token"), None);
        assert_eq!(requests[0].token, "tok1");
        assert_eq!(requests[0].url, ENDPOINT);
    }

    #[tokio::test]
    async fn test_things_request_has_no_since() {
        let (engine, transport) = engine();
        transport.push_json(&json!([{"id": "d1"}]));
        let ctx = ApiContext::new("tok1", ENDPOINT);

        let things = engine.things(&ctx, "all", false).await.unwrap();
        assert_eq!(things.len(), 1);

        let requests = transport.requests();
        assert_eq!(requests[0].get_param("since"), None);
        assert_eq!(requests[0].get_param("kind"), Some("all"));
    }

    #[tokio::test]
    async fn test_invalid_payload_does_not_mark() {
        let (engine, transport) = engine();
        transport.push_json(&json!({"unexpected": true}));
        let ctx = ApiContext::new("tok1", ENDPOINT);

        let err = engine.things(&ctx, "all", false).await.unwrap_err();
        assert!(matches!(err, Error::InvalidPayload(_)));

        let store = engine.store().lock().await;
        let shape = QueryShape::things("tok1", "all");
        assert_eq!(store.get_call_date(&shape).unwrap(), None);
    }

    #[tokio::test]
    async fn test_thing_reads_locally() {
        let (engine, transport) = engine();
        transport.push_json(&json!([{"id": "d1", "label": "Outdoor"}]));
        let ctx = ApiContext::new("tok1", ENDPOINT);
        engine.things(&ctx, "all", false).await.unwrap();

        let thing = engine.thing(&ctx, "d1").await.unwrap().unwrap();
        assert_eq!(thing.display_name(), "Outdoor");
        assert!(engine.thing(&ctx, "missing").await.unwrap().is_none());
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_requires_account() {
        let (engine, _transport) = engine();
        assert!(matches!(
            engine.connect("unknown").await,
            Err(Error::NotConnected)
        ));
    }
}
