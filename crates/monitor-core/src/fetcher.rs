//! Rate-limited fetching from the remote API.
//!
//! The source answers HTTP 429 while a client is over quota and reports the
//! seconds until the quota window resets in `x-ratelimit-ttl`. [`Fetcher`]
//! waits that long (or a minimum backoff when the header is missing or zero)
//! and repeats the identical request until a non-429 status arrives, within
//! the bounds of a [`ThrottlePolicy`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use monitor_core::{Fetcher, HttpRequest, MockTransport, ThrottlePolicy};
//! use serde_json::json;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> monitor_core::Result<()> {
//! let transport = Arc::new(MockTransport::new());
//! transport.push_json(&json!([]));
//!
//! let fetcher = Fetcher::new(transport.clone(), ThrottlePolicy::default());
//! let request = HttpRequest::new("https://api.test/endpoint", "tok1");
//! let fetched = fetcher.fetch(&request, &CancellationToken::new()).await?;
//! assert_eq!(fetched.attempts, 1);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::transport::{HttpRequest, RawResponse, Transport};

/// How long and how often to wait out HTTP 429 responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottlePolicy {
    /// Requests to issue before giving up with [`Error::Throttled`]
    /// (`None` keeps trying until cancelled).
    pub max_attempts: Option<u32>,
    /// Wait used when the source sends no positive `x-ratelimit-ttl`.
    pub min_backoff: Duration,
    /// Upper bound on the total time spent waiting, [`Error::Timeout`] past it.
    pub max_wait: Option<Duration>,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(20),
            min_backoff: Duration::from_secs(1),
            max_wait: None,
        }
    }
}

impl ThrottlePolicy {
    /// Create a policy giving up after `max_attempts` requests.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            ..Default::default()
        }
    }

    /// Keep waiting as long as the source keeps throttling.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            ..Default::default()
        }
    }

    /// Set the maximum number of requests.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Set the fallback wait.
    #[must_use]
    pub fn min_backoff(mut self, delay: Duration) -> Self {
        self.min_backoff = delay;
        self
    }

    /// Set the total wait budget.
    #[must_use]
    pub fn max_wait(mut self, budget: Duration) -> Self {
        self.max_wait = Some(budget);
        self
    }

    /// Wait before repeating a throttled request.
    pub fn delay_for(&self, response: &RawResponse) -> Duration {
        match response.rate_limit.ttl {
            Some(ttl) if ttl > 0 => Duration::from_secs(ttl),
            _ => self.min_backoff,
        }
    }
}

/// A successful (2xx) response and what it took to get it.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub response: RawResponse,
    /// Requests issued, including throttled ones.
    pub attempts: u32,
    /// Total time spent waiting out 429 responses.
    pub waited: Duration,
}

/// Issues requests through a [`Transport`], waiting out rate limits.
///
/// The fetcher performs all outbound I/O of the engine. It classifies
/// statuses but never touches the local store.
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    policy: ThrottlePolicy,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>, policy: ThrottlePolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &ThrottlePolicy {
        &self.policy
    }

    /// Issue `request` until the source stops answering 429.
    ///
    /// Returns the 2xx response. A 401 is [`Error::Unauthorized`], any other
    /// non-2xx status is [`Error::Remote`]. Cancelling `cancel` interrupts a
    /// pending wait with [`Error::Cancelled`].
    pub async fn fetch(&self, request: &HttpRequest, cancel: &CancellationToken) -> Result<Fetched> {
        let mut attempts = 0u32;
        let mut waited = Duration::ZERO;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            attempts += 1;
            let response = self.transport.get(request).await?;
            let rl = response.rate_limit;
            debug!(
                "Limit {:?}, Current {:?}, TTL {:?} (status {})",
                rl.limit, rl.current, rl.ttl, response.status
            );

            if !response.is_throttled() {
                if attempts > 1 {
                    debug!("{} succeeded after {} attempts", request.url, attempts);
                }
                return check_status(response).map(|response| Fetched {
                    response,
                    attempts,
                    waited,
                });
            }

            if let Some(max) = self.policy.max_attempts
                && attempts >= max
            {
                warn!("Still rate limited after {} attempts, giving up", attempts);
                return Err(Error::Throttled { attempts });
            }

            let delay = self.policy.delay_for(&response);
            if let Some(budget) = self.policy.max_wait
                && waited + delay > budget
            {
                warn!(
                    "Rate limit wait of {:?} exceeds the remaining budget, giving up",
                    delay
                );
                return Err(Error::Timeout {
                    operation: format!("GET {}", request.url),
                    duration: budget,
                });
            }

            warn!("Rate limited (attempt {}), waiting {:?}", attempts, delay);
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = sleep(delay) => {}
            }
            waited += delay;
        }
    }

    /// Look up the API endpoint for `token`.
    ///
    /// The discovery document is a list of `{"uri": ...}` objects; the first
    /// entry's URI with `/endpoint` appended is the endpoint for all data
    /// requests.
    pub async fn discover_endpoint(
        &self,
        endpoints_url: &str,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let request = HttpRequest::new(endpoints_url, token);
        let fetched = self.fetch(&request, cancel).await?;
        let entries: Value = fetched.response.json()?;

        let uri = entries
            .as_array()
            .and_then(|entries| entries.first())
            .and_then(|entry| entry.get("uri"))
            .and_then(Value::as_str)
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| Error::Discovery("no endpoint URI in discovery response".to_string()))?;

        Ok(format!("{}/endpoint", uri.trim_end_matches('/')))
    }
}

fn check_status(response: RawResponse) -> Result<RawResponse> {
    if response.is_success() {
        return Ok(response);
    }
    match response.status {
        401 => Err(Error::Unauthorized),
        status => Err(Error::Remote {
            status,
            message: response.error_message(),
        }),
    }
}
