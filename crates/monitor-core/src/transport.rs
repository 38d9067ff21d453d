//! HTTP transport abstraction for the remote telemetry API.
//!
//! The [`Transport`] trait issues one GET and hands back the raw status,
//! rate-limit headers and body. It does not interpret status codes; that is
//! the [`Fetcher`](crate::Fetcher)'s job. [`HttpTransport`] is the `reqwest`
//! implementation, [`MockTransport`](crate::MockTransport) the scripted one.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};

/// Header carrying the request quota of the current window.
pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
/// Header carrying the requests used in the current window.
pub const HEADER_CURRENT: &str = "x-ratelimit-current";
/// Header carrying the seconds until the window resets.
pub const HEADER_TTL: &str = "x-ratelimit-ttl";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One GET request against the remote API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Absolute URL.
    pub url: String,
    /// Query parameters, in the order they are sent.
    pub params: Vec<(String, String)>,
    /// Access token, sent as a bearer credential.
    pub token: String,
}

impl HttpRequest {
    /// Create a request without query parameters.
    pub fn new(url: &str, token: &str) -> Self {
        Self {
            url: url.to_string(),
            params: Vec::new(),
            token: token.to_string(),
        }
    }

    /// Append one query parameter.
    #[must_use]
    pub fn param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.push((key.to_string(), value.into()));
        self
    }

    /// Append several query parameters.
    #[must_use]
    pub fn params<I>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.params.extend(params);
        self
    }

    /// Value of one query parameter.
    pub fn get_param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Rate-limit state reported by the source on every response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: Option<u64>,
    pub current: Option<u64>,
    /// Seconds until the quota window resets.
    pub ttl: Option<u64>,
}

impl RateLimit {
    /// Parse the three header values; unparsable values are treated as absent.
    pub fn parse(limit: Option<&str>, current: Option<&str>, ttl: Option<&str>) -> Self {
        let number = |value: Option<&str>| value.and_then(|v| v.trim().parse().ok());
        Self {
            limit: number(limit),
            current: number(current),
            ttl: number(ttl),
        }
    }

    /// Read the rate-limit headers from a response.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        Self::parse(header(HEADER_LIMIT), header(HEADER_CURRENT), header(HEADER_TTL))
    }
}

/// Status, rate-limit headers and body of one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub rate_limit: RateLimit,
    pub body: String,
}

impl RawResponse {
    /// Response with a status and body and no rate-limit headers.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            rate_limit: RateLimit::default(),
            body: body.into(),
        }
    }

    /// 200 response carrying `value` as JSON.
    pub fn json_ok(value: &Value) -> Self {
        Self::new(200, value.to_string())
    }

    /// 429 response with an optional `x-ratelimit-ttl`.
    pub fn throttled(ttl: Option<u64>) -> Self {
        Self::new(429, r#"{"error":"rate limit exceeded"}"#).with_rate_limit(RateLimit {
            ttl,
            ..Default::default()
        })
    }

    /// Replace the rate-limit headers.
    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether the source is rate limiting this client.
    pub fn is_throttled(&self) -> bool {
        self.status == 429
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|e| Error::InvalidPayload(e.to_string()))
    }

    /// Error text of a failed response: the body's `error` or `message`
    /// field, the raw body, or the status code.
    pub fn error_message(&self) -> String {
        let from_json = serde_json::from_str::<Value>(&self.body).ok().and_then(|v| {
            ["error", "message"]
                .iter()
                .find_map(|key| v.get(*key).and_then(Value::as_str).map(String::from))
        });
        from_json
            .or_else(|| {
                let body = self.body.trim();
                (!body.is_empty()).then(|| body.chars().take(200).collect())
            })
            .unwrap_or_else(|| format!("HTTP {}", self.status))
    }
}

/// Issues requests to the remote API.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one GET. Any HTTP status is a successful transport result.
    async fn get(&self, request: &HttpRequest) -> Result<RawResponse>;
}

/// [`Transport`] over `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport with the given per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("monitor/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Create a transport with a custom reqwest Client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, request: &HttpRequest) -> Result<RawResponse> {
        let response = self
            .client
            .get(&request.url)
            .bearer_auth(&request.token)
            .query(&request.params)
            .send()
            .await?;

        let status = response.status().as_u16();
        let rate_limit = RateLimit::from_headers(response.headers());
        let body = response.text().await?;

        Ok(RawResponse {
            status,
            rate_limit,
            body,
        })
    }
}
