//! Scripted transport for testing.
//!
//! [`MockTransport`] implements [`Transport`] by answering requests from a
//! queue of prepared responses and recording every request it receives, so
//! tests can drive the fetcher and the sync engine without a network.
//!
//! # Features
//!
//! - **Scripted replies**: queue responses in the order they should be served
//! - **Request log**: inspect the URL, query parameters and token of each call
//! - **Exhaustion**: once the script runs out, every call answers 503

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::transport::{HttpRequest, RawResponse, Transport};

/// A scripted [`Transport`].
///
/// # Example
///
/// ```
/// use monitor_core::{HttpRequest, MockTransport, Transport};
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() {
///     let transport = MockTransport::new();
///     transport.push_throttled(Some(2));
///     transport.push_json(&json!([]));
///
///     let request = HttpRequest::new("https://api.test/endpoint", "tok1");
///     assert_eq!(transport.get(&request).await.unwrap().status, 429);
///     assert_eq!(transport.get(&request).await.unwrap().status, 200);
///     assert_eq!(transport.request_count(), 2);
/// }
/// ```
#[derive(Debug, Default)]
pub struct MockTransport {
    replies: Mutex<VecDeque<RawResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockTransport {
    /// Create a transport with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response.
    pub fn push(&self, response: RawResponse) -> &Self {
        lock(&self.replies).push_back(response);
        self
    }

    /// Queue a 200 response with a JSON body.
    pub fn push_json(&self, body: &Value) -> &Self {
        self.push(RawResponse::json_ok(body))
    }

    /// Queue a 429 response.
    pub fn push_throttled(&self, ttl: Option<u64>) -> &Self {
        self.push(RawResponse::throttled(ttl))
    }

    /// Queue a response with an arbitrary status.
    pub fn push_status(&self, status: u16, body: &str) -> &Self {
        self.push(RawResponse::new(status, body))
    }

    /// Responses not yet served.
    pub fn pending(&self) -> usize {
        lock(&self.replies).len()
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Forget recorded requests. The script is kept.
    pub fn reset_requests(&self) {
        lock(&self.requests).clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, request: &HttpRequest) -> Result<RawResponse> {
        lock(&self.requests).push(request.clone());
        let reply = lock(&self.replies).pop_front();
        Ok(reply.unwrap_or_else(|| RawResponse::new(503, r#"{"error":"mock script exhausted"}"#)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_serves_in_order() {
        let transport = MockTransport::new();
        transport
            .push_json(&json!([1]))
            .push_status(500, "boom")
            .push_throttled(None);
        assert_eq!(transport.pending(), 3);

        let request = HttpRequest::new("https://api.test/endpoint", "tok1");
        assert_eq!(transport.get(&request).await.unwrap().body, "[1]");
        assert_eq!(transport.get(&request).await.unwrap().status, 500);
        assert_eq!(transport.get(&request).await.unwrap().status, 429);
        assert_eq!(transport.pending(), 0);
    }

    #[tokio::test]
    async fn test_mock_exhausted_answers_503() {
        let transport = MockTransport::new();
        let request = HttpRequest::new("https://api.test/endpoint", "tok1");
        let response = transport.get(&request).await.unwrap();
        assert_eq!(response.status, 503);
        assert_eq!(response.error_message(), "mock script exhausted");
    }

    #[tokio::test]
    async fn test_mock_records_requests() {
        let transport = MockTransport::new();
        let request = HttpRequest::new("https://api.test/endpoint", "tok1").param("kind", "all");
        transport.get(&request).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0], request);

        transport.reset_requests();
        assert_eq!(transport.request_count(), 0);
    }
}
