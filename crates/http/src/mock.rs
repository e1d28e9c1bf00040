//! Scripted client for deterministic tests

use crate::client::{HttpClient, Method, Request, Response, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use quarry_core::JsonValue;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Script {
    matcher: Option<(Method, String)>,
    reply: Result<Response, TransportError>,
}

impl Script {
    fn matches(&self, request: &Request) -> bool {
        match &self.matcher {
            None => true,
            Some((method, suffix)) => *method == request.method && request.url.ends_with(suffix.as_str()),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    scripts: VecDeque<Script>,
    requests: Vec<Request>,
}

/// Client that replays scripted replies and records every request.
///
/// Replies are consumed in order. A reply registered with [`MockClient::on`]
/// only answers requests whose verb matches and whose URL ends with the given
/// suffix; unmatched requests fail with [`TransportError::Unscripted`].
/// Clones share the same script and request log.
#[derive(Debug, Clone, Default)]
pub struct MockClient {
    inner: Arc<Mutex<Inner>>,
}

impl MockClient {
    /// Client with no scripts
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next request
    pub fn push(&self, status: u16, body: JsonValue) -> &Self {
        self.push_script(None, Ok(Response::new(status, body)))
    }

    /// Queue a reply for the next request matching `method` and URL suffix
    pub fn on(&self, method: Method, url_suffix: &str, status: u16, body: JsonValue) -> &Self {
        self.push_script(
            Some((method, url_suffix.to_string())),
            Ok(Response::new(status, body)),
        )
    }

    /// Queue a transport failure for the next request
    pub fn push_error(&self, error: TransportError) -> &Self {
        self.push_script(None, Err(error))
    }

    fn push_script(&self, matcher: Option<(Method, String)>, reply: Result<Response, TransportError>) -> &Self {
        self.inner.lock().scripts.push_back(Script { matcher, reply });
        self
    }

    /// Every request sent so far, oldest first
    pub fn requests(&self) -> Vec<Request> {
        self.inner.lock().requests.clone()
    }

    /// Most recent request, if any
    pub fn last_request(&self) -> Option<Request> {
        self.inner.lock().requests.last().cloned()
    }

    /// Number of requests sent so far
    pub fn request_count(&self) -> usize {
        self.inner.lock().requests.len()
    }

    /// Replies not yet consumed
    pub fn pending(&self) -> usize {
        self.inner.lock().scripts.len()
    }

    /// Forget scripts and recorded requests
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.scripts.clear();
        inner.requests.clear();
    }
}

#[async_trait]
impl HttpClient for MockClient {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        let mut inner = self.inner.lock();
        inner.requests.push(request.clone());
        let position = inner.scripts.iter().position(|s| s.matches(&request));
        match position.and_then(|i| inner.scripts.remove(i)) {
            Some(script) => {
                tracing::debug!(
                    target: "quarry::http::mock",
                    method = %request.method,
                    url = %request.url,
                    "Replaying scripted response"
                );
                script.reply
            }
            None => Err(TransportError::Unscripted {
                method: request.method,
                url: request.url,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_replays_in_order_and_records() {
        let client = MockClient::new();
        client.push(200, json!({"n": 1})).push(201, json!({"n": 2}));

        let first = client.get("/a", None).await.unwrap();
        let second = client.post("/b", Some(json!({"x": 1}))).await.unwrap();

        assert_eq!(first.json("n"), Some(&json!(1)));
        assert_eq!(second.status(), 201);

        let requests = client.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].method, Method::Post);
        assert_eq!(requests[1].body, Some(json!({"x": 1})));
        assert_eq!(client.pending(), 0);
    }

    #[tokio::test]
    async fn test_matched_scripts_skip_unrelated_requests() {
        let client = MockClient::new();
        client.on(Method::Delete, "/posts/1", 204, JsonValue::Null);
        client.push(200, json!([]));

        let listed = client.get("/posts", None).await.unwrap();
        assert_eq!(listed.body(), &json!([]));

        let deleted = client.delete("/api/posts/1", None).await.unwrap();
        assert!(deleted.no_content());
    }

    #[tokio::test]
    async fn test_unscripted_request_fails() {
        let client = MockClient::new();
        let err = client.get("/nothing", None).await.unwrap_err();
        assert_eq!(
            err,
            TransportError::Unscripted {
                method: Method::Get,
                url: "/nothing".to_string()
            }
        );
        assert_eq!(client.request_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_transport_error() {
        let client = MockClient::new();
        client.push_error(TransportError::Timeout);
        assert_eq!(client.put("/x", None).await, Err(TransportError::Timeout));
    }
}
