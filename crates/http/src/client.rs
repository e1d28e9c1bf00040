//! Transport contract: requests, responses and the async client trait
//!
//! The model layer never talks to a socket directly. It builds a [`Request`],
//! hands it to an [`HttpClient`], and inspects the [`Response`]. Any type that
//! can deliver a request may stand in: the blocking `ureq` transport behind
//! the `ureq` feature, or [`MockClient`](crate::MockClient) in tests.

use async_trait::async_trait;
use quarry_core::{get_at_path, JsonPath, JsonValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Method
// ============================================================================

/// HTTP verb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// `GET`
    Get,
    /// `HEAD`
    Head,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
}

impl Method {
    /// Upper-case verb name
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Whether request data travels in the query string
    pub fn sends_query(&self) -> bool {
        matches!(self, Method::Get | Method::Head)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Failure to obtain any response at all
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection refused, DNS failure, TLS failure, ...
    #[error("network error: {0}")]
    Network(String),

    /// Request exceeded the transport timeout
    #[error("request timed out")]
    Timeout,

    /// Response body was not valid JSON
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// A scripted client had no reply for the request
    #[error("no scripted response for {method} {url}")]
    Unscripted {
        /// Verb of the unmatched request
        method: Method,
        /// URL of the unmatched request
        url: String,
    },
}

// ============================================================================
// Request
// ============================================================================

/// An outgoing request
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// HTTP verb
    pub method: Method,
    /// Absolute URL without the query string
    pub url: String,
    /// Query pairs in insertion order
    pub query: Vec<(String, String)>,
    /// Extra headers
    pub headers: Vec<(String, String)>,
    /// JSON body for verbs that carry one
    pub body: Option<JsonValue>,
}

impl Request {
    /// Create a request with no query, headers or body
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: vec![("Accept".to_string(), "application/json".to_string())],
            body: None,
        }
    }

    /// Create a request carrying `data` the way the verb expects it.
    ///
    /// GET and HEAD flatten a top-level object into query parameters
    /// (see [`query_value`]); every other verb sends `data` as a JSON body.
    pub fn with_data(method: Method, url: impl Into<String>, data: Option<JsonValue>) -> Self {
        let request = Self::new(method, url);
        match data {
            None => request,
            Some(data) if method.sends_query() => request.query_object(&data),
            Some(data) => request.json(data),
        }
    }

    /// Append one query parameter
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Append every entry of a JSON object as a query parameter; null entries are skipped
    pub fn query_object(mut self, data: &JsonValue) -> Self {
        if let JsonValue::Object(map) = data {
            for (key, value) in map {
                if let Some(value) = query_value(value) {
                    self.query.push((key.clone(), value));
                }
            }
        }
        self
    }

    /// Append one header
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Set the JSON body
    pub fn json(mut self, body: JsonValue) -> Self {
        self.body = Some(body);
        self
    }

    /// Value of the first query parameter named `key`
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Value of the first header named `key` (case-insensitive)
    pub fn header_value(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// Render a JSON value as a single query parameter.
///
/// Strings pass through unquoted, scalars use their JSON text, and objects
/// or arrays are JSON-stringified whole. `null` yields `None`.
pub fn query_value(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        other => Some(other.to_string()),
    }
}

// ============================================================================
// Response
// ============================================================================

/// A received response
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    status: u16,
    body: JsonValue,
}

impl Response {
    /// Build a response from a status and a decoded body
    pub fn new(status: u16, body: JsonValue) -> Self {
        Self { status, body }
    }

    /// Build a response from raw body text; empty text decodes to `null`
    pub fn from_text(status: u16, text: &str) -> Result<Self, TransportError> {
        if text.trim().is_empty() {
            return Ok(Self::new(status, JsonValue::Null));
        }
        let body = serde_json::from_str(text).map_err(|e| {
            TransportError::Decode(format!(
                "{} (body starts with {:?})",
                e,
                &text[..text.len().min(80)]
            ))
        })?;
        Ok(Self::new(status, body))
    }

    /// HTTP status code
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Status is exactly 200
    pub fn ok(&self) -> bool {
        self.status == 200
    }

    /// Status is 2xx
    pub fn successful(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Status is 4xx or 5xx
    pub fn failed(&self) -> bool {
        self.status >= 400
    }

    /// 4xx
    pub fn client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// 5xx
    pub fn server_error(&self) -> bool {
        self.status >= 500
    }

    /// Status is 204
    pub fn no_content(&self) -> bool {
        self.status == 204
    }

    /// Status is 422
    pub fn unprocessable(&self) -> bool {
        self.status == 422
    }

    /// Whole decoded body
    pub fn body(&self) -> &JsonValue {
        &self.body
    }

    /// Consume the response, keeping the body
    pub fn into_body(self) -> JsonValue {
        self.body
    }

    /// Value at a dot path inside the body; `"."` or `""` is the whole body
    pub fn json(&self, path: &str) -> Option<&JsonValue> {
        let path: JsonPath = path.parse().ok()?;
        get_at_path(&self.body, &path)
    }
}

// ============================================================================
// Client trait
// ============================================================================

/// Asynchronous HTTP transport
///
/// Only [`send`](HttpClient::send) is required; the verb helpers build a
/// request with [`Request::with_data`] and send it.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Deliver a request and return whatever status came back
    async fn send(&self, request: Request) -> Result<Response, TransportError>;

    /// Send a `GET` to `url`
    async fn get(&self, url: &str, data: Option<JsonValue>) -> Result<Response, TransportError> {
        self.send(Request::with_data(Method::Get, url, data)).await
    }

    /// Send a `POST` to `url`
    async fn post(&self, url: &str, data: Option<JsonValue>) -> Result<Response, TransportError> {
        self.send(Request::with_data(Method::Post, url, data)).await
    }

    /// Send a `PUT` to `url`
    async fn put(&self, url: &str, data: Option<JsonValue>) -> Result<Response, TransportError> {
        self.send(Request::with_data(Method::Put, url, data)).await
    }

    /// Send a `PATCH` to `url`
    async fn patch(&self, url: &str, data: Option<JsonValue>) -> Result<Response, TransportError> {
        self.send(Request::with_data(Method::Patch, url, data)).await
    }

    /// Send a `DELETE` to `url`
    async fn delete(&self, url: &str, data: Option<JsonValue>) -> Result<Response, TransportError> {
        self.send(Request::with_data(Method::Delete, url, data)).await
    }
}
