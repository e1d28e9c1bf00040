//! Blocking `ureq` transport run on tokio's blocking pool

use crate::client::{HttpClient, Method, Request, Response, TransportError};
use async_trait::async_trait;
use std::time::Duration;

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// [`HttpClient`] backed by a shared `ureq::Agent`
#[derive(Clone)]
pub struct UreqClient {
    agent: ureq::Agent,
}

impl std::fmt::Debug for UreqClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UreqClient").finish_non_exhaustive()
    }
}

impl Default for UreqClient {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }
}

impl UreqClient {
    /// Agent that reports 4xx/5xx as responses rather than errors
    pub fn with_timeout(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
        }
    }

    fn send_blocking(agent: &ureq::Agent, request: Request) -> Result<Response, TransportError> {
        let body = match &request.body {
            Some(body) => Some(
                serde_json::to_vec(body)
                    .map_err(|e| TransportError::Decode(format!("failed to serialize request: {}", e)))?,
            ),
            None => None,
        };

        let result = match request.method {
            Method::Get | Method::Head | Method::Delete => {
                let mut builder = match request.method {
                    Method::Get => agent.get(request.url.as_str()),
                    Method::Head => agent.head(request.url.as_str()),
                    _ => agent.delete(request.url.as_str()),
                };
                for (key, value) in &request.query {
                    builder = builder.query(key, value);
                }
                for (key, value) in &request.headers {
                    builder = builder.header(key.as_str(), value.as_str());
                }
                match body {
                    Some(bytes) => builder
                        .header("Content-Type", "application/json")
                        .force_send_body()
                        .send(&bytes[..]),
                    None => builder.call(),
                }
            }
            Method::Post | Method::Put | Method::Patch => {
                let mut builder = match request.method {
                    Method::Post => agent.post(request.url.as_str()),
                    Method::Put => agent.put(request.url.as_str()),
                    _ => agent.patch(request.url.as_str()),
                };
                for (key, value) in &request.query {
                    builder = builder.query(key, value);
                }
                for (key, value) in &request.headers {
                    builder = builder.header(key.as_str(), value.as_str());
                }
                builder
                    .header("Content-Type", "application/json")
                    .send(&body.unwrap_or_else(|| b"{}".to_vec())[..])
            }
        };

        let mut response = result.map_err(|e| {
            let msg = e.to_string();
            if msg.contains("timed out") || msg.contains("Timeout") {
                TransportError::Timeout
            } else {
                TransportError::Network(msg)
            }
        })?;

        let status = response.status().as_u16();
        let text = response
            .body_mut()
            .read_to_string()
            .map_err(|e| TransportError::Network(format!("failed to read response: {}", e)))?;
        Response::from_text(status, &text)
    }
}

#[async_trait]
impl HttpClient for UreqClient {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        let agent = self.agent.clone();
        tracing::debug!(
            target: "quarry::http::ureq",
            method = %request.method,
            url = %request.url,
            "Sending request"
        );
        tokio::task::spawn_blocking(move || Self::send_blocking(&agent, request))
            .await
            .map_err(|e| TransportError::Network(format!("transport task failed: {}", e)))?
    }
}
