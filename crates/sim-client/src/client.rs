//! HTTP client for the simulator service.
//!
//! One request per call, bounded by the configured timeout, no retries.
//! Every outcome, including transport failures, comes back as an
//! [`ExecutionResult`] so callers never handle transport errors themselves.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, warn};
use reqwest::Url;
use serde_json::{json, Value};

use crate::response::{self, Execution};
use crate::result::{ErrorKind, ExecutionResult};
use crate::{DEFAULT_TIMEOUT, HEALTH_TIMEOUT};

/// Error type for transport-level failures.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Invalid backend URL: {0}")]
    InvalidBaseUrl(String),

    #[error("Failed to initialize HTTP client: {0}")]
    Init(#[source] reqwest::Error),

    #[error("Request timeout after {0}ms")]
    Timeout(u128),

    #[error("Failed to connect to backend: {0}")]
    ConnectionFailed(String),

    #[error("Invalid response body: {0}")]
    InvalidBody(String),
}

impl ClientError {
    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ClientError::Timeout(timeout.as_millis())
        } else {
            ClientError::ConnectionFailed(err.to_string())
        }
    }
}

/// Operations the notebook needs from an execution backend.
///
/// Implemented by [`SimClient`]; tests substitute in-memory fakes.
pub trait Backend: Send + Sync {
    fn execute<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Execution>;
    fn assemble<'a>(&'a self, source: &'a str) -> BoxFuture<'a, ExecutionResult>;
    fn reset(&self) -> BoxFuture<'_, Execution>;
    fn get_docs<'a>(&'a self, instruction: &'a str) -> BoxFuture<'a, ExecutionResult>;
    fn get_timing_diagram<'a>(&'a self, instruction: &'a str) -> BoxFuture<'a, ExecutionResult>;
}

/// Client for the 8085 assembler/simulator HTTP service.
#[derive(Debug, Clone)]
pub struct SimClient {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl SimClient {
    /// Create a client for `base_url` with the default 30s timeout.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let base_url =
            Url::parse(base_url).map_err(|e| ClientError::InvalidBaseUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidBaseUrl(base_url.to_string()));
        }
        let http = reqwest::Client::builder()
            .build()
            .map_err(ClientError::Init)?;
        Ok(Self {
            http,
            base_url,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // cannot_be_a_base was rejected in new()
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Send a request and return the raw body with its content type.
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<(Option<String>, String), ClientError> {
        let timeout = self.timeout;
        let response = request
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(e, timeout))?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ClientError::from_reqwest(e, timeout))?;
        debug!("[client] {} ({} bytes)", status, body.len());
        Ok((content_type, body))
    }

    async fn send_json(&self, request: reqwest::RequestBuilder) -> Result<Value, ClientError> {
        let (_, body) = self.send(request).await?;
        serde_json::from_str(&body).map_err(|e| ClientError::InvalidBody(e.to_string()))
    }

    /// Execute assembly source on the simulator.
    pub async fn execute(&self, code: &str) -> Execution {
        let url = self.endpoint(&["api", "execute"]);
        debug!("[client] POST {}", url);
        let request = self.http.post(url).json(&json!({ "code": code }));

        let (content_type, body) = match self.send(request).await {
            Ok(parts) => parts,
            Err(e) => {
                warn!("[client] execute failed: {}", e);
                return response::network_error(e.to_string(), Some(code)).into();
            }
        };

        let is_json = content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("application/json"));
        if !is_json {
            warn!("[client] execute returned non-JSON content type {:?}", content_type);
            return response::server_error(code).into();
        }

        match serde_json::from_str::<Value>(&body) {
            Ok(value) => response::normalize_execute(&value, code),
            Err(e) => {
                warn!("[client] execute returned malformed JSON: {}", e);
                response::server_error(code).into()
            }
        }
    }

    /// Assemble source into an address/opcode table.
    pub async fn assemble(&self, source: &str) -> ExecutionResult {
        let url = self.endpoint(&["api", "assemble"]);
        debug!("[client] POST {}", url);
        let request = self.http.post(url).json(&json!({ "code": source }));
        match self.send_json(request).await {
            Ok(value) => response::normalize_assemble(&value),
            Err(e) => transport_failure(e, "Assembly Error"),
        }
    }

    /// Reset the simulator to its power-on state.
    pub async fn reset(&self) -> Execution {
        let url = self.endpoint(&["api", "reset"]);
        debug!("[client] POST {}", url);
        match self.send_json(self.http.post(url)).await {
            Ok(value) => response::normalize_reset(&value),
            Err(e) => transport_failure(e, "Reset Error").into(),
        }
    }

    /// Fetch documentation for one instruction.
    pub async fn get_docs(&self, instruction: &str) -> ExecutionResult {
        let url = self.endpoint(&["api", "docs", instruction]);
        debug!("[client] GET {}", url);
        match self.send_json(self.http.get(url)).await {
            Ok(value) => response::normalize_docs(&value, instruction),
            Err(e) => transport_failure(e, "Documentation Error"),
        }
    }

    /// Fetch the timing diagram image for one instruction.
    pub async fn get_timing_diagram(&self, instruction: &str) -> ExecutionResult {
        let url = self.endpoint(&["api", "timing", instruction]);
        debug!("[client] GET {}", url);
        match self.send_json(self.http.get(url)).await {
            Ok(value) => response::normalize_timing(&value, instruction),
            Err(e) => transport_failure(e, "Timing Diagram Error"),
        }
    }

    /// Check whether the backend answers `GET /health` with a 2xx status.
    pub async fn health(&self) -> bool {
        let url = self.endpoint(&["health"]);
        match self.http.get(url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("[client] health check failed: {}", e);
                false
            }
        }
    }
}

/// Map a transport failure on a magic-command endpoint to an error result.
fn transport_failure(err: ClientError, title: &str) -> ExecutionResult {
    warn!("[client] {}: {}", title, err);
    match err {
        ClientError::InvalidBody(reason) => ExecutionResult::error(
            ErrorKind::Server,
            Some(title),
            format!("Unexpected response from backend: {}", reason),
        ),
        other => {
            let mut result = response::network_error(other.to_string(), None);
            if let ExecutionResult::Error(ref mut e) = result {
                e.title = Some(title.to_string());
            }
            result
        }
    }
}

impl Backend for SimClient {
    fn execute<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Execution> {
        SimClient::execute(self, code).boxed()
    }

    fn assemble<'a>(&'a self, source: &'a str) -> BoxFuture<'a, ExecutionResult> {
        SimClient::assemble(self, source).boxed()
    }

    fn reset(&self) -> BoxFuture<'_, Execution> {
        SimClient::reset(self).boxed()
    }

    fn get_docs<'a>(&'a self, instruction: &'a str) -> BoxFuture<'a, ExecutionResult> {
        SimClient::get_docs(self, instruction).boxed()
    }

    fn get_timing_diagram<'a>(&'a self, instruction: &'a str) -> BoxFuture<'a, ExecutionResult> {
        SimClient::get_timing_diagram(self, instruction).boxed()
    }
}
