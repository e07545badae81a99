use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, trace};
use ureq::Agent;

/// The default timeout for a single request, can be overwritten with
/// --timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Transport related errors. None of them are retried.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to fetch {url}: {status} {status_text}")]
    Status { url: String, status: u16, status_text: String },
    #[error("Failed to send request to {url}: {reason}")]
    Network { url: String, reason: String },
    #[error("Response from {url} is not valid JSON: {reason}")]
    InvalidBody { url: String, reason: String },
}

/// A parsed JSON response together with its headers. Header names are lower
/// case.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResult {
    pub headers: HashMap<String, String>,
    pub body:    Value,
}

impl FetchResult {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Performs authenticated GET requests against a registry.
pub trait Transport {
    /// # Errors
    ///
    /// Returns a `TransportError` for non-2xx statuses, network failures and
    /// bodies that are not JSON.
    fn fetch_json(&self, url: &str, headers: &[(&str, &str)]) -> Result<FetchResult, TransportError>;
}

/// Blocking HTTP transport backed by `ureq`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    agent: Agent,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        // Statuses are mapped by hand so the error carries the status text.
        let config = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        Self { agent: config.into() }
    }
}

impl Transport for HttpTransport {
    fn fetch_json(&self, url: &str, headers: &[(&str, &str)]) -> Result<FetchResult, TransportError> {
        debug!("Fetching {url}");
        let mut request = self.agent.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let mut response = request.call().map_err(|e| TransportError::Network {
            url:    url.to_owned(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        debug!("Response status: {status}");
        if !status.is_success() {
            return Err(TransportError::Status {
                url:         url.to_owned(),
                status:      status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_owned(),
            });
        }

        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|value| (name.as_str().to_ascii_lowercase(), value.to_owned())))
            .collect();
        debug!("Response headers: {headers:?}");

        let body: Value = response.body_mut().read_json().map_err(|e| TransportError::InvalidBody {
            url:    url.to_owned(),
            reason: e.to_string(),
        })?;
        trace!("Response data: {body}");

        Ok(FetchResult { headers, body })
    }
}
