//! HTTP record fetcher for the RocketAPI user info endpoint
//!
//! Makes exactly one request per call and classifies the outcome; retrying,
//! rate limiting and deadlines are handled by the batch engine.

use crate::fetcher::{FetchError, FetchResult, RecordFetcher};
use crate::metrics::HttpRequestMetrics;
use crate::Record;
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Default upstream base URL
pub const DEFAULT_BASE_URL: &str = "https://v1.rocketapi.io";

/// User info endpoint path
pub const USER_INFO_ENDPOINT: &str = "/instagram/user/get_info";

/// HTTP connect timeout
pub const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;

/// HTTP request timeout, per attempt
pub const HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Longest upstream body excerpt kept in error messages
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Fetches user records over HTTP
#[derive(Debug, Clone)]
pub struct HttpRecordFetcher {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpRecordFetcher {
    /// Create a fetcher with its own connection pool
    ///
    /// # Arguments
    /// * `base_url` - Upstream base URL (e.g., "<https://v1.rocketapi.io>")
    /// * `api_key` - Token sent in the `Authorization` header
    ///
    /// # Errors
    /// Returns [`FetchError::Other`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> FetchResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| FetchError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self::with_client(client, base_url, api_key))
    }

    /// Create a fetcher sharing an existing client
    pub fn with_client(
        client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            api_key: api_key.into(),
        }
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl RecordFetcher for HttpRecordFetcher {
    async fn fetch(&self, id: &str) -> FetchResult<Record> {
        let url = format!("{}{}", self.base_url, USER_INFO_ENDPOINT);
        let metrics = HttpRequestMetrics::start(USER_INFO_ENDPOINT);

        debug!(
            id = id,
            correlation_id = metrics.correlation_id(),
            "Requesting user info"
        );

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Token {}", self.api_key))
            .json(&json!({ "username": id }))
            .send()
            .await
            .map_err(|e| {
                metrics.record_network_error();
                transport_error(&e)
            })?;

        let status = response.status();
        metrics.record_complete(status.as_u16());

        let body = response.text().await.map_err(|e| transport_error(&e))?;

        if !status.is_success() {
            return Err(classify_status(id, status, &body));
        }

        parse_envelope(id, &body)
    }
}

/// Upstream wrapper around every response
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    response: Option<EnvelopeResponse>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeResponse {
    #[serde(default)]
    status_code: u16,
    #[serde(default)]
    body: Value,
}

fn transport_error(err: &reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Transient(format!("request timed out: {err}"))
    } else {
        FetchError::Transient(format!("network error: {err}"))
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

/// Classify a non-success HTTP status
pub(crate) fn classify_status(id: &str, status: StatusCode, body: &str) -> FetchError {
    match status {
        StatusCode::NOT_FOUND => FetchError::NotFound {
            id: id.to_string(),
            message: "HTTP 404".to_string(),
        },
        StatusCode::TOO_MANY_REQUESTS => {
            FetchError::RateLimited(format!("HTTP 429: {}", excerpt(body)))
        }
        s if s.is_server_error() => {
            FetchError::Transient(format!("HTTP {}: {}", s.as_u16(), excerpt(body)))
        }
        s => FetchError::Other(format!(
            "unexpected HTTP status {}: {}",
            s.as_u16(),
            excerpt(body)
        )),
    }
}

/// Turn a 200 response body into a record
pub(crate) fn parse_envelope(id: &str, body: &str) -> FetchResult<Record> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| FetchError::Other(format!("failed to parse response envelope: {e}")))?;

    if envelope.status == "error" || envelope.status == "fail" {
        if envelope.message.to_lowercase().contains("user not found") {
            return Err(FetchError::NotFound {
                id: id.to_string(),
                message: envelope.message,
            });
        }
        return Err(FetchError::Other(format!(
            "upstream error: {}",
            envelope.message
        )));
    }

    let response = envelope
        .response
        .ok_or_else(|| FetchError::Other("response envelope has no response".to_string()))?;

    match response.status_code {
        404 => {
            return Err(FetchError::NotFound {
                id: id.to_string(),
                message: "upstream status 404".to_string(),
            })
        }
        429 => return Err(FetchError::RateLimited("upstream status 429".to_string())),
        code if code >= 500 => {
            return Err(FetchError::Transient(format!("upstream status {code}")))
        }
        _ => {}
    }

    let user = match response.body.get("user") {
        Some(user @ Value::Object(_)) => user.clone(),
        _ => {
            return Err(FetchError::Other(
                "response body has no user object".to_string(),
            ))
        }
    };

    let upstream_id = match user.get("id") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    let mut record = Record::new(id, user);
    if let Some(upstream_id) = upstream_id {
        record = record.with_upstream_id(upstream_id);
    }

    record.validate().map_err(FetchError::Other)?;
    Ok(record)
}
