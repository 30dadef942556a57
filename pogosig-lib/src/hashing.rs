//! Client for the remote hash service.
//!
//! The service computes the two location hashes and one hash per RPC request
//! from the auth ticket, the session hash and the raw coordinate bits. Every
//! exchange is a single JSON POST; the response headers carry rate-limit
//! metadata that is kept for the caller whatever the outcome.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{CONTENT_TYPE, HeaderMap, USER_AGENT};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::codec::{double_to_long_bits, parse_i64_wrapping, parse_u64_wrapping, quote_large_integers};
use crate::constants::*;
use crate::error::SigError;

/// Body of a hashing call. Coordinates are carried as raw IEEE-754 bits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct HashRequest {
    pub timestamp: u64,
    #[serde(rename = "Latitude64")]
    pub latitude: i64,
    #[serde(rename = "Longitude64")]
    pub longitude: i64,
    #[serde(rename = "Accuracy64")]
    pub accuracy: i64,
    /// base64
    pub auth_ticket: String,
    /// base64 of the session hash
    pub session_data: String,
    /// base64 of each encoded request, in call order
    pub requests: Vec<String>,
}

impl HashRequest {
    pub fn new(
        auth_ticket: &[u8],
        latitude: f64,
        longitude: f64,
        accuracy: f64,
        timestamp: u64,
        session_hash: &[u8],
        requests: Vec<String>,
    ) -> Self {
        Self {
            timestamp,
            latitude: double_to_long_bits(latitude),
            longitude: double_to_long_bits(longitude),
            accuracy: double_to_long_bits(accuracy),
            auth_ticket: STANDARD.encode(auth_ticket),
            session_data: STANDARD.encode(session_hash),
            requests,
        }
    }
}

/// Rate-limit metadata reported by the hash service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateInfo {
    pub auth_token: Option<String>,
    pub max_request_count: Option<u64>,
    pub rate_limit_seconds: Option<u64>,
    pub rate_period_end: Option<i64>,
    pub rate_requests_remaining: Option<u64>,
    pub token_expiration: Option<i64>,
}

impl RateInfo {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
        };
        Self {
            auth_token: text(HEADER_AUTH_TOKEN),
            max_request_count: text(HEADER_MAX_REQUEST_COUNT).and_then(|v| v.parse().ok()),
            rate_limit_seconds: text(HEADER_RATE_LIMIT_SECONDS).and_then(|v| v.parse().ok()),
            rate_period_end: text(HEADER_RATE_PERIOD_END).and_then(|v| v.parse().ok()),
            rate_requests_remaining: text(HEADER_RATE_REQUESTS_REMAINING).and_then(|v| v.parse().ok()),
            token_expiration: text(HEADER_AUTH_TOKEN_EXPIRATION).and_then(|v| v.parse().ok()),
        }
    }
}

/// Hashes returned for one signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashResponse {
    pub location_auth_hash: i64,
    pub location_hash: i64,
    pub request_hashes: Vec<u64>,
    pub rate_info: RateInfo,
}

/// A hashing backend. The remote service is the only one shipped here; a
/// native implementation can be supplied by the caller.
#[async_trait]
pub trait Hasher: Send {
    async fn hash(&mut self, request: HashRequest) -> Result<HashResponse, SigError>;

    /// Rate-limit data from the most recent call, if the backend has any
    fn rate_info(&self) -> Option<&RateInfo> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct HashServerConfig {
    pub endpoint: String,
    pub key: String,
    /// Applied to the whole exchange; the service may stall while rate limiting
    pub timeout: Duration,
    pub user_agent: String,
}

impl HashServerConfig {
    pub fn new(endpoint: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            key: key.into(),
            timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// HTTP client for the remote hash service.
pub struct HashServerClient {
    client: reqwest::Client,
    config: HashServerConfig,
    rate_info: Option<RateInfo>,
}

impl HashServerClient {
    pub fn new(config: HashServerConfig) -> Result<Self, SigError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        info!(endpoint = %config.endpoint, "Using remote hash service");
        Ok(Self {
            client,
            config,
            rate_info: None,
        })
    }

    pub fn config(&self) -> &HashServerConfig {
        &self.config
    }

    /// Hashes one signature's worth of inputs.
    #[allow(clippy::too_many_arguments)]
    pub async fn hash_parts(
        &mut self,
        auth_ticket: &[u8],
        latitude: f64,
        longitude: f64,
        accuracy: f64,
        timestamp: u64,
        session_hash: &[u8],
        requests: Vec<String>,
    ) -> Result<HashResponse, SigError> {
        let request = HashRequest::new(auth_ticket, latitude, longitude, accuracy, timestamp, session_hash, requests);
        self.send(&request).await
    }

    async fn send(&mut self, request: &HashRequest) -> Result<HashResponse, SigError> {
        let body = serde_json::to_string(request)?;
        debug!(
            endpoint = %self.config.endpoint,
            requests = request.requests.len(),
            body_len = body.len(),
            "Hash request"
        );

        let response = self
            .client
            .post(&self.config.endpoint)
            .header(AUTH_TOKEN_HEADER, &self.config.key)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, &self.config.user_agent)
            .body(body)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                self.rate_info = None;
                warn!(error = %e, "Hash service unreachable");
                return Err(SigError::service("Unknown failure", 0, e.to_string(), true));
            }
        };

        let status = response.status().as_u16();
        let rate_info = RateInfo::from_headers(response.headers());
        self.rate_info = Some(rate_info.clone());

        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                warn!(status, error = %e, "Hash service response cut short");
                return Err(SigError::service("Unknown failure", 0, e.to_string(), true));
            }
        };
        debug!(status, body_len = text.len(), "Hash response");

        let result = classify_response(status, text).map(|(location_auth_hash, location_hash, request_hashes)| {
            HashResponse {
                location_auth_hash,
                location_hash,
                request_hashes,
                rate_info,
            }
        });
        if let Err(e) = &result {
            warn!(status, retry = e.is_retryable(), "Hashing failed: {}", e);
        }
        result
    }
}

#[async_trait]
impl Hasher for HashServerClient {
    async fn hash(&mut self, request: HashRequest) -> Result<HashResponse, SigError> {
        self.send(&request).await
    }

    fn rate_info(&self) -> Option<&RateInfo> {
        self.rate_info.as_ref()
    }
}

/// Maps a status and body to the hashes or to an error carrying the retry policy.
pub fn classify_response(status: u16, body: String) -> Result<(i64, i64, Vec<u64>), SigError> {
    match status {
        200 => parse_hash_body(&body),
        400 => Err(SigError::service("Bad request to hashing server", status, body, false)),
        401 => Err(SigError::service("Invalid key sent to hashing server", status, body, false)),
        429 => Err(SigError::service("Request limited", status, body, true)),
        _ => Err(SigError::service(format!("Unknown failure {status}"), status, body, true)),
    }
}

/// Parses a successful response body into (location auth hash, location hash, request hashes).
pub fn parse_hash_body(body: &str) -> Result<(i64, i64, Vec<u64>), SigError> {
    let quoted = quote_large_integers(body);
    let value: Value =
        serde_json::from_str(&quoted).map_err(|e| SigError::protocol(format!("Error parsing data: {e}"), body))?;

    let object = value
        .as_object()
        .ok_or_else(|| SigError::protocol("Error parsing data: not an object", body))?;

    let location_hash = match object.get("locationHash") {
        None | Some(Value::Null) => return Err(SigError::protocol("Missing location hash", body)),
        Some(v) => signed_value(v).ok_or_else(|| SigError::protocol("Invalid locationHash", body))?,
    };
    let location_auth_hash = match object.get("locationAuthHash") {
        None | Some(Value::Null) => return Err(SigError::protocol("Missing location auth hash", body)),
        Some(v) => signed_value(v).ok_or_else(|| SigError::protocol("Invalid locationAuthHash", body))?,
    };

    let request_hashes = match object.get("requestHashes") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| unsigned_value(v).ok_or_else(|| SigError::protocol("Invalid request hash", body)))
            .collect::<Result<Vec<_>, _>>()?,
        Some(single) => vec![unsigned_value(single).ok_or_else(|| SigError::protocol("Invalid request hash", body))?],
    };

    Ok((location_auth_hash, location_hash, request_hashes))
}

fn signed_value(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => parse_i64_wrapping(s),
        Value::Number(n) => n.as_i64().or_else(|| n.as_u64().map(|v| v as i64)),
        _ => None,
    }
}

fn unsigned_value(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => parse_u64_wrapping(s),
        Value::Number(n) => n.as_u64().or_else(|| n.as_i64().map(|v| v as u64)),
        _ => None,
    }
}
