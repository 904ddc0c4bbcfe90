//! HTTP transport seam of the REST client.
//!
//! [`SearchClient`](super::SearchClient) builds requests and interprets
//! responses; a [`SearchTransport`] only moves bytes. The production
//! implementation wraps the `elasticsearch` crate's transport, which owns the
//! pooled HTTP client.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use elasticsearch::Elasticsearch;
use elasticsearch::auth::Credentials;
use elasticsearch::cert::CertificateValidation;
use elasticsearch::http::Method;
use elasticsearch::http::headers::{CONTENT_TYPE, HeaderMap, HeaderValue};
use elasticsearch::http::transport::{SingleNodeConnectionPool, TransportBuilder};
use serde_json::Value;

use crate::config::{SearchAuth, SearchClientConfig};
use crate::error::{BridgeError, BridgeResult, RequestError};

/// HTTP methods used by the client.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Head,
    Put,
    Post,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Method::Get,
            HttpMethod::Head => Method::Head,
            HttpMethod::Put => Method::Put,
            HttpMethod::Post => Method::Post,
            HttpMethod::Delete => Method::Delete,
        }
    }
}

/// Request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// No body.
    Empty,
    /// A JSON document, sent as `application/json`.
    Json(Value),
    /// Newline-delimited JSON, sent as `application/x-ndjson`.
    NdJson(String),
}

/// A single HTTP request against the search backend.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Path starting with `/`, segments already escaped.
    pub path: String,
    /// Query string parameters.
    pub query: Vec<(String, String)>,
    /// Payload.
    pub body: RequestBody,
}

impl TransportRequest {
    /// A request without query string or body.
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    /// Adds a query string parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Sets a JSON body.
    pub fn with_json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    /// Sets an NDJSON body.
    pub fn with_ndjson(mut self, body: String) -> Self {
        self.body = RequestBody::NdJson(body);
        self
    }

    /// Returns the value of a query string parameter.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// The raw outcome of a request that reached the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Canonical reason phrase of the status.
    pub reason: String,
    /// Response body, empty for `HEAD`.
    pub body: String,
}

/// Moves requests to the search backend.
///
/// Implementations return `Ok` for every response the backend produced,
/// whatever its status; only failures to obtain a response are errors.
#[async_trait]
pub trait SearchTransport: Send + Sync {
    /// Sends one request and returns the backend's response.
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, RequestError>;
}

/// [`SearchTransport`] backed by the `elasticsearch` crate.
///
/// Works against Elasticsearch and OpenSearch alike since only raw REST
/// calls are issued.
pub struct ElasticsearchTransport {
    client: Elasticsearch,
    request_timeout: Duration,
}

impl fmt::Debug for ElasticsearchTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElasticsearchTransport")
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl ElasticsearchTransport {
    /// Builds the transport from configuration.
    pub fn new(config: &SearchClientConfig) -> BridgeResult<Self> {
        let url = config.primary_node();
        let parsed_url: elasticsearch::http::Url = url.parse().map_err(|e| BridgeError::Config {
            message: format!("invalid node URL '{}': {}", url, e),
        })?;

        let conn_pool = SingleNodeConnectionPool::new(parsed_url);
        let mut builder = TransportBuilder::new(conn_pool)
            .timeout(Duration::from_millis(config.request_timeout_ms));

        if config.disable_certificate_validation {
            builder = builder.cert_validation(CertificateValidation::None);
        }

        if let Some(ref auth) = config.auth {
            builder = match auth {
                SearchAuth::Basic { username, password } => {
                    builder.auth(Credentials::Basic(username.clone(), password.clone()))
                }
                SearchAuth::Bearer { token } => builder.auth(Credentials::Bearer(token.clone())),
            };
        }

        let transport = builder.build().map_err(|e| BridgeError::Config {
            message: format!("failed to build transport: {}", e),
        })?;

        Ok(Self {
            client: Elasticsearch::new(transport),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        })
    }
}

#[async_trait]
impl SearchTransport for ElasticsearchTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, RequestError> {
        let mut headers = HeaderMap::new();
        let body = match request.body {
            RequestBody::Empty => None,
            RequestBody::Json(value) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                Some(value.to_string().into_bytes())
            }
            RequestBody::NdJson(lines) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/x-ndjson"));
                Some(lines.into_bytes())
            }
        };
        let query = (!request.query.is_empty()).then_some(&request.query);

        let response = self
            .client
            .transport()
            .send(
                request.method.into(),
                &request.path,
                headers,
                query,
                body,
                Some(self.request_timeout),
            )
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RequestError::Timeout {
                        method: request.method.to_string(),
                        path: request.path.clone(),
                        timeout_ms: self.request_timeout.as_millis() as u64,
                    }
                } else {
                    RequestError::Transport {
                        method: request.method.to_string(),
                        path: request.path.clone(),
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status_code();
        let reason = status.canonical_reason().unwrap_or("Unknown").to_string();
        let body = response.text().await.map_err(|e| RequestError::Transport {
            method: request.method.to_string(),
            path: request.path.clone(),
            message: format!("failed to read response body: {}", e),
        })?;

        Ok(TransportResponse {
            status: status.as_u16(),
            reason,
            body,
        })
    }
}

/// Escapes a path segment such as an index name or document id.
pub fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'*' | b',' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}
