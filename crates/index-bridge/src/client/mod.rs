//! REST protocol client for the search backend.
//!
//! Every operation issues exactly one HTTP call (the cached version probe
//! aside) and maps a status of 400 or above to [`RequestError::Status`].
//! Operations that remove something report whether it existed instead of
//! failing on 404.

pub mod bulk;
pub mod response;
pub mod transport;

pub use bulk::{BulkAction, BulkBatch, BulkSummary};
pub use response::{ClusterHealth, SearchHit, SearchResponse};
pub use transport::{
    ElasticsearchTransport, HttpMethod, RequestBody, SearchTransport, TransportRequest,
    TransportResponse, encode_segment,
};

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::SearchClientConfig;
use crate::error::{BridgeResult, RequestError, RequestResult};

/// Handle on the search backend.
///
/// Cloning is cheap: clones share the transport (and so its HTTP connection
/// pool) and the cached backend version.
#[derive(Clone)]
pub struct SearchClient {
    transport: Arc<dyn SearchTransport>,
    config: Arc<SearchClientConfig>,
    /// Backend version, `None` until probed.
    version: Arc<RwLock<Option<BackendVersion>>>,
}

/// Backend product line, from `version.distribution` of `GET /`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distribution {
    /// Elasticsearch, which does not report a distribution.
    Elasticsearch,
    /// OpenSearch, whose version numbering restarted at 1.
    OpenSearch,
}

/// Version reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendVersion {
    /// Product line.
    pub distribution: Distribution,
    /// Major version number.
    pub major: u32,
}

impl BackendVersion {
    /// Whether bulk metadata must name a mapping type.
    ///
    /// Only Elasticsearch before 7 needs `_type`. OpenSearch rejects it in
    /// every version.
    pub fn requires_mapping_type(&self) -> bool {
        self.distribution == Distribution::Elasticsearch && self.major < 7
    }
}

impl fmt::Debug for SearchClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchClient")
            .field("node", &self.config.primary_node())
            .field("version", &*self.version.read())
            .finish_non_exhaustive()
    }
}

impl SearchClient {
    /// Creates a client talking HTTP to the configured node.
    pub fn new(config: SearchClientConfig) -> BridgeResult<Self> {
        config.validate()?;
        let transport = ElasticsearchTransport::new(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Creates a client over an arbitrary transport.
    pub fn with_transport(config: SearchClientConfig, transport: Arc<dyn SearchTransport>) -> Self {
        Self {
            transport,
            config: Arc::new(config),
            version: Arc::new(RwLock::new(None)),
        }
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &SearchClientConfig {
        &self.config
    }

    async fn call(&self, request: TransportRequest) -> RequestResult<TransportResponse> {
        let method = request.method;
        let path = request.path.clone();
        debug!(method = %method, path = %path, "Sending search backend request");

        let budget = self.config.call_budget();
        let response = match tokio::time::timeout(budget, self.transport.send(request)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(RequestError::Timeout {
                    method: method.to_string(),
                    path,
                    timeout_ms: budget.as_millis() as u64,
                });
            }
        };

        if response.status >= 400 {
            debug!(
                method = %method,
                path = %path,
                status = response.status,
                "Search backend returned an error status"
            );
            return Err(RequestError::Status {
                method: method.to_string(),
                path,
                status: response.status,
                reason: response.reason,
                body: response.body,
            });
        }

        Ok(response)
    }

    async fn call_json(&self, request: TransportRequest) -> RequestResult<Value> {
        let path = request.path.clone();
        let response = self.call(request).await?;
        if response.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&response.body).map_err(|e| RequestError::InvalidResponse {
            path,
            message: e.to_string(),
        })
    }

    /// Version of the backend.
    ///
    /// Probed once with `GET /` and cached. A failed probe is not an error:
    /// Elasticsearch at the configured fallback major is assumed and the
    /// probe is retried on the next call.
    pub async fn backend_version(&self) -> BackendVersion {
        let cached = *self.version.read();
        if let Some(version) = cached {
            return version;
        }

        let fallback = BackendVersion {
            distribution: Distribution::Elasticsearch,
            major: self.config.fallback_major_version,
        };
        match self.call_json(TransportRequest::new(HttpMethod::Get, "/")).await {
            Ok(body) => match parse_backend_version(&body) {
                Some(version) => {
                    *self.version.write() = Some(version);
                    debug!(
                        distribution = ?version.distribution,
                        major = version.major,
                        "Detected search backend version"
                    );
                    version
                }
                None => {
                    warn!(fallback = fallback.major, "Search backend did not report a version");
                    fallback
                }
            },
            Err(e) => {
                warn!(error = %e, fallback = fallback.major, "Search backend version probe failed");
                fallback
            }
        }
    }

    /// Major version of the backend. See [`SearchClient::backend_version`].
    pub async fn major_version(&self) -> u32 {
        self.backend_version().await.major
    }

    /// Creates an index with the given settings and mappings.
    pub async fn create_index(&self, name: &str, body: &Value) -> RequestResult<()> {
        let request = TransportRequest::new(HttpMethod::Put, index_path(name)).with_json(body.clone());
        self.call(request).await?;
        Ok(())
    }

    /// Creates the first generation of a rollover family, carrying the write alias.
    pub async fn create_rollover_index(
        &self,
        alias: &str,
        generation: &str,
        body: &Value,
    ) -> RequestResult<()> {
        let mut body = body.clone();
        if let Some(object) = body.as_object_mut() {
            let mut aliases = serde_json::Map::new();
            aliases.insert(alias.to_string(), json!({ "is_write_index": true }));
            object.insert("aliases".to_string(), Value::Object(aliases));
        }
        let request = TransportRequest::new(HttpMethod::Put, index_path(generation)).with_json(body);
        self.call(request).await?;
        Ok(())
    }

    /// Whether an index or alias exists.
    pub async fn index_exists(&self, name: &str) -> RequestResult<bool> {
        let request = TransportRequest::new(HttpMethod::Head, index_path(name));
        Ok(absent_on_404(self.call(request).await)?.is_some())
    }

    /// Returns an index definition (settings, mappings and aliases).
    pub async fn get_index(&self, name: &str) -> RequestResult<Option<Value>> {
        let request = TransportRequest::new(HttpMethod::Get, index_path(name));
        absent_on_404(self.call_json(request).await)
    }

    /// Deletes an index. Returns false when it did not exist.
    pub async fn delete_index(&self, name: &str) -> RequestResult<bool> {
        let request = TransportRequest::new(HttpMethod::Delete, index_path(name));
        Ok(absent_on_404(self.call(request).await)?.is_some())
    }

    /// Makes recent writes to an index visible to search.
    pub async fn refresh_index(&self, name: &str) -> RequestResult<()> {
        let request = TransportRequest::new(HttpMethod::Post, format!("{}/_refresh", index_path(name)));
        self.call(request).await?;
        Ok(())
    }

    /// Names of the indices behind an alias, sorted. Empty when the alias is absent.
    pub async fn get_alias(&self, alias: &str) -> RequestResult<Vec<String>> {
        let request = TransportRequest::new(HttpMethod::Get, format!("/_alias/{}", encode_segment(alias)));
        let body = absent_on_404(self.call_json(request).await)?;
        let mut indices: Vec<String> = body
            .as_ref()
            .and_then(Value::as_object)
            .map(|object| object.keys().cloned().collect())
            .unwrap_or_default();
        indices.sort();
        Ok(indices)
    }

    /// Sends a bulk batch and checks every item of the response.
    pub async fn bulk(&self, batch: &BulkBatch) -> RequestResult<BulkSummary> {
        if batch.is_empty() {
            return Ok(BulkSummary::default());
        }
        let framed = if self.backend_version().await.requires_mapping_type() {
            batch.clone().with_mapping_type("_doc").to_ndjson()
        } else {
            batch.to_ndjson()
        };
        let request = TransportRequest::new(HttpMethod::Post, "/_bulk").with_ndjson(framed);
        let body = self.call_json(request).await?;
        bulk::check_bulk_response(&body)
    }

    /// Indexes a single document.
    pub async fn index_document(
        &self,
        index: &str,
        id: &str,
        document: &Value,
    ) -> RequestResult<()> {
        let request = TransportRequest::new(HttpMethod::Put, document_path(index, id))
            .with_json(document.clone());
        self.call(request).await?;
        Ok(())
    }

    /// Deletes a single document. Returns false when it did not exist.
    pub async fn delete_document(&self, index: &str, id: &str) -> RequestResult<bool> {
        let request = TransportRequest::new(HttpMethod::Delete, document_path(index, id));
        Ok(absent_on_404(self.call(request).await)?.is_some())
    }

    /// Runs a search.
    ///
    /// With `scroll` set (a keep-alive such as `"1m"`) the response carries a
    /// scroll id to continue with [`scroll`](Self::scroll).
    pub async fn search(
        &self,
        index: &str,
        body: &Value,
        scroll: Option<&str>,
    ) -> RequestResult<SearchResponse> {
        let path = format!("{}/_search", index_path(index));
        let mut request = TransportRequest::new(HttpMethod::Post, path.clone()).with_json(body.clone());
        if let Some(keep_alive) = scroll {
            request = request.with_query("scroll", keep_alive);
        }
        let body = self.call_json(request).await?;
        SearchResponse::from_json(&path, &body)
    }

    /// Fetches the next page of a scroll.
    pub async fn scroll(&self, scroll_id: &str) -> RequestResult<SearchResponse> {
        let request = TransportRequest::new(HttpMethod::Post, "/_search/scroll").with_json(json!({
            "scroll": self.config.scroll_keep_alive,
            "scroll_id": scroll_id
        }));
        let body = self.call_json(request).await?;
        SearchResponse::from_json("/_search/scroll", &body)
    }

    /// Releases a scroll context. Returns false when it had already expired.
    pub async fn delete_scroll(&self, scroll_id: &str) -> RequestResult<bool> {
        let request = TransportRequest::new(
            HttpMethod::Delete,
            format!("/_search/scroll/{}", encode_segment(scroll_id)),
        );
        Ok(absent_on_404(self.call(request).await)?.is_some())
    }

    /// Counts the documents matching a query, or all documents.
    pub async fn count(&self, index: &str, query: Option<&Value>) -> RequestResult<u64> {
        let path = format!("{}/_count", index_path(index));
        let mut request = TransportRequest::new(HttpMethod::Post, path.clone());
        if let Some(query) = query {
            request = request.with_json(json!({ "query": query }));
        }
        let body = self.call_json(request).await?;
        body.get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| RequestError::InvalidResponse {
                path,
                message: "count response has no count".to_string(),
            })
    }

    /// Returns the cluster health summary.
    pub async fn cluster_health(&self) -> RequestResult<ClusterHealth> {
        let body = self
            .call_json(TransportRequest::new(HttpMethod::Get, "/_cluster/health"))
            .await?;
        Ok(ClusterHealth::from_json(&body))
    }

    /// Returns the settings of an index.
    pub async fn get_index_settings(&self, name: &str) -> RequestResult<Value> {
        let request = TransportRequest::new(HttpMethod::Get, format!("{}/_settings", index_path(name)));
        self.call_json(request).await
    }

    /// Updates dynamic settings of an index.
    pub async fn put_index_settings(&self, name: &str, settings: &Value) -> RequestResult<()> {
        let request = TransportRequest::new(HttpMethod::Put, format!("{}/_settings", index_path(name)))
            .with_json(settings.clone());
        self.call(request).await?;
        Ok(())
    }

    /// Updates cluster-wide settings.
    pub async fn put_cluster_settings(&self, settings: &Value) -> RequestResult<()> {
        let request =
            TransportRequest::new(HttpMethod::Put, "/_cluster/settings").with_json(settings.clone());
        self.call(request).await?;
        Ok(())
    }

    /// Adds properties to the mapping of an index.
    pub async fn create_mapping(&self, name: &str, mapping: &Value) -> RequestResult<()> {
        let request = TransportRequest::new(HttpMethod::Put, format!("{}/_mapping", index_path(name)))
            .with_json(mapping.clone());
        self.call(request).await?;
        Ok(())
    }

    /// Returns the mapping of an index.
    pub async fn get_mapping(&self, name: &str) -> RequestResult<Value> {
        let request = TransportRequest::new(HttpMethod::Get, format!("{}/_mapping", index_path(name)));
        self.call_json(request).await
    }

    /// Stores a script under an id.
    pub async fn create_stored_script(&self, id: &str, lang: &str, source: &str) -> RequestResult<()> {
        let request = TransportRequest::new(HttpMethod::Put, script_path(id)).with_json(json!({
            "script": { "lang": lang, "source": source }
        }));
        self.call(request).await?;
        Ok(())
    }

    /// Returns a stored script (`{"lang": .., "source": ..}`), if any.
    pub async fn get_stored_script(&self, id: &str) -> RequestResult<Option<Value>> {
        let request = TransportRequest::new(HttpMethod::Get, script_path(id));
        let body = absent_on_404(self.call_json(request).await)?;
        Ok(body.and_then(|body| body.get("script").cloned()))
    }

    /// Registers an index state management policy.
    pub async fn put_index_policy(&self, id: &str, policy: &Value) -> RequestResult<()> {
        let request = TransportRequest::new(HttpMethod::Put, policy_path(id)).with_json(policy.clone());
        self.call(request).await?;
        Ok(())
    }

    /// Returns an index state management policy, if registered.
    pub async fn get_index_policy(&self, id: &str) -> RequestResult<Option<Value>> {
        let request = TransportRequest::new(HttpMethod::Get, policy_path(id));
        absent_on_404(self.call_json(request).await)
    }

    /// Deletes an index state management policy. Returns false when absent.
    pub async fn delete_index_policy(&self, id: &str) -> RequestResult<bool> {
        let request = TransportRequest::new(HttpMethod::Delete, policy_path(id));
        Ok(absent_on_404(self.call(request).await)?.is_some())
    }

    /// Registers a composable index template.
    pub async fn put_index_template(&self, name: &str, template: &Value) -> RequestResult<()> {
        let request =
            TransportRequest::new(HttpMethod::Put, template_path(name)).with_json(template.clone());
        self.call(request).await?;
        Ok(())
    }

    /// Returns an index template, if registered.
    pub async fn get_index_template(&self, name: &str) -> RequestResult<Option<Value>> {
        let request = TransportRequest::new(HttpMethod::Get, template_path(name));
        absent_on_404(self.call_json(request).await)
    }

    /// Deletes an index template. Returns false when absent.
    pub async fn delete_index_template(&self, name: &str) -> RequestResult<bool> {
        let request = TransportRequest::new(HttpMethod::Delete, template_path(name));
        Ok(absent_on_404(self.call(request).await)?.is_some())
    }
}

fn index_path(name: &str) -> String {
    format!("/{}", encode_segment(name))
}

fn document_path(index: &str, id: &str) -> String {
    format!("/{}/_doc/{}", encode_segment(index), encode_segment(id))
}

fn script_path(id: &str) -> String {
    format!("/_scripts/{}", encode_segment(id))
}

fn policy_path(id: &str) -> String {
    format!("/_plugins/_ism/policies/{}", encode_segment(id))
}

fn template_path(name: &str) -> String {
    format!("/_index_template/{}", encode_segment(name))
}

fn absent_on_404<T>(result: RequestResult<T>) -> RequestResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

fn parse_backend_version(body: &Value) -> Option<BackendVersion> {
    let version = body.get("version")?;
    let major = version
        .get("number")?
        .as_str()?
        .split('.')
        .next()?
        .parse()
        .ok()
        .filter(|major| *major > 0)?;
    let distribution = match version.get("distribution").and_then(Value::as_str) {
        Some(name) if name.eq_ignore_ascii_case("opensearch") => Distribution::OpenSearch,
        _ => Distribution::Elasticsearch,
    };
    Some(BackendVersion { distribution, major })
}
