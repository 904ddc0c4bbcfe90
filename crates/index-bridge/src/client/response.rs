//! Typed views of search and cluster responses.

use serde_json::{Map, Value};

use crate::error::RequestError;

/// One search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Concrete index holding the document.
    pub index: String,
    /// Document id.
    pub id: String,
    /// Relevance score, absent for sorted or filtered queries.
    pub score: Option<f64>,
    /// Document source.
    pub source: Map<String, Value>,
}

/// One page of search results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResponse {
    /// Scroll context id, present when a scroll was requested.
    pub scroll_id: Option<String>,
    /// Total number of matching documents.
    pub total: u64,
    /// Hits of this page, in backend order.
    pub hits: Vec<SearchHit>,
    /// Aggregation results, when the request asked for any.
    pub aggregations: Option<Value>,
}

impl SearchResponse {
    /// Parses a `_search` or `_search/scroll` response body.
    ///
    /// `hits.total` is an object `{"value": n}` from 7.x on and a plain
    /// number before; both shapes are accepted.
    pub fn from_json(path: &str, body: &Value) -> Result<Self, RequestError> {
        let hits = body.get("hits").ok_or_else(|| RequestError::InvalidResponse {
            path: path.to_string(),
            message: "search response has no hits".to_string(),
        })?;

        let total = match hits.get("total") {
            Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
            Some(total) => total.get("value").and_then(Value::as_u64).unwrap_or(0),
            None => 0,
        };

        let hits = hits
            .get("hits")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(parse_hit).collect())
            .unwrap_or_default();

        Ok(Self {
            scroll_id: body
                .get("_scroll_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            total,
            hits,
            aggregations: body.get("aggregations").cloned(),
        })
    }
}

fn parse_hit(hit: &Value) -> SearchHit {
    SearchHit {
        index: hit
            .get("_index")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        id: hit
            .get("_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        score: hit.get("_score").and_then(Value::as_f64),
        source: hit
            .get("_source")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
    }
}

/// The parts of `GET /_cluster/health` the bridge uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterHealth {
    /// `green`, `yellow` or `red`.
    pub status: String,
    /// Number of nodes in the cluster.
    pub number_of_nodes: u32,
    /// Number of data nodes.
    pub number_of_data_nodes: u32,
}

impl ClusterHealth {
    pub(crate) fn from_json(body: &Value) -> Self {
        let count = |key: &str| body.get(key).and_then(Value::as_u64).unwrap_or(0) as u32;
        Self {
            status: body
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            number_of_nodes: count("number_of_nodes"),
            number_of_data_nodes: count("number_of_data_nodes"),
        }
    }
}
