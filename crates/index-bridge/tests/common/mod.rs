//! Test infrastructure: an in-memory search backend and primary row store.
//!
//! [`FakeBackend`] implements [`SearchTransport`] over a small model of the
//! REST protocol: indices, aliases, policies, templates, documents and scroll
//! contexts. Queries support `match_all`, `ids`, `term`, `match`, `range` and
//! `bool`. Every request is recorded for assertions on the wire traffic.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};

use helios_index_bridge::client::{
    HttpMethod, RequestBody, SearchClient, SearchTransport, TransportRequest, TransportResponse,
};
use helios_index_bridge::config::SearchClientConfig;
use helios_index_bridge::error::{BridgeResult, RequestError};
use helios_index_bridge::search::PrimaryRowSource;
use helios_index_bridge::types::{PrimaryKey, Row};

#[derive(Debug, Default)]
struct FakeIndex {
    definition: Value,
    documents: BTreeMap<String, Map<String, Value>>,
}

#[derive(Debug)]
struct State {
    version: String,
    distribution: Option<String>,
    nodes: u32,
    data_nodes: u32,
    indices: BTreeMap<String, FakeIndex>,
    /// Alias name to member indices, write index first.
    aliases: BTreeMap<String, Vec<String>>,
    policies: BTreeMap<String, Value>,
    templates: BTreeMap<String, Value>,
    scrolls: HashMap<String, VecDeque<Value>>,
    next_scroll: u64,
    failures: Vec<(HttpMethod, String, u16, String)>,
    requests: Vec<TransportRequest>,
}

/// In-memory search backend.
#[derive(Debug)]
pub struct FakeBackend {
    state: Mutex<State>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                version: "7.10.2".to_string(),
                distribution: None,
                nodes: 1,
                data_nodes: 1,
                indices: BTreeMap::new(),
                aliases: BTreeMap::new(),
                policies: BTreeMap::new(),
                templates: BTreeMap::new(),
                scrolls: HashMap::new(),
                next_scroll: 0,
                failures: Vec::new(),
                requests: Vec::new(),
            }),
        })
    }

    pub fn set_version(&self, version: &str) {
        self.state.lock().version = version.to_string();
    }

    pub fn set_distribution(&self, distribution: &str) {
        self.state.lock().distribution = Some(distribution.to_string());
    }

    pub fn set_nodes(&self, nodes: u32, data_nodes: u32) {
        let mut state = self.state.lock();
        state.nodes = nodes;
        state.data_nodes = data_nodes;
    }

    /// Makes the next request matching `method` and `path` fail with `status`.
    pub fn fail_next(&self, method: HttpMethod, path: &str, status: u16, body: &str) {
        self.state
            .lock()
            .failures
            .push((method, path.to_string(), status, body.to_string()));
    }

    /// Creates an index directly, bypassing the client.
    pub fn seed_index(&self, name: &str) {
        self.state
            .lock()
            .indices
            .entry(name.to_string())
            .or_default();
    }

    /// Stores a document directly, bypassing the client.
    pub fn seed_document(&self, index: &str, id: &str, source: Value) {
        let mut state = self.state.lock();
        let entry = state.indices.entry(index.to_string()).or_default();
        entry
            .documents
            .insert(id.to_string(), source.as_object().cloned().unwrap_or_default());
    }

    /// Adds an index to an alias.
    pub fn seed_alias(&self, alias: &str, index: &str) {
        self.state
            .lock()
            .aliases
            .entry(alias.to_string())
            .or_default()
            .push(index.to_string());
    }

    pub fn index_names(&self) -> Vec<String> {
        self.state.lock().indices.keys().cloned().collect()
    }

    pub fn index_definition(&self, name: &str) -> Option<Value> {
        self.state
            .lock()
            .indices
            .get(name)
            .map(|index| index.definition.clone())
    }

    pub fn alias_members(&self, alias: &str) -> Vec<String> {
        self.state
            .lock()
            .aliases
            .get(alias)
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_policy(&self, id: &str) -> bool {
        self.state.lock().policies.contains_key(id)
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.state.lock().templates.contains_key(name)
    }

    pub fn document(&self, index: &str, id: &str) -> Option<Map<String, Value>> {
        self.state
            .lock()
            .indices
            .get(index)
            .and_then(|i| i.documents.get(id).cloned())
    }

    pub fn document_count(&self, index: &str) -> usize {
        self.state
            .lock()
            .indices
            .get(index)
            .map(|i| i.documents.len())
            .unwrap_or(0)
    }

    pub fn open_scrolls(&self) -> usize {
        self.state.lock().scrolls.len()
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.state.lock().requests.clone()
    }

    /// Recorded requests with the given method and path.
    pub fn requests_to(&self, method: HttpMethod, path: &str) -> Vec<TransportRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }

    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }
}

#[async_trait]
impl SearchTransport for FakeBackend {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, RequestError> {
        let mut state = self.state.lock();
        state.requests.push(request.clone());

        if let Some(position) = state
            .failures
            .iter()
            .position(|(method, path, _, _)| *method == request.method && *path == request.path)
        {
            let (_, _, status, body) = state.failures.remove(position);
            return Ok(respond(status, body));
        }

        let segments: Vec<String> = request
            .path
            .trim_start_matches('/')
            .split('/')
            .map(decode_segment)
            .collect();
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
        let body = match &request.body {
            RequestBody::Json(value) => value.clone(),
            _ => Value::Null,
        };

        let response = match (request.method, segments.as_slice()) {
            (HttpMethod::Get, [""]) => {
                let mut version = Map::new();
                version.insert("number".to_string(), json!(state.version));
                if let Some(distribution) = &state.distribution {
                    version.insert("distribution".to_string(), json!(distribution));
                }
                ok(json!({"name": "fake", "version": version}))
            }
            (HttpMethod::Get, ["_cluster", "health"]) => ok(json!({
                "status": "green",
                "number_of_nodes": state.nodes,
                "number_of_data_nodes": state.data_nodes
            })),
            (HttpMethod::Put, ["_cluster", "settings"]) => ok(json!({"acknowledged": true})),
            (HttpMethod::Post, ["_bulk"]) => match &request.body {
                RequestBody::NdJson(text) => state.bulk(text),
                _ => error(400, "parse_exception", "bulk body must be ndjson"),
            },
            (HttpMethod::Post, ["_search", "scroll"]) => state.next_page(&body),
            (HttpMethod::Delete, ["_search", "scroll", id]) => match state.scrolls.remove(*id) {
                Some(_) => ok(json!({"succeeded": true, "num_freed": 1})),
                None => respond(404, json!({"succeeded": true, "num_freed": 0}).to_string()),
            },
            (HttpMethod::Get, ["_alias", alias]) => match state.aliases.get(*alias) {
                Some(members) if !members.is_empty() => {
                    let mut out = Map::new();
                    for member in members {
                        let mut names = Map::new();
                        names.insert(alias.to_string(), json!({}));
                        out.insert(member.clone(), json!({ "aliases": names }));
                    }
                    ok(Value::Object(out))
                }
                _ => error(404, "aliases_not_found_exception", "alias missing"),
            },
            (method, ["_plugins", "_ism", "policies", id]) => {
                registry(&mut state.policies, method, id, body, "policy")
            }
            (method, ["_index_template", name]) => {
                registry(&mut state.templates, method, name, body, "index_templates")
            }
            (HttpMethod::Put, [index]) => state.create_index(index, body),
            (HttpMethod::Head, [index]) => {
                if state.exists(index) {
                    respond(200, String::new())
                } else {
                    respond(404, String::new())
                }
            }
            (HttpMethod::Get, [index]) => match state.indices.get(*index) {
                Some(found) => {
                    let mut out = Map::new();
                    out.insert(index.to_string(), found.definition.clone());
                    ok(Value::Object(out))
                }
                None => error(404, "index_not_found_exception", "no such index"),
            },
            (HttpMethod::Delete, [index]) => {
                if state.indices.remove(*index).is_some() {
                    for members in state.aliases.values_mut() {
                        members.retain(|m| m != index);
                    }
                    state.aliases.retain(|_, members| !members.is_empty());
                    ok(json!({"acknowledged": true}))
                } else {
                    error(404, "index_not_found_exception", "no such index")
                }
            }
            (HttpMethod::Post, [index, "_refresh"]) => {
                if state.exists(index) {
                    ok(json!({"_shards": {"failed": 0}}))
                } else {
                    error(404, "index_not_found_exception", "no such index")
                }
            }
            (HttpMethod::Post | HttpMethod::Get, [index, "_search"]) => {
                state.search(index, &body, request.query_param("scroll").is_some())
            }
            (HttpMethod::Post | HttpMethod::Get, [index, "_count"]) => {
                let query = body.get("query").cloned().unwrap_or(Value::Null);
                let count = state.matching(index, &query).len();
                ok(json!({"count": count}))
            }
            _ => error(400, "illegal_argument_exception", "unsupported request"),
        };
        Ok(response)
    }
}

impl State {
    fn exists(&self, name: &str) -> bool {
        self.indices.contains_key(name) || self.aliases.contains_key(name)
    }

    fn resolve(&self, name: &str) -> Vec<String> {
        if let Some(members) = self.aliases.get(name) {
            return members.clone();
        }
        if self.indices.contains_key(name) {
            return vec![name.to_string()];
        }
        Vec::new()
    }

    fn create_index(&mut self, name: &str, body: Value) -> TransportResponse {
        if self.exists(name) {
            return error(
                400,
                "resource_already_exists_exception",
                &format!("index [{}] already exists", name),
            );
        }
        if let Some(aliases) = body.get("aliases").and_then(Value::as_object) {
            for alias in aliases.keys() {
                self.aliases
                    .entry(alias.clone())
                    .or_default()
                    .insert(0, name.to_string());
            }
        }
        self.indices.insert(
            name.to_string(),
            FakeIndex {
                definition: body,
                documents: BTreeMap::new(),
            },
        );
        ok(json!({"acknowledged": true, "index": name}))
    }

    fn bulk(&mut self, text: &str) -> TransportResponse {
        let mut lines = text.lines();
        let mut items = Vec::new();
        let mut errors = false;

        while let Some(line) = lines.next() {
            let Ok(Value::Object(action_line)) = serde_json::from_str::<Value>(line) else {
                return error(400, "parse_exception", "malformed action line");
            };
            let Some((action, meta)) = action_line.into_iter().next() else {
                return error(400, "parse_exception", "empty action line");
            };
            let target = meta["_index"].as_str().unwrap_or_default().to_string();
            let id = meta["_id"].as_str().unwrap_or_default().to_string();
            let source = if action == "delete" {
                Value::Null
            } else {
                match lines.next().map(serde_json::from_str::<Value>) {
                    Some(Ok(source)) => source,
                    _ => return error(400, "parse_exception", "missing source line"),
                }
            };

            let members = self.resolve(&target);
            let (status, item_error, concrete) = match (action.as_str(), members.as_slice()) {
                ("delete", [single]) => {
                    let removed = self
                        .indices
                        .get_mut(single)
                        .and_then(|i| i.documents.remove(&id));
                    match removed {
                        Some(_) => (200, None, single.clone()),
                        None => (404, None, single.clone()),
                    }
                }
                ("delete", [_, _, ..]) => (
                    400,
                    Some(json!({
                        "type": "illegal_argument_exception",
                        "reason": "alias has more than one index associated with it"
                    })),
                    target.clone(),
                ),
                (_, []) if action == "delete" => (404, None, target.clone()),
                ("index" | "update", members) => {
                    let write = members.first().cloned().unwrap_or_else(|| target.clone());
                    let index = self.indices.entry(write.clone()).or_default();
                    let document = if action == "update" {
                        source.get("doc").cloned().unwrap_or(Value::Null)
                    } else {
                        source
                    };
                    let fields = document.as_object().cloned().unwrap_or_default();
                    let entry = index.documents.entry(id.clone()).or_default();
                    for (key, value) in fields {
                        entry.insert(key, value);
                    }
                    (200, None, write)
                }
                _ => (
                    400,
                    Some(json!({"type": "illegal_argument_exception", "reason": "unknown action"})),
                    target.clone(),
                ),
            };

            let mut result = Map::new();
            result.insert("_index".to_string(), json!(concrete));
            result.insert("_id".to_string(), json!(id));
            result.insert("status".to_string(), json!(status));
            if let Some(item_error) = item_error {
                errors = true;
                result.insert("error".to_string(), item_error);
            }
            let mut item = Map::new();
            item.insert(action, Value::Object(result));
            items.push(Value::Object(item));
        }

        ok(json!({"took": 1, "errors": errors, "items": items}))
    }

    fn matching(&self, name: &str, query: &Value) -> Vec<Value> {
        let mut hits = Vec::new();
        for index in self.resolve(name) {
            let Some(found) = self.indices.get(&index) else {
                continue;
            };
            for (id, source) in &found.documents {
                if matches(id, source, query) {
                    hits.push(json!({
                        "_index": index,
                        "_id": id,
                        "_score": 1.0,
                        "_source": source
                    }));
                }
            }
        }
        hits
    }

    fn search(&mut self, name: &str, body: &Value, scroll: bool) -> TransportResponse {
        if !self.exists(name) {
            return error(404, "index_not_found_exception", "no such index");
        }
        let query = body.get("query").cloned().unwrap_or(Value::Null);
        let mut hits = self.matching(name, &query);
        let total = hits.len();

        let size = body.get("size").and_then(Value::as_u64).unwrap_or(10) as usize;
        let from = body.get("from").and_then(Value::as_u64).unwrap_or(0) as usize;
        if !scroll {
            hits = hits.into_iter().skip(from).collect();
        }
        let rest = if hits.len() > size {
            hits.split_off(size)
        } else {
            Vec::new()
        };

        let mut response = json!({
            "took": 1,
            "hits": { "total": { "value": total, "relation": "eq" }, "hits": hits }
        });

        if let Some(aggs) = body.get("aggs").and_then(Value::as_object) {
            let all = self.matching(name, &query);
            let mut results = Map::new();
            for (agg_name, spec) in aggs {
                results.insert(agg_name.clone(), aggregate(&all, spec));
            }
            response["aggregations"] = Value::Object(results);
        }

        if scroll {
            self.next_scroll += 1;
            let scroll_id = format!("scroll-{}", self.next_scroll);
            let mut pages = VecDeque::new();
            for chunk in rest.chunks(size.max(1)) {
                pages.push_back(Value::Array(chunk.to_vec()));
            }
            self.scrolls.insert(scroll_id.clone(), pages);
            response["_scroll_id"] = json!(scroll_id);
        }
        ok(response)
    }

    fn next_page(&mut self, body: &Value) -> TransportResponse {
        let scroll_id = body["scroll_id"].as_str().unwrap_or_default().to_string();
        let Some(pages) = self.scrolls.get_mut(&scroll_id) else {
            return error(404, "search_context_missing_exception", "no search context found");
        };
        let hits = pages.pop_front().unwrap_or_else(|| json!([]));
        ok(json!({
            "_scroll_id": scroll_id,
            "hits": { "total": { "value": 0 }, "hits": hits }
        }))
    }
}

fn registry(
    entries: &mut BTreeMap<String, Value>,
    method: HttpMethod,
    name: &str,
    body: Value,
    kind: &str,
) -> TransportResponse {
    match method {
        HttpMethod::Put => {
            entries.insert(name.to_string(), body);
            ok(json!({"acknowledged": true}))
        }
        HttpMethod::Get => match entries.get(name) {
            Some(found) => {
                let mut out = Map::new();
                out.insert("_id".to_string(), json!(name));
                out.insert(kind.to_string(), found.clone());
                ok(Value::Object(out))
            }
            None => error(404, "resource_not_found_exception", "not found"),
        },
        HttpMethod::Delete => match entries.remove(name) {
            Some(_) => ok(json!({"acknowledged": true})),
            None => error(404, "resource_not_found_exception", "not found"),
        },
        _ => error(405, "method_not_allowed", "unsupported method"),
    }
}

fn matches(id: &str, source: &Map<String, Value>, query: &Value) -> bool {
    let Some((kind, spec)) = query.as_object().and_then(|o| o.iter().next()) else {
        return true;
    };
    match kind.as_str() {
        "match_all" => true,
        "ids" => spec["values"]
            .as_array()
            .map(|values| values.iter().any(|v| v.as_str() == Some(id)))
            .unwrap_or(false),
        "term" => field_operand(spec)
            .map(|(field, operand)| source.get(field) == Some(operand))
            .unwrap_or(false),
        "match" => field_operand(spec)
            .map(|(field, operand)| {
                let wanted = operand.as_str().unwrap_or_default().to_lowercase();
                source
                    .get(field)
                    .and_then(Value::as_str)
                    .map(|text| text.to_lowercase().contains(&wanted))
                    .unwrap_or(false)
            })
            .unwrap_or(false),
        "range" => field_operand(spec)
            .map(|(field, bounds)| {
                let Some(value) = source.get(field).and_then(Value::as_f64) else {
                    return false;
                };
                let bound = |key: &str| bounds.get(key).and_then(Value::as_f64);
                bound("gte").is_none_or(|b| value >= b)
                    && bound("gt").is_none_or(|b| value > b)
                    && bound("lte").is_none_or(|b| value <= b)
                    && bound("lt").is_none_or(|b| value < b)
            })
            .unwrap_or(false),
        "bool" => {
            let clause = |name: &str| -> Vec<Value> {
                match spec.get(name) {
                    Some(Value::Array(items)) => items.clone(),
                    Some(item) => vec![item.clone()],
                    None => Vec::new(),
                }
            };
            let must = clause("must")
                .iter()
                .chain(clause("filter").iter())
                .all(|q| matches(id, source, q));
            let should = clause("should");
            let any = should.is_empty() || should.iter().any(|q| matches(id, source, q));
            let none = !clause("must_not").iter().any(|q| matches(id, source, q));
            must && any && none
        }
        _ => false,
    }
}

fn field_operand(spec: &Value) -> Option<(&str, &Value)> {
    spec.as_object()?
        .iter()
        .next()
        .map(|(field, operand)| (field.as_str(), operand))
}

fn aggregate(hits: &[Value], spec: &Value) -> Value {
    let Some((kind, params)) = spec.as_object().and_then(|o| o.iter().next()) else {
        return Value::Null;
    };
    let field = params["field"].as_str().unwrap_or_default();
    let values: Vec<f64> = hits
        .iter()
        .filter_map(|hit| hit["_source"].get(field).and_then(Value::as_f64))
        .collect();
    let value = match kind.as_str() {
        "min" => values.iter().cloned().reduce(f64::min),
        "max" => values.iter().cloned().reduce(f64::max),
        "sum" => Some(values.iter().sum()),
        "avg" if !values.is_empty() => Some(values.iter().sum::<f64>() / values.len() as f64),
        _ => None,
    };
    json!({ "value": value })
}

fn decode_segment(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&segment[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn ok(body: Value) -> TransportResponse {
    respond(200, body.to_string())
}

fn error(status: u16, kind: &str, reason: &str) -> TransportResponse {
    respond(
        status,
        json!({ "error": { "type": kind, "reason": reason }, "status": status }).to_string(),
    )
}

fn respond(status: u16, body: String) -> TransportResponse {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "",
    };
    TransportResponse {
        status,
        reason: reason.to_string(),
        body,
    }
}

/// Client over a fake backend.
pub fn client(backend: &Arc<FakeBackend>) -> SearchClient {
    SearchClient::with_transport(SearchClientConfig::default(), backend.clone())
}

/// Primary row store keyed by document id.
#[derive(Debug, Default)]
pub struct MemoryRows {
    rows: Mutex<HashMap<String, Row>>,
}

impl MemoryRows {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, row: Row) {
        self.rows.lock().insert(row.key.document_id(), row);
    }

    pub fn remove(&self, key: &PrimaryKey) {
        self.rows.lock().remove(&key.document_id());
    }
}

#[async_trait]
impl PrimaryRowSource for MemoryRows {
    async fn fetch_row(&self, key: &PrimaryKey) -> BridgeResult<Option<Row>> {
        Ok(self.rows.lock().get(&key.document_id()).cloned())
    }
}
