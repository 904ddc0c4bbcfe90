//! Bulk batches: NDJSON framing and per-item response checking.

use serde_json::{Map, Value, json};

use crate::error::{BulkItemFailure, RequestError};

/// One action of a bulk batch.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum BulkAction {
    /// Create or replace a document.
    Index {
        index: String,
        id: String,
        document: Map<String, Value>,
    },
    /// Partially update a document, inserting it when missing.
    Update {
        index: String,
        id: String,
        document: Map<String, Value>,
        retry_on_conflict: u32,
    },
    /// Delete a document.
    Delete { index: String, id: String },
}

impl BulkAction {
    /// The action name used in the action line.
    pub fn name(&self) -> &'static str {
        match self {
            BulkAction::Index { .. } => "index",
            BulkAction::Update { .. } => "update",
            BulkAction::Delete { .. } => "delete",
        }
    }

    /// Target index or alias.
    pub fn index(&self) -> &str {
        match self {
            BulkAction::Index { index, .. }
            | BulkAction::Update { index, .. }
            | BulkAction::Delete { index, .. } => index,
        }
    }

    /// Document id.
    pub fn id(&self) -> &str {
        match self {
            BulkAction::Index { id, .. }
            | BulkAction::Update { id, .. }
            | BulkAction::Delete { id, .. } => id,
        }
    }

    fn action_line(&self, mapping_type: Option<&str>) -> Value {
        let mut meta = Map::new();
        meta.insert("_index".to_string(), Value::String(self.index().to_string()));
        meta.insert("_id".to_string(), Value::String(self.id().to_string()));
        if let Some(mapping_type) = mapping_type {
            meta.insert("_type".to_string(), Value::String(mapping_type.to_string()));
        }
        if let BulkAction::Update {
            retry_on_conflict, ..
        } = self
        {
            meta.insert("retry_on_conflict".to_string(), json!(retry_on_conflict));
        }
        let mut line = Map::new();
        line.insert(self.name().to_string(), Value::Object(meta));
        Value::Object(line)
    }

    fn source_line(&self) -> Option<Value> {
        match self {
            BulkAction::Index { document, .. } => Some(Value::Object(document.clone())),
            BulkAction::Update { document, .. } => Some(json!({
                "doc": document,
                "doc_as_upsert": true
            })),
            BulkAction::Delete { .. } => None,
        }
    }
}

/// An ordered batch of bulk actions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkBatch {
    actions: Vec<BulkAction>,
    mapping_type: Option<String>,
}

impl BulkBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the `_type` written into action lines (backends before 7.x).
    pub fn with_mapping_type(mut self, mapping_type: impl Into<String>) -> Self {
        self.mapping_type = Some(mapping_type.into());
        self
    }

    /// Appends an action.
    pub fn push(&mut self, action: BulkAction) {
        self.actions.push(action);
    }

    /// Number of actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// True when the batch holds no action.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// The actions in insertion order.
    pub fn actions(&self) -> &[BulkAction] {
        &self.actions
    }

    /// Frames the batch as NDJSON.
    ///
    /// Each action contributes its action line and, for index and update, a
    /// source line. Every line ends with `\n`, including the last one.
    pub fn to_ndjson(&self) -> String {
        let mut body = String::new();
        for action in &self.actions {
            body.push_str(&action.action_line(self.mapping_type.as_deref()).to_string());
            body.push('\n');
            if let Some(source) = action.source_line() {
                body.push_str(&source.to_string());
                body.push('\n');
            }
        }
        body
    }
}

/// Outcome of a bulk request whose items all succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkSummary {
    /// Items acknowledged by the backend.
    pub succeeded: usize,
    /// Delete items that targeted a missing document.
    pub not_found: usize,
}

/// Checks every item of a bulk response.
///
/// A delete answered with 404 is not a failure. Every other item carrying an
/// error is collected, and the call fails with all of them at once.
pub fn check_bulk_response(body: &Value) -> Result<BulkSummary, RequestError> {
    let items = body
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| RequestError::InvalidResponse {
            path: "/_bulk".to_string(),
            message: "bulk response has no items array".to_string(),
        })?;

    let mut summary = BulkSummary::default();
    let mut failures = Vec::new();

    for (position, item) in items.iter().enumerate() {
        let Some((action, result)) = item.as_object().and_then(|o| o.iter().next()) else {
            continue;
        };
        let status = result.get("status").and_then(Value::as_u64).unwrap_or(0) as u16;

        if action == "delete" && status == 404 {
            summary.not_found += 1;
            continue;
        }

        match result.get("error") {
            None if status < 300 => summary.succeeded += 1,
            error => {
                let error = error.cloned().unwrap_or(Value::Null);
                failures.push(BulkItemFailure {
                    position,
                    action: action.clone(),
                    index: str_field(result, "_index"),
                    id: str_field(result, "_id"),
                    status,
                    error_type: str_field(&error, "type"),
                    reason: error
                        .get("reason")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| error.to_string()),
                });
            }
        }
    }

    if failures.is_empty() {
        Ok(summary)
    } else {
        Err(RequestError::BulkItems { failures })
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
