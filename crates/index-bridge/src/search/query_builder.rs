//! Query translator: filter expressions to search request bodies.
//!
//! A filter expression is either a leaf predicate on one field or a boolean
//! composition of `must`, `should`, `must_not` and `filter` clauses:
//!
//! ```json
//! {
//!   "must": [ { "field": "title", "operator": "match", "value": "ring" } ],
//!   "filter": [ { "field": "year", "operator": "range", "criteria": { "gte": 1950 } } ]
//! }
//! ```
//!
//! translates to
//!
//! ```json
//! { "bool": {
//!     "must": [ { "match": { "title": "ring" } } ],
//!     "filter": [ { "range": { "year": { "gte": 1950 } } } ] } }
//! ```

use std::fmt;

use serde_json::{Map, Value, json};

use crate::error::QueryError;

/// A predicate on a single field.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// Field name.
    pub field: String,
    /// Query operator, e.g. `term`, `match`, `range`, `prefix`.
    pub operator: String,
    /// Scalar (or array) operand.
    pub value: Option<Value>,
    /// Operand object for operators taking several parameters, e.g. `range`.
    pub criteria: Option<Map<String, Value>>,
}

/// Boolean composition of expressions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolExpression {
    /// Clauses that must match and contribute to the score.
    pub must: Vec<FilterExpression>,
    /// Clauses of which at least one should match.
    pub should: Vec<FilterExpression>,
    /// Clauses that must not match.
    pub must_not: Vec<FilterExpression>,
    /// Clauses that must match without scoring.
    pub filter: Vec<FilterExpression>,
}

impl BoolExpression {
    fn clause_mut(&mut self, name: &str) -> Option<&mut Vec<FilterExpression>> {
        match name {
            "must" => Some(&mut self.must),
            "should" => Some(&mut self.should),
            "must_not" => Some(&mut self.must_not),
            "filter" => Some(&mut self.filter),
            _ => None,
        }
    }

    fn clauses(&self) -> [(&'static str, &Vec<FilterExpression>); 4] {
        [
            ("must", &self.must),
            ("should", &self.should),
            ("must_not", &self.must_not),
            ("filter", &self.filter),
        ]
    }
}

/// A filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpression {
    /// A single-field predicate.
    Leaf(Predicate),
    /// A boolean composition.
    Bool(BoolExpression),
}

impl FilterExpression {
    /// A leaf predicate with a scalar operand.
    pub fn leaf(field: impl Into<String>, operator: impl Into<String>, value: Value) -> Self {
        FilterExpression::Leaf(Predicate {
            field: field.into(),
            operator: operator.into(),
            value: Some(value),
            criteria: None,
        })
    }

    /// A leaf predicate with an operand object.
    pub fn with_criteria(
        field: impl Into<String>,
        operator: impl Into<String>,
        criteria: Map<String, Value>,
    ) -> Self {
        FilterExpression::Leaf(Predicate {
            field: field.into(),
            operator: operator.into(),
            value: None,
            criteria: Some(criteria),
        })
    }

    /// An expression matching every document.
    pub fn match_all() -> Self {
        FilterExpression::Bool(BoolExpression::default())
    }

    /// Parses an expression from its JSON form.
    ///
    /// An object with a `field` key is a leaf, whose operator key may also be
    /// spelled `op`. Any other object is a boolean
    /// composition whose keys must be clause names. The composition may also
    /// be wrapped as `{"bool": {...}}`.
    pub fn from_json(value: &Value) -> Result<Self, QueryError> {
        let object = value.as_object().ok_or_else(|| QueryError::Malformed {
            message: format!("expected an object, got {}", value),
        })?;

        if object.contains_key("field") {
            return parse_leaf(object).map(FilterExpression::Leaf);
        }
        if let (1, Some(inner)) = (object.len(), object.get("bool")) {
            return Self::from_json(inner);
        }

        let mut expression = BoolExpression::default();
        for (name, clauses) in object {
            let target = expression
                .clause_mut(name)
                .ok_or_else(|| QueryError::UnknownClause {
                    clause: name.clone(),
                })?;
            match clauses {
                Value::Array(items) => {
                    for item in items {
                        target.push(Self::from_json(item)?);
                    }
                }
                single @ Value::Object(_) => target.push(Self::from_json(single)?),
                other => {
                    return Err(QueryError::Malformed {
                        message: format!("clause {} must be an object or array, got {}", name, other),
                    });
                }
            }
        }
        Ok(FilterExpression::Bool(expression))
    }

    /// Parses an expression from a JSON string.
    pub fn from_json_str(text: &str) -> Result<Self, QueryError> {
        let value: Value = serde_json::from_str(text).map_err(|e| QueryError::Malformed {
            message: e.to_string(),
        })?;
        Self::from_json(&value)
    }
}

fn parse_leaf(object: &Map<String, Value>) -> Result<Predicate, QueryError> {
    let text = |key: &str| {
        object
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| QueryError::Malformed {
                message: format!("predicate requires a string '{}'", key),
            })
    };
    let field = text("field")?;
    // `op` is the short spelling.
    let operator = if object.contains_key("operator") {
        text("operator")?
    } else {
        text("op")?
    };

    let (value, criteria) = match (object.get("value"), object.get("criteria")) {
        (_, Some(Value::Object(criteria))) => (None, Some(criteria.clone())),
        (Some(Value::Object(criteria)), None) => (None, Some(criteria.clone())),
        (Some(Value::Null) | None, None) => return Err(QueryError::EmptyPredicate { field }),
        (Some(value), None) => (Some(value.clone()), None),
        (_, Some(other)) => {
            return Err(QueryError::Malformed {
                message: format!("criteria of {} must be an object, got {}", field, other),
            });
        }
    };

    Ok(Predicate {
        field,
        operator,
        value,
        criteria,
    })
}

/// Translates an expression into the query DSL.
pub fn translate(expression: &FilterExpression) -> Value {
    match expression {
        FilterExpression::Leaf(predicate) => {
            let operand = match (&predicate.value, &predicate.criteria) {
                (_, Some(criteria)) => Value::Object(criteria.clone()),
                (Some(value), None) => value.clone(),
                (None, None) => Value::Null,
            };
            let mut inner = Map::new();
            inner.insert(predicate.field.clone(), operand);
            let mut outer = Map::new();
            outer.insert(predicate.operator.clone(), Value::Object(inner));
            Value::Object(outer)
        }
        FilterExpression::Bool(expression) => {
            let mut clauses = Map::new();
            for (name, items) in expression.clauses() {
                if !items.is_empty() {
                    clauses.insert(name.to_string(), Value::Array(items.iter().map(translate).collect()));
                }
            }
            json!({ "bool": clauses })
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        })
    }
}

/// A sort key.
#[derive(Debug, Clone, PartialEq)]
pub struct SortField {
    /// Field name.
    pub field: String,
    /// Direction.
    pub order: SortOrder,
}

/// Metric aggregations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationKind {
    /// Minimum value.
    Min,
    /// Maximum value.
    Max,
    /// Average value.
    Avg,
    /// Sum of values.
    Sum,
}

impl AggregationKind {
    fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "min" => Some(AggregationKind::Min),
            "max" => Some(AggregationKind::Max),
            "avg" => Some(AggregationKind::Avg),
            "sum" => Some(AggregationKind::Sum),
            _ => None,
        }
    }

    /// The aggregation type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationKind::Min => "min",
            AggregationKind::Max => "max",
            AggregationKind::Avg => "avg",
            AggregationKind::Sum => "sum",
        }
    }
}

/// A named metric aggregation over one field.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    /// Result name.
    pub name: String,
    /// Metric.
    pub kind: AggregationKind,
    /// Aggregated field.
    pub field: String,
}

/// A read request: filter plus paging, sort and aggregations.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    /// The filter.
    pub filter: FilterExpression,
    /// Page size.
    pub size: Option<u32>,
    /// Offset of the first hit.
    pub from: Option<u32>,
    /// Sort keys, in priority order.
    pub sort: Vec<SortField>,
    /// Metric aggregations.
    pub aggregations: Vec<Aggregation>,
}

impl SearchRequest {
    /// A request for every document matching `filter`.
    pub fn new(filter: FilterExpression) -> Self {
        Self {
            filter,
            size: None,
            from: None,
            sort: Vec::new(),
            aggregations: Vec::new(),
        }
    }

    /// Sets the page size.
    pub fn with_size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    /// Sets the offset.
    pub fn with_from(mut self, from: u32) -> Self {
        self.from = Some(from);
        self
    }

    /// Adds a sort key.
    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push(SortField {
            field: field.into(),
            order,
        });
        self
    }

    /// Adds a metric aggregation.
    pub fn aggregate(mut self, name: impl Into<String>, kind: AggregationKind, field: impl Into<String>) -> Self {
        self.aggregations.push(Aggregation {
            name: name.into(),
            kind,
            field: field.into(),
        });
        self
    }

    /// Parses a request from the JSON embedded in a read command.
    ///
    /// A JSON object with a `query` key carries the filter under it along
    /// with optional `size`, `from`, `sort` and `aggregations`. Any other
    /// object is taken as a bare filter expression.
    ///
    /// `sort` entries are either a field name or `{"field": .., "order": ..}`;
    /// `aggregations` entries are `{"name": .., "type": "min|max|avg|sum",
    /// "field": ..}`.
    pub fn from_json(value: &Value) -> Result<Self, QueryError> {
        let Some(query) = value.get("query") else {
            return Ok(Self::new(FilterExpression::from_json(value)?));
        };
        let mut request = Self::new(FilterExpression::from_json(query)?);

        request.size = optional_u32(value, "size")?;
        request.from = optional_u32(value, "from")?;

        if let Some(sort) = value.get("sort").and_then(Value::as_array) {
            for entry in sort {
                request.sort.push(parse_sort(entry)?);
            }
        }
        if let Some(aggregations) = value.get("aggregations").and_then(Value::as_array) {
            for entry in aggregations {
                request.aggregations.push(parse_aggregation(entry)?);
            }
        }
        Ok(request)
    }
}

fn optional_u32(value: &Value, key: &str) -> Result<Option<u32>, QueryError> {
    match value.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| QueryError::Malformed {
                message: format!("{} must be a non-negative integer, got {}", key, v),
            }),
    }
}

fn parse_sort(entry: &Value) -> Result<SortField, QueryError> {
    if let Some(field) = entry.as_str() {
        return Ok(SortField {
            field: field.to_string(),
            order: SortOrder::Asc,
        });
    }
    let field = entry
        .get("field")
        .and_then(Value::as_str)
        .ok_or_else(|| QueryError::Malformed {
            message: format!("sort entry needs a field: {}", entry),
        })?;
    let order = match entry.get("order").and_then(Value::as_str) {
        None => SortOrder::Asc,
        Some(order) if order.eq_ignore_ascii_case("asc") => SortOrder::Asc,
        Some(order) if order.eq_ignore_ascii_case("desc") => SortOrder::Desc,
        Some(other) => {
            return Err(QueryError::Malformed {
                message: format!("unknown sort order '{}'", other),
            });
        }
    };
    Ok(SortField {
        field: field.to_string(),
        order,
    })
}

fn parse_aggregation(entry: &Value) -> Result<Aggregation, QueryError> {
    let type_name = aggregation_text(entry, "type")?;
    let kind = AggregationKind::parse(type_name).ok_or_else(|| QueryError::Malformed {
        message: format!("unsupported aggregation '{}'", type_name),
    })?;
    Ok(Aggregation {
        name: aggregation_text(entry, "name")?.to_string(),
        kind,
        field: aggregation_text(entry, "field")?.to_string(),
    })
}

fn aggregation_text<'a>(entry: &'a Value, key: &str) -> Result<&'a str, QueryError> {
    entry
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| QueryError::Malformed {
            message: format!("aggregation needs a string '{}': {}", key, entry),
        })
}

/// Builds the body of a search request.
///
/// `size` and `from` sit beside `query`, never inside it.
pub fn build_search_body(request: &SearchRequest) -> Value {
    let mut body = json!({ "query": translate(&request.filter) });

    if let Some(size) = request.size {
        body["size"] = json!(size);
    }
    if let Some(from) = request.from {
        body["from"] = json!(from);
    }
    if !request.sort.is_empty() {
        let sort: Vec<Value> = request
            .sort
            .iter()
            .map(|key| {
                let mut entry = Map::new();
                entry.insert(key.field.clone(), json!({ "order": key.order.to_string() }));
                Value::Object(entry)
            })
            .collect();
        body["sort"] = Value::Array(sort);
    }
    if !request.aggregations.is_empty() {
        let mut aggs = Map::new();
        for aggregation in &request.aggregations {
            let mut metric = Map::new();
            metric.insert(
                aggregation.kind.as_str().to_string(),
                json!({ "field": aggregation.field }),
            );
            aggs.insert(aggregation.name.clone(), Value::Object(metric));
        }
        body["aggs"] = Value::Object(aggs);
    }

    body
}
