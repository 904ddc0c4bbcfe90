//! Type marshaller: rows to search documents and back.
//!
//! Column types are resolved once per field when the [`IndexSchema`] is
//! built; per-row conversion then only dispatches on the resolved
//! [`CellType`].
//!
//! Null and zero-length cells are written as the type's default value
//! (`0`, `false`, `[]`, `{}` or the string `"null"`). Reading such a document
//! back yields the default rather than the original null, so empty text does
//! not survive a round trip.

mod cell_type;
mod date_pattern;

pub use cell_type::{CellType, KEYWORD_IGNORE_ABOVE};
pub use date_pattern::{DEFAULT_TIMESTAMP_PATTERN, DatePattern};

use std::collections::BTreeMap;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tracing::warn;
use uuid::Uuid;

use crate::error::MarshalError;
use crate::types::{CellValue, PrimaryKey, Row};

/// Type and optional date format of one indexed field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    /// Resolved column type.
    pub cell_type: CellType,
    /// Field-specific timestamp pattern, overriding the schema default.
    pub format: Option<DatePattern>,
}

impl FieldSpec {
    /// A field without a specific format.
    pub fn new(cell_type: CellType) -> Self {
        Self {
            cell_type,
            format: None,
        }
    }
}

/// Serializable form of an [`IndexSchema`], with type names as strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDefinition {
    /// Partition key column names, in order.
    pub partition_keys: Vec<String>,
    /// Clustering key column names, in order.
    #[serde(default)]
    pub clustering_keys: Vec<String>,
    /// Column definitions, key columns included.
    pub fields: BTreeMap<String, FieldDefinition>,
    /// Default timestamp pattern.
    #[serde(default)]
    pub timestamp_pattern: Option<String>,
}

/// Serializable form of a [`FieldSpec`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Type name, e.g. `text` or `list<int>`.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Optional Java-style date pattern.
    #[serde(default)]
    pub format: Option<String>,
}

/// The indexed columns of a table and its primary key layout.
#[derive(Debug, Clone, Default)]
pub struct IndexSchema {
    fields: BTreeMap<String, FieldSpec>,
    partition_keys: Vec<String>,
    clustering_keys: Vec<String>,
    timestamp_pattern: DatePattern,
}

impl IndexSchema {
    /// Creates an empty schema using the default timestamp pattern.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a partition key column.
    pub fn partition_key(mut self, name: impl Into<String>, cell_type: CellType) -> Self {
        let name = name.into();
        self.fields.insert(name.clone(), FieldSpec::new(cell_type));
        self.partition_keys.push(name);
        self
    }

    /// Adds a clustering key column.
    pub fn clustering_key(mut self, name: impl Into<String>, cell_type: CellType) -> Self {
        let name = name.into();
        self.fields.insert(name.clone(), FieldSpec::new(cell_type));
        self.clustering_keys.push(name);
        self
    }

    /// Adds a regular column.
    pub fn field(mut self, name: impl Into<String>, cell_type: CellType) -> Self {
        self.fields.insert(name.into(), FieldSpec::new(cell_type));
        self
    }

    /// Adds a column with its own date pattern.
    pub fn field_with_format(
        mut self,
        name: impl Into<String>,
        cell_type: CellType,
        pattern: &str,
    ) -> Result<Self, MarshalError> {
        let spec = FieldSpec {
            cell_type,
            format: Some(DatePattern::compile(pattern)?),
        };
        self.fields.insert(name.into(), spec);
        Ok(self)
    }

    /// Replaces the default timestamp pattern.
    pub fn with_timestamp_pattern(mut self, pattern: &str) -> Result<Self, MarshalError> {
        self.timestamp_pattern = DatePattern::compile(pattern)?;
        Ok(self)
    }

    /// Builds a schema from its serializable definition.
    pub fn from_definition(definition: &SchemaDefinition) -> Result<Self, MarshalError> {
        let mut schema = Self::new();
        if let Some(pattern) = &definition.timestamp_pattern {
            schema = schema.with_timestamp_pattern(pattern)?;
        }
        for (name, field) in &definition.fields {
            let format = field
                .format
                .as_deref()
                .map(DatePattern::compile)
                .transpose()?;
            schema.fields.insert(
                name.clone(),
                FieldSpec {
                    cell_type: CellType::parse(&field.type_name),
                    format,
                },
            );
        }
        schema.partition_keys = definition.partition_keys.clone();
        schema.clustering_keys = definition.clustering_keys.clone();
        schema.validate()?;
        Ok(schema)
    }

    /// Checks that the key layout is declared and every key column is typed.
    pub fn validate(&self) -> Result<(), MarshalError> {
        if self.partition_keys.is_empty() {
            return Err(MarshalError::InvalidSchema {
                message: "at least one partition key is required".to_string(),
            });
        }
        for name in self.key_field_names() {
            if !self.fields.contains_key(name) {
                return Err(MarshalError::InvalidSchema {
                    message: format!("key column {} has no type", name),
                });
            }
        }
        Ok(())
    }

    /// All indexed fields.
    pub fn fields(&self) -> &BTreeMap<String, FieldSpec> {
        &self.fields
    }

    /// A single field.
    pub fn field_spec(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    /// Partition key column names, in order.
    pub fn partition_keys(&self) -> &[String] {
        &self.partition_keys
    }

    /// Clustering key column names, in order.
    pub fn clustering_keys(&self) -> &[String] {
        &self.clustering_keys
    }

    /// Partition then clustering key names.
    pub fn key_field_names(&self) -> impl Iterator<Item = &String> {
        self.partition_keys.iter().chain(self.clustering_keys.iter())
    }

    /// Default timestamp pattern.
    pub fn timestamp_pattern(&self) -> &DatePattern {
        &self.timestamp_pattern
    }

    /// The pattern used for a given field.
    pub fn pattern_for<'a>(&'a self, spec: &'a FieldSpec) -> &'a DatePattern {
        spec.format.as_ref().unwrap_or(&self.timestamp_pattern)
    }
}

/// Converts a row into the source of its search document.
///
/// Key columns come from the row's key; every other schema column present
/// in the row is converted according to its type. A cell that cannot be
/// converted is replaced by its type default and logged. Cells missing from
/// the schema are ignored.
pub fn row_to_document(row: &Row, schema: &IndexSchema) -> Result<Map<String, Value>, MarshalError> {
    let mut document = Map::new();

    write_key_fields(&mut document, schema.partition_keys(), &row.key.partition, schema)?;
    write_key_fields(&mut document, schema.clustering_keys(), &row.key.clustering, schema)?;

    for (name, cell) in &row.cells {
        if document.contains_key(name) {
            continue;
        }
        let Some(spec) = schema.field_spec(name) else {
            continue;
        };
        let value = match marshal_cell(name, spec, cell, schema) {
            Ok(value) => value,
            Err(e) => {
                warn!(field = %name, error = %e, "Coercing unconvertible cell to its default");
                spec.cell_type.default_value()
            }
        };
        document.insert(name.clone(), value);
    }

    Ok(document)
}

/// The document id of a primary key.
pub fn key_to_document_id(key: &PrimaryKey) -> String {
    key.document_id()
}

/// Converts document source fields back into a partial row.
///
/// Every key column must be present. Other fields that fail to convert are
/// logged and left out of the row.
pub fn document_to_row(fields: &Map<String, Value>, schema: &IndexSchema) -> Result<Row, MarshalError> {
    let mut key_values = Vec::with_capacity(schema.partition_keys().len() + schema.clustering_keys().len());
    for name in schema.key_field_names() {
        let value = fields
            .get(name)
            .ok_or_else(|| MarshalError::MissingKeyField { field: name.clone() })?;
        key_values.push(value.clone());
    }
    let mut row = Row::new(decode_key(&key_values, schema)?);

    for (name, value) in fields {
        if schema.key_field_names().any(|key| key == name) {
            continue;
        }
        let Some(spec) = schema.field_spec(name) else {
            continue;
        };
        match unmarshal_value(name, spec, value, schema) {
            Ok(cell) => row.set_cell(name.clone(), cell),
            Err(e) => warn!(field = %name, error = %e, "Dropping unreadable document field"),
        }
    }

    Ok(row)
}

/// Decodes the key array of a document, partition components first.
pub fn decode_key(values: &[Value], schema: &IndexSchema) -> Result<PrimaryKey, MarshalError> {
    let partition_count = schema.partition_keys().len();
    let expected = partition_count + schema.clustering_keys().len();
    if values.len() != expected {
        return Err(MarshalError::InvalidSchema {
            message: format!("expected {} key components, got {}", expected, values.len()),
        });
    }

    let mut components = Vec::with_capacity(expected);
    for (name, value) in schema.key_field_names().zip(values) {
        let spec = schema
            .field_spec(name)
            .ok_or_else(|| MarshalError::MissingKeyField { field: name.clone() })?;
        components.push(unmarshal_value(name, spec, value, schema)?);
    }

    let clustering = components.split_off(partition_count);
    Ok(PrimaryKey::new(components).with_clustering(clustering))
}

fn write_key_fields(
    document: &mut Map<String, Value>,
    names: &[String],
    components: &[CellValue],
    schema: &IndexSchema,
) -> Result<(), MarshalError> {
    if components.len() > names.len() {
        return Err(MarshalError::InvalidSchema {
            message: format!(
                "row key has {} components but the schema declares {}",
                components.len(),
                names.len()
            ),
        });
    }
    for (i, name) in names.iter().enumerate() {
        let component = components
            .get(i)
            .ok_or_else(|| MarshalError::MissingKeyField { field: name.clone() })?;
        let spec = schema
            .field_spec(name)
            .ok_or_else(|| MarshalError::MissingKeyField { field: name.clone() })?;
        document.insert(name.clone(), marshal_cell(name, spec, component, schema)?);
    }
    Ok(())
}

fn invalid(field: &str, cell_type: &CellType, message: impl Into<String>) -> MarshalError {
    MarshalError::InvalidValue {
        field: field.to_string(),
        type_name: cell_type.to_string(),
        message: message.into(),
    }
}

fn float_value(field: &str, cell_type: &CellType, f: f64) -> Result<Value, MarshalError> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| invalid(field, cell_type, format!("{} is not a finite number", f)))
}

fn marshal_cell(
    field: &str,
    spec: &FieldSpec,
    cell: &CellValue,
    schema: &IndexSchema,
) -> Result<Value, MarshalError> {
    marshal_typed(field, &spec.cell_type, schema.pattern_for(spec), cell)
}

fn marshal_typed(
    field: &str,
    cell_type: &CellType,
    pattern: &DatePattern,
    cell: &CellValue,
) -> Result<Value, MarshalError> {
    if cell.is_null_or_empty() {
        return Ok(cell_type.default_value());
    }
    let mismatch = || invalid(field, cell_type, format!("unexpected cell {:?}", cell));

    match cell_type {
        CellType::Varint => match cell {
            CellValue::Int(n) => Ok(Value::String(n.to_string())),
            CellValue::Text(s) if s.parse::<i128>().is_ok() => Ok(Value::String(s.clone())),
            _ => Err(mismatch()),
        },
        t if t.is_integral() => match cell {
            CellValue::Int(n) => Ok(Value::from(*n)),
            _ => Err(mismatch()),
        },
        t if t.is_floating() => match cell {
            CellValue::Float(f) => float_value(field, t, *f),
            CellValue::Int(n) => float_value(field, t, *n as f64),
            _ => Err(mismatch()),
        },
        CellType::Decimal => match cell {
            CellValue::Decimal(d) => Ok(Value::String(d.to_string())),
            CellValue::Int(n) => Ok(Value::String(n.to_string())),
            _ => Err(mismatch()),
        },
        CellType::Boolean => match cell {
            CellValue::Boolean(b) => Ok(Value::Bool(*b)),
            _ => Err(mismatch()),
        },
        CellType::Timestamp => match cell {
            CellValue::Timestamp(ts) => Ok(Value::String(pattern.format(ts))),
            _ => Err(mismatch()),
        },
        CellType::Date => match cell {
            CellValue::Timestamp(ts) => Ok(Value::String(ts.format("%Y-%m-%d").to_string())),
            _ => Err(mismatch()),
        },
        CellType::Uuid | CellType::TimeUuid => match cell {
            CellValue::Uuid(u) => Ok(Value::String(u.to_string())),
            CellValue::Text(s) => Uuid::parse_str(s)
                .map(|u| Value::String(u.to_string()))
                .map_err(|e| invalid(field, cell_type, e.to_string())),
            _ => Err(mismatch()),
        },
        CellType::Blob => match cell {
            CellValue::Bytes(bytes) => Ok(Value::String(BASE64.encode(bytes))),
            _ => Err(mismatch()),
        },
        CellType::List(inner) | CellType::Set(inner) => match cell {
            CellValue::List(items) | CellValue::Set(items) => items
                .iter()
                .map(|item| marshal_typed(field, inner, pattern, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            _ => Err(mismatch()),
        },
        CellType::Map(_, value_type) => match cell {
            CellValue::Map(entries) => {
                let mut object = Map::new();
                for (key, value) in entries {
                    object.insert(
                        key.to_key_string(),
                        marshal_typed(field, value_type, pattern, value)?,
                    );
                }
                Ok(Value::Object(object))
            }
            _ => Err(mismatch()),
        },
        CellType::Other(_) => Ok(cell_to_json(cell, pattern)),
        // text, varchar, ascii, inet, time, duration
        _ => match cell {
            CellValue::Text(s) => Ok(Value::String(s.clone())),
            other => Ok(Value::String(other.to_key_string())),
        },
    }
}

/// Generic conversion for cells whose type is not known statically.
fn cell_to_json(cell: &CellValue, pattern: &DatePattern) -> Value {
    match cell {
        CellValue::Null => Value::String("null".to_string()),
        CellValue::Int(n) => Value::from(*n),
        CellValue::Float(f) => Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(f.to_string())),
        CellValue::Boolean(b) => Value::Bool(*b),
        CellValue::Timestamp(ts) => Value::String(pattern.format(ts)),
        CellValue::List(items) | CellValue::Set(items) => {
            Value::Array(items.iter().map(|item| cell_to_json(item, pattern)).collect())
        }
        CellValue::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.to_key_string(), cell_to_json(v, pattern)))
                .collect(),
        ),
        other => Value::String(other.to_key_string()),
    }
}

fn unmarshal_value(
    field: &str,
    spec: &FieldSpec,
    value: &Value,
    schema: &IndexSchema,
) -> Result<CellValue, MarshalError> {
    unmarshal_typed(field, &spec.cell_type, schema.pattern_for(spec), value)
}

fn unmarshal_typed(
    field: &str,
    cell_type: &CellType,
    pattern: &DatePattern,
    value: &Value,
) -> Result<CellValue, MarshalError> {
    if value.is_null() {
        return Ok(CellValue::Null);
    }
    let mismatch = || invalid(field, cell_type, format!("unexpected value {}", value));

    match cell_type {
        t if t.is_integral() => match value {
            Value::Number(n) => n.as_i64().map(CellValue::Int).ok_or_else(mismatch),
            Value::String(s) => s.parse().map(CellValue::Int).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        t if t.is_floating() => match value {
            Value::Number(n) => n.as_f64().map(CellValue::Float).ok_or_else(mismatch),
            Value::String(s) => s.parse().map(CellValue::Float).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        CellType::Decimal => match value {
            Value::String(s) => Decimal::from_str(s).map(CellValue::Decimal).map_err(|_| mismatch()),
            Value::Number(n) => Decimal::from_str(&n.to_string())
                .map(CellValue::Decimal)
                .map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        CellType::Boolean => match value {
            Value::Bool(b) => Ok(CellValue::Boolean(*b)),
            Value::String(s) => s.parse().map(CellValue::Boolean).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        CellType::Timestamp => match value {
            Value::String(s) => pattern.parse(s).map(CellValue::Timestamp).ok_or_else(mismatch),
            Value::Number(n) => n
                .as_i64()
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .map(CellValue::Timestamp)
                .ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
        CellType::Date => match value {
            Value::String(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| CellValue::Timestamp(naive.and_utc()))
                .ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
        CellType::Uuid | CellType::TimeUuid => match value {
            Value::String(s) => Uuid::parse_str(s).map(CellValue::Uuid).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        CellType::Blob => match value {
            Value::String(s) => BASE64.decode(s).map(CellValue::Bytes).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        CellType::List(inner) | CellType::Set(inner) => match value {
            Value::Array(items) => {
                let cells = items
                    .iter()
                    .map(|item| unmarshal_typed(field, inner, pattern, item))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(if matches!(cell_type, CellType::Set(_)) {
                    CellValue::Set(cells)
                } else {
                    CellValue::List(cells)
                })
            }
            _ => Err(mismatch()),
        },
        CellType::Map(key_type, value_type) => match value {
            Value::Object(object) => object
                .iter()
                .map(|(k, v)| -> Result<(CellValue, CellValue), MarshalError> {
                    let key = unmarshal_typed(field, key_type, pattern, &Value::String(k.clone()))?;
                    Ok((key, unmarshal_typed(field, value_type, pattern, v)?))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(CellValue::Map),
            _ => Err(mismatch()),
        },
        CellType::Other(_) => Ok(json_to_cell(value)),
        _ => match value {
            Value::String(s) => Ok(CellValue::Text(s.clone())),
            other => Ok(CellValue::Text(other.to_string())),
        },
    }
}

fn json_to_cell(value: &Value) -> CellValue {
    match value {
        Value::Null => CellValue::Null,
        Value::Bool(b) => CellValue::Boolean(*b),
        Value::Number(n) => n
            .as_i64()
            .map(CellValue::Int)
            .unwrap_or_else(|| CellValue::Float(n.as_f64().unwrap_or_default())),
        Value::String(s) => CellValue::Text(s.clone()),
        Value::Array(items) => CellValue::List(items.iter().map(json_to_cell).collect()),
        Value::Object(object) => CellValue::Map(
            object
                .iter()
                .map(|(k, v)| (CellValue::Text(k.clone()), json_to_cell(v)))
                .collect(),
        ),
    }
}
