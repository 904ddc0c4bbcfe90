use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::PrimaryKey;

/// A typed cell of a primary-engine row.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    /// Absent value or cell tombstone.
    Null,
    /// Any integral type (tinyint through bigint, counters).
    Int(i64),
    /// Float and double.
    Float(f64),
    /// Arbitrary precision decimal.
    Decimal(Decimal),
    /// Boolean.
    Boolean(bool),
    /// Timestamp in UTC.
    Timestamp(DateTime<Utc>),
    /// Text, varchar, ascii and other string-like values.
    Text(String),
    /// Blob.
    Bytes(Vec<u8>),
    /// Uuid and timeuuid.
    Uuid(Uuid),
    /// Ordered list.
    List(Vec<CellValue>),
    /// Set, kept in engine order.
    Set(Vec<CellValue>),
    /// Map as ordered entries.
    Map(Vec<(CellValue, CellValue)>),
}

impl CellValue {
    /// True for null cells and zero-length values.
    pub fn is_null_or_empty(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::Text(s) => s.is_empty(),
            CellValue::Bytes(b) => b.is_empty(),
            _ => false,
        }
    }

    /// String form used for key components and document ids.
    pub fn to_key_string(&self) -> String {
        match self {
            CellValue::Null => "null".to_string(),
            CellValue::Int(n) => n.to_string(),
            CellValue::Float(f) => f.to_string(),
            CellValue::Decimal(d) => d.to_string(),
            CellValue::Boolean(b) => b.to_string(),
            CellValue::Timestamp(ts) => ts.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            CellValue::Text(s) => s.clone(),
            CellValue::Bytes(b) => {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD.encode(b)
            }
            CellValue::Uuid(u) => u.to_string(),
            CellValue::List(items) | CellValue::Set(items) => format!(
                "[{}]",
                items
                    .iter()
                    .map(CellValue::to_key_string)
                    .collect::<Vec<_>>()
                    .join(",")
            ),
            CellValue::Map(entries) => format!(
                "{{{}}}",
                entries
                    .iter()
                    .map(|(k, v)| format!("{}:{}", k.to_key_string(), v.to_key_string()))
                    .collect::<Vec<_>>()
                    .join(",")
            ),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Int(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Boolean(value)
    }
}

/// A primary-engine row: its key, its cells and whether it is a row tombstone.
///
/// Rows produced by [`document_to_row`](crate::marshal::document_to_row) are
/// partial: they only carry the cells present in the search document.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Primary key.
    pub key: PrimaryKey,
    /// Cells by column name.
    pub cells: BTreeMap<String, CellValue>,
    /// True when the mutation deletes the whole row.
    pub deleted: bool,
}

impl Row {
    /// Creates an empty live row.
    pub fn new(key: PrimaryKey) -> Self {
        Self {
            key,
            cells: BTreeMap::new(),
            deleted: false,
        }
    }

    /// Creates a row tombstone.
    pub fn tombstone(key: PrimaryKey) -> Self {
        Self {
            key,
            cells: BTreeMap::new(),
            deleted: true,
        }
    }

    /// Adds a cell.
    pub fn with_cell(mut self, name: impl Into<String>, value: CellValue) -> Self {
        self.cells.insert(name.into(), value);
        self
    }

    /// Returns a cell by column name.
    pub fn cell(&self, name: &str) -> Option<&CellValue> {
        self.cells.get(name)
    }

    /// Sets a cell, replacing any previous value.
    pub fn set_cell(&mut self, name: impl Into<String>, value: CellValue) {
        self.cells.insert(name.into(), value);
    }
}
