use serde_json::Value;

use super::CellValue;

/// A primary key: ordered partition components and ordered clustering components.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrimaryKey {
    /// Partition key components, in declaration order.
    pub partition: Vec<CellValue>,
    /// Clustering key components, in declaration order.
    pub clustering: Vec<CellValue>,
}

impl PrimaryKey {
    /// Creates a key with only partition components.
    pub fn new(partition: Vec<CellValue>) -> Self {
        Self {
            partition,
            clustering: Vec::new(),
        }
    }

    /// Adds clustering components.
    pub fn with_clustering(mut self, clustering: Vec<CellValue>) -> Self {
        self.clustering = clustering;
        self
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.partition.len() + self.clustering.len()
    }

    /// True when the key has no component.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The flat string array of all components, partition first.
    pub fn to_string_array(&self) -> Vec<String> {
        self.partition
            .iter()
            .chain(self.clustering.iter())
            .map(CellValue::to_key_string)
            .collect()
    }

    /// The search document id for this key.
    ///
    /// A single-component key serializes as that component, a compound key as
    /// a bracketed array. Quote characters are stripped in both cases so the
    /// id is stable whatever the component types are.
    pub fn document_id(&self) -> String {
        let parts = self.to_string_array();
        let serialized = if parts.len() == 1 {
            Value::String(parts[0].clone()).to_string()
        } else {
            Value::Array(parts.into_iter().map(Value::String).collect()).to_string()
        };
        serialized.replace('"', "")
    }
}
