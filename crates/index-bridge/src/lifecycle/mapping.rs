//! Index settings and mappings generated from an index schema.

use serde_json::{Map, Value, json};

use crate::config::IndexOptions;
use crate::marshal::IndexSchema;

/// Creates the `mappings` object for a schema.
///
/// Text columns get a `keyword` sub-field capped by `ignore_above`, so they
/// can be both searched and used for exact matches, sorting and
/// aggregations.
pub fn build_mappings(schema: &IndexSchema) -> Value {
    let mut properties = Map::new();
    for (name, spec) in schema.fields() {
        let pattern = schema.pattern_for(spec);
        properties.insert(name.clone(), spec.cell_type.mapping(pattern.as_str()));
    }
    json!({ "properties": properties })
}

/// Creates the `settings` object of an index.
///
/// Replicas are one less than shards, so every node holds a copy of every
/// shard.
pub fn build_settings(options: &IndexOptions, shards: u32) -> Value {
    let shards = shards.max(1);
    json!({
        "number_of_shards": shards,
        "number_of_replicas": shards - 1,
        "refresh_interval": options.refresh_interval,
        "index.max_result_window": options.max_result_window
    })
}

/// Creates the full body of an index creation request.
pub fn build_index_body(schema: &IndexSchema, options: &IndexOptions, shards: u32) -> Value {
    json!({
        "settings": build_settings(options, shards),
        "mappings": build_mappings(schema)
    })
}
