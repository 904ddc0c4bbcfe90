//! Helios Index Bridge
//!
//! Mirrors rows of a wide-column primary storage engine into a search
//! backend speaking the Elasticsearch/OpenSearch REST protocol, and answers
//! secondary-index reads by running the search there and re-reading the
//! matching rows from the primary engine.
//!
//! # Architecture
//!
//! - [`marshal`] - typed cells to JSON documents and back, field mappings
//! - [`client`] - REST protocol client over a pooled HTTP transport
//! - [`lifecycle`] - index creation and teardown, rollover families
//! - [`indexer`] - write path: upserts and deletes through bulk requests
//! - [`search`] - filter translation and result reconstruction
//! - [`hook`] - the entry points called by the primary engine
//! - [`types`], [`config`], [`error`] - shared model, settings and errors
//!
//! The search backend is never the source of truth. A hit only identifies a
//! row; the row itself always comes from the primary engine, and hits whose
//! row has disappeared are dropped.
//!
//! # Quick Start
//!
//! ```
//! use helios_index_bridge::marshal::{self, CellType, IndexSchema};
//! use helios_index_bridge::search::{FilterExpression, SearchRequest, build_search_body};
//! use helios_index_bridge::types::{CellValue, PrimaryKey, Row};
//! use serde_json::json;
//!
//! let schema = IndexSchema::new()
//!     .partition_key("author", CellType::Text)
//!     .clustering_key("year", CellType::Int)
//!     .field("title", CellType::Text);
//!
//! let key = PrimaryKey::new(vec![CellValue::Text("tolkien".into())])
//!     .with_clustering(vec![CellValue::Int(1954)]);
//! let row = Row::new(key).with_cell("title", CellValue::Text("The Two Towers".into()));
//!
//! let document = marshal::row_to_document(&row, &schema).unwrap();
//! assert_eq!(document["year"], json!(1954));
//!
//! let filter = FilterExpression::from_json(&json!({
//!     "field": "title", "operator": "match", "value": "towers"
//! }))
//! .unwrap();
//! let body = build_search_body(&SearchRequest::new(filter).with_size(10));
//! assert_eq!(body["query"]["match"]["title"], json!("towers"));
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod client;
pub mod config;
pub mod error;
pub mod hook;
pub mod indexer;
pub mod lifecycle;
pub mod marshal;
pub mod search;
pub mod types;

// Re-export commonly used types at crate root
pub use client::{SearchClient, SearchTransport};
pub use config::{IndexOptions, SearchAuth, SearchClientConfig};
pub use error::{BridgeError, BridgeResult};
pub use hook::SearchIndexHook;
pub use indexer::{WriteIndexer, WriteMode};
pub use lifecycle::IndexLifecycleManager;
pub use marshal::IndexSchema;
pub use search::{PrimaryRowSource, ResultReconstructor};
pub use types::{CellValue, IndexDescriptor, PrimaryKey, Row};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
