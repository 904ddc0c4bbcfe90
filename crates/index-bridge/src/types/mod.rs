//! Core data model shared by the write and read paths.
//!
//! - [`CellValue`], [`Row`] - a primary-engine row and its typed cells
//! - [`PrimaryKey`] - partition and clustering key components
//! - [`IndexDescriptor`] - the destination index family of a table
//!
//! # Example
//!
//! ```
//! use helios_index_bridge::types::{CellValue, PrimaryKey, Row};
//!
//! let key = PrimaryKey::new(vec![CellValue::Text("tolkien".into())])
//!     .with_clustering(vec![CellValue::Int(1954)]);
//! let row = Row::new(key).with_cell("title", CellValue::Text("The Two Towers".into()));
//!
//! assert_eq!(row.key.document_id(), "[tolkien,1954]");
//! assert_eq!(row.cell("title"), Some(&CellValue::Text("The Two Towers".into())));
//! ```

mod descriptor;
mod key;
mod row;

pub use descriptor::IndexDescriptor;
pub use key::PrimaryKey;
pub use row::{CellValue, Row};
