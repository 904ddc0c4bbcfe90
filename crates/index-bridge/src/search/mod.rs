//! Read path: filter translation and row reconstruction.

pub mod query_builder;
pub mod reconstruct;

pub use query_builder::{
    Aggregation, AggregationKind, BoolExpression, FilterExpression, Predicate, SearchRequest,
    SortField, SortOrder, build_search_body, translate,
};
pub use reconstruct::{
    ExecuteOptions, PrimaryRowSource, ReconstructedRows, ReconstructionStats, ResultReconstructor,
    SearchResultRow,
};
