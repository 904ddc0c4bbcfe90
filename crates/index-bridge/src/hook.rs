//! Entry points called by the primary storage engine.
//!
//! A [`SearchIndexHook`] is created per indexed table. It registers the
//! backing index, forwards row mutations to the [`WriteIndexer`] and turns
//! filter expressions into reconstructed rows.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::client::SearchClient;
use crate::error::BridgeResult;
use crate::indexer::{WriteIndexer, WriteMode};
use crate::lifecycle::IndexLifecycleManager;
use crate::marshal::{DEFAULT_TIMESTAMP_PATTERN, IndexSchema};
use crate::search::{
    ExecuteOptions, PrimaryRowSource, ReconstructedRows, ResultReconstructor, SearchRequest,
};
use crate::types::{IndexDescriptor, PrimaryKey, Row};

/// Secondary index of one table.
#[derive(Debug)]
pub struct SearchIndexHook {
    lifecycle: Arc<IndexLifecycleManager>,
    indexer: WriteIndexer,
    reconstructor: ResultReconstructor,
}

impl SearchIndexHook {
    /// Wires the components of one index.
    ///
    /// The timestamp pattern of the index options applies when the schema
    /// keeps the default one.
    pub fn new(
        lifecycle: Arc<IndexLifecycleManager>,
        descriptor: IndexDescriptor,
        schema: IndexSchema,
        rows: Arc<dyn PrimaryRowSource>,
    ) -> BridgeResult<Self> {
        let schema = if schema.timestamp_pattern().as_str() == DEFAULT_TIMESTAMP_PATTERN
            && descriptor.options.timestamp_pattern != DEFAULT_TIMESTAMP_PATTERN
        {
            schema.with_timestamp_pattern(&descriptor.options.timestamp_pattern)?
        } else {
            schema
        };

        let client = lifecycle.client().clone();
        let synthetic_column = descriptor.options.synthetic_column.clone();
        let indexer = WriteIndexer::new(client.clone(), descriptor, schema);
        let reconstructor = ResultReconstructor::new(
            client,
            Arc::new(indexer.schema().clone()),
            rows,
            synthetic_column,
        );

        Ok(Self {
            lifecycle,
            indexer,
            reconstructor,
        })
    }

    /// The client shared by the components.
    pub fn client(&self) -> &SearchClient {
        self.lifecycle.client()
    }

    /// The write side, for bulk loads and pending-write tracking.
    pub fn indexer(&self) -> &WriteIndexer {
        &self.indexer
    }

    /// Creates the backing index if needed.
    pub async fn register(&self) -> BridgeResult<()> {
        self.lifecycle
            .ensure_index(self.indexer.descriptor(), self.indexer.schema())
            .await
    }

    /// Removes the backing index.
    pub async fn unregister(&self) -> BridgeResult<()> {
        self.lifecycle.drop_index(self.indexer.descriptor()).await
    }

    /// Called after a row was written. `is_async` wins over the index option.
    ///
    /// The backing index is created on first use if [`register`] was never
    /// called.
    ///
    /// [`register`]: SearchIndexHook::register
    pub async fn on_row_write(&self, row: &Row, is_async: bool) -> BridgeResult<()> {
        self.register().await?;
        let is_async = is_async || self.indexer.descriptor().options.async_write;
        self.indexer
            .index_row(row, WriteMode::from_async_flag(is_async))
            .await
    }

    /// Called after a partition or row was deleted.
    pub async fn on_row_delete(&self, key: &PrimaryKey) -> BridgeResult<()> {
        self.register().await?;
        let mode = WriteMode::from_async_flag(self.indexer.descriptor().options.async_write);
        self.indexer.delete_row(key, mode).await
    }

    /// Runs a filter expression and returns the matching rows.
    ///
    /// The whole result is scrolled through unless the request asks for an
    /// offset, in which case a single page is returned.
    pub async fn build_searcher(&self, filter_expression: &Value) -> BridgeResult<ReconstructedRows> {
        let request = SearchRequest::from_json(filter_expression)?;
        let options = ExecuteOptions {
            refresh: false,
            scroll: request.from.is_none(),
        };
        self.search(&request, options).await
    }

    /// Runs a parsed request with explicit options.
    pub async fn search(
        &self,
        request: &SearchRequest,
        options: ExecuteOptions,
    ) -> BridgeResult<ReconstructedRows> {
        let index = self.indexer.descriptor().name();
        debug!(index = %index, refresh = options.refresh, scroll = options.scroll, "Building searcher");
        self.reconstructor.execute(&index, request, options).await
    }
}
