//! Result reconstructor: search hits back to primary-engine rows.
//!
//! Hits only identify rows. Each hit's primary key is decoded from its
//! source, the current row is read from the primary engine, and the hit's
//! source (or the aggregation results) is attached to a synthetic column.
//! A hit whose row no longer exists is stale: it is dropped and counted.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::client::{SearchClient, SearchHit, SearchResponse};
use crate::error::{BridgeResult, MarshalError};
use crate::marshal::{self, IndexSchema};
use crate::types::{CellValue, PrimaryKey, Row};

use super::query_builder::{SearchRequest, build_search_body};

/// Read access to the primary engine.
#[async_trait]
pub trait PrimaryRowSource: Send + Sync {
    /// Reads the current row of a key, or `None` if it does not exist.
    async fn fetch_row(&self, key: &PrimaryKey) -> BridgeResult<Option<Row>>;
}

/// A hit with its primary key decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResultRow {
    /// Concrete index of the hit.
    pub index: String,
    /// Document id.
    pub id: String,
    /// Key components as strings, partition first.
    pub raw_key: Vec<String>,
    /// Decoded partition key.
    pub partition_key: Vec<CellValue>,
    /// Decoded clustering key.
    pub clustering_key: Vec<CellValue>,
    /// Document source.
    pub source: Map<String, Value>,
}

impl SearchResultRow {
    /// Decodes the key of a hit from the key columns of its source.
    pub fn from_hit(hit: SearchHit, schema: &IndexSchema) -> Result<Self, MarshalError> {
        let mut values = Vec::new();
        for name in schema.key_field_names() {
            let value = hit
                .source
                .get(name)
                .ok_or_else(|| MarshalError::MissingKeyField { field: name.clone() })?;
            values.push(value.clone());
        }
        let raw_key = values
            .iter()
            .map(|value| match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        let key = marshal::decode_key(&values, schema)?;

        Ok(Self {
            index: hit.index,
            id: hit.id,
            raw_key,
            partition_key: key.partition,
            clustering_key: key.clustering,
            source: hit.source,
        })
    }

    /// The primary key of the hit.
    pub fn primary_key(&self) -> PrimaryKey {
        PrimaryKey::new(self.partition_key.clone()).with_clustering(self.clustering_key.clone())
    }
}

/// How a read is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecuteOptions {
    /// Refresh the index first so recent writes are visible.
    pub refresh: bool,
    /// Page through all hits with a scroll instead of a single page.
    pub scroll: bool,
}

/// Counters of one read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconstructionStats {
    /// Result pages fetched.
    pub pages: u64,
    /// Hits received.
    pub hits_seen: u64,
    /// Rows emitted.
    pub rows_emitted: u64,
    /// Hits dropped because their row no longer exists.
    pub stale_hits_dropped: u64,
}

/// Runs reads against one secondary index.
#[derive(Clone)]
pub struct ResultReconstructor {
    client: SearchClient,
    schema: Arc<IndexSchema>,
    rows: Arc<dyn PrimaryRowSource>,
    synthetic_column: String,
}

impl std::fmt::Debug for ResultReconstructor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultReconstructor")
            .field("synthetic_column", &self.synthetic_column)
            .finish_non_exhaustive()
    }
}

impl ResultReconstructor {
    /// Creates a reconstructor.
    pub fn new(
        client: SearchClient,
        schema: Arc<IndexSchema>,
        rows: Arc<dyn PrimaryRowSource>,
        synthetic_column: impl Into<String>,
    ) -> Self {
        Self {
            client,
            schema,
            rows,
            synthetic_column: synthetic_column.into(),
        }
    }

    /// Runs a search and returns the lazy row sequence.
    pub async fn execute(
        &self,
        index: &str,
        request: &SearchRequest,
        options: ExecuteOptions,
    ) -> BridgeResult<ReconstructedRows> {
        if options.refresh {
            self.client.refresh_index(index).await?;
        }

        let body = build_search_body(request);
        let keep_alive = options
            .scroll
            .then(|| self.client.config().scroll_keep_alive.clone());
        let first = self.client.search(index, &body, keep_alive.as_deref()).await?;
        debug!(
            index = %index,
            total = first.total,
            hits = first.hits.len(),
            scroll = options.scroll,
            "Search executed"
        );

        let mut rows = ReconstructedRows {
            reconstructor: self.clone(),
            pending: VecDeque::new(),
            scroll_id: None,
            aggregations: None,
            stats: ReconstructionStats::default(),
        };
        rows.accept_page(first, options.scroll).await;
        Ok(rows)
    }
}

/// Rows reconstructed from search hits, in backend order.
///
/// Pages are fetched on demand. The sequence is finite and cannot be
/// restarted. Dropping it before the end leaves the scroll context to
/// expire on the backend; [`close`](Self::close) releases it immediately.
pub struct ReconstructedRows {
    reconstructor: ResultReconstructor,
    pending: VecDeque<SearchHit>,
    scroll_id: Option<String>,
    aggregations: Option<Value>,
    stats: ReconstructionStats,
}

impl std::fmt::Debug for ReconstructedRows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconstructedRows")
            .field("pending", &self.pending.len())
            .field("scroll_id", &self.scroll_id)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl ReconstructedRows {
    /// Returns the next row, or `None` once every hit has been consumed.
    pub async fn next(&mut self) -> Option<BridgeResult<Row>> {
        loop {
            if let Some(hit) = self.pending.pop_front() {
                match self.reconstruct(hit).await {
                    Ok(Some(row)) => {
                        self.stats.rows_emitted += 1;
                        return Some(Ok(row));
                    }
                    Ok(None) => continue,
                    Err(e) => return Some(Err(e)),
                }
            }

            let scroll_id = self.scroll_id.clone()?;
            match self.reconstructor.client.scroll(&scroll_id).await {
                Ok(page) => self.accept_page(page, true).await,
                Err(e) => {
                    self.scroll_id = None;
                    return Some(Err(e.into()));
                }
            }
        }
    }

    /// Drains the remaining rows.
    pub async fn try_collect(mut self) -> BridgeResult<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await {
            rows.push(row?);
        }
        Ok(rows)
    }

    /// Releases the scroll context, if one is still open.
    pub async fn close(mut self) {
        self.pending.clear();
        if let Some(scroll_id) = self.scroll_id.take() {
            self.clear_scroll(&scroll_id).await;
        }
    }

    /// Aggregation results of the search, if it requested any.
    pub fn aggregations(&self) -> Option<&Value> {
        self.aggregations.as_ref()
    }

    /// Counters so far.
    pub fn stats(&self) -> ReconstructionStats {
        self.stats
    }

    async fn accept_page(&mut self, page: SearchResponse, scrolling: bool) {
        self.stats.pages += 1;
        self.stats.hits_seen += page.hits.len() as u64;
        if page.aggregations.is_some() {
            self.aggregations = page.aggregations;
        }

        let exhausted = page.hits.is_empty();
        self.pending.extend(page.hits);

        if !scrolling {
            return;
        }
        match page.scroll_id {
            Some(scroll_id) if exhausted => self.clear_scroll(&scroll_id).await,
            Some(scroll_id) => self.scroll_id = Some(scroll_id),
            None => self.scroll_id = None,
        }
        if exhausted {
            self.scroll_id = None;
        }
    }

    async fn clear_scroll(&self, scroll_id: &str) {
        match self.reconstructor.client.delete_scroll(scroll_id).await {
            Ok(_) => debug!("Scroll context cleared"),
            Err(e) => warn!(error = %e, "Failed to clear scroll context"),
        }
    }

    async fn reconstruct(&mut self, hit: SearchHit) -> BridgeResult<Option<Row>> {
        let reconstructor = &self.reconstructor;
        let result = SearchResultRow::from_hit(hit, &reconstructor.schema)?;
        let key = result.primary_key();

        let Some(mut row) = reconstructor.rows.fetch_row(&key).await? else {
            self.stats.stale_hits_dropped += 1;
            debug!(
                index = %result.index,
                id = %result.id,
                "Dropping stale hit without primary row"
            );
            return Ok(None);
        };

        let payload = match &self.aggregations {
            Some(aggregations) => aggregations.clone(),
            None => Value::Object(result.source),
        };
        row.set_cell(
            reconstructor.synthetic_column.clone(),
            CellValue::Text(payload.to_string()),
        );
        Ok(Some(row))
    }
}
