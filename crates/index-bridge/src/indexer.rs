//! Write indexer: mirrors row mutations into the search index.
//!
//! Writes are upserts (`update` with `doc_as_upsert`) so that a mutation
//! carrying only some columns merges into the existing document. Deletes
//! against a rollover family target the generation holding the document.
//!
//! In [`WriteMode::Asynchronous`] the request runs on a detached task and
//! failures are only logged; the mirror is eventually consistent either way.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::client::{BulkAction, BulkBatch, BulkSummary, SearchClient};
use crate::error::{BridgeError, BridgeResult};
use crate::marshal::{self, IndexSchema};
use crate::types::{IndexDescriptor, PrimaryKey, Row};

/// Whether the caller waits for the backend to acknowledge a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Await the HTTP round trip and surface its errors.
    #[default]
    Synchronous,
    /// Spawn the request and return immediately; failures are logged.
    Asynchronous,
}

impl WriteMode {
    /// Maps an "is async" flag to a mode.
    pub fn from_async_flag(is_async: bool) -> Self {
        if is_async {
            WriteMode::Asynchronous
        } else {
            WriteMode::Synchronous
        }
    }
}

/// Counters of asynchronous writes.
#[derive(Debug, Default)]
struct AsyncWriteStats {
    pending: AtomicUsize,
    failed: AtomicU64,
}

/// Writes documents of one secondary index.
#[derive(Debug, Clone)]
pub struct WriteIndexer {
    client: SearchClient,
    descriptor: Arc<IndexDescriptor>,
    schema: Arc<IndexSchema>,
    stats: Arc<AsyncWriteStats>,
}

impl WriteIndexer {
    /// Creates an indexer for a descriptor and its schema.
    pub fn new(client: SearchClient, descriptor: IndexDescriptor, schema: IndexSchema) -> Self {
        Self {
            client,
            descriptor: Arc::new(descriptor),
            schema: Arc::new(schema),
            stats: Arc::new(AsyncWriteStats::default()),
        }
    }

    /// The descriptor of the index written to.
    pub fn descriptor(&self) -> &IndexDescriptor {
        &self.descriptor
    }

    /// The schema rows are marshalled with.
    pub fn schema(&self) -> &IndexSchema {
        &self.schema
    }

    /// Mirrors one row mutation. A row tombstone deletes the document.
    ///
    /// A row that cannot be marshalled is logged and reported as an error;
    /// nothing is sent for it.
    pub async fn index_row(&self, row: &Row, mode: WriteMode) -> BridgeResult<()> {
        if row.deleted {
            return self.delete_row(&row.key, mode).await;
        }

        let action = self.upsert_action(row).inspect_err(|e| {
            warn!(
                index = %self.descriptor.name(),
                key = %row.key.document_id(),
                error = %e,
                "Skipping row that cannot be marshalled"
            );
        })?;

        let mut batch = BulkBatch::new();
        batch.push(action);
        let client = self.client.clone();
        self.dispatch(mode, async move {
            client.bulk(&batch).await?;
            Ok::<(), BridgeError>(())
        })
        .await
    }

    /// Mirrors many row mutations with one bulk request.
    ///
    /// Rows that cannot be marshalled are logged and left out of the batch.
    /// Tombstones of a rollover family are resolved to their generation
    /// before the batch is sent.
    pub async fn index_rows(&self, rows: &[Row], mode: WriteMode) -> BridgeResult<()> {
        let mut writes = Vec::with_capacity(rows.len());
        let mut deletes = Vec::new();
        for row in rows {
            if row.deleted {
                deletes.push(row.key.document_id());
                continue;
            }
            match self.upsert_action(row) {
                Ok(action) => writes.push(action),
                Err(e) => warn!(
                    index = %self.descriptor.name(),
                    key = %row.key.document_id(),
                    error = %e,
                    "Skipping row that cannot be marshalled"
                ),
            }
        }

        let indexer = self.clone();
        self.dispatch(mode, async move {
            let mut batch = BulkBatch::new();
            for action in writes {
                batch.push(action);
            }
            for id in deletes {
                let index = indexer.delete_target(&id).await;
                batch.push(BulkAction::Delete { index, id });
            }
            let summary: BulkSummary = indexer.client.bulk(&batch).await?;
            debug!(
                index = %indexer.descriptor.name(),
                succeeded = summary.succeeded,
                not_found = summary.not_found,
                "Bulk write acknowledged"
            );
            Ok::<(), BridgeError>(())
        })
        .await
    }

    /// Deletes the document of a primary key. A missing document is not an error.
    pub async fn delete_row(&self, key: &PrimaryKey, mode: WriteMode) -> BridgeResult<()> {
        let id = marshal::key_to_document_id(key);
        let indexer = self.clone();
        self.dispatch(mode, async move {
            let index = indexer.delete_target(&id).await;
            let mut batch = BulkBatch::new();
            batch.push(BulkAction::Delete { index, id });
            indexer.client.bulk(&batch).await?;
            Ok::<(), BridgeError>(())
        })
        .await
    }

    /// Number of asynchronous writes still in flight.
    pub fn pending_writes(&self) -> usize {
        self.stats.pending.load(Ordering::Acquire)
    }

    /// Number of asynchronous writes that failed.
    pub fn failed_writes(&self) -> u64 {
        self.stats.failed.load(Ordering::Acquire)
    }

    /// Waits until no asynchronous write is in flight.
    ///
    /// Returns false if writes are still pending when the timeout expires.
    pub async fn wait_for_pending(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.pending_writes() == 0 {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        self.pending_writes() == 0
    }

    fn upsert_action(&self, row: &Row) -> BridgeResult<BulkAction> {
        let document = marshal::row_to_document(row, &self.schema)?;
        Ok(BulkAction::Update {
            index: self.descriptor.name(),
            id: marshal::key_to_document_id(&row.key),
            document,
            retry_on_conflict: self.descriptor.options.retry_on_conflict,
        })
    }

    /// Index a delete must target.
    ///
    /// Deletes cannot go through a rollover alias when it spans several
    /// generations, so the generation holding the id is looked up first.
    /// When the lookup fails or finds nothing the alias itself is used.
    async fn delete_target(&self, id: &str) -> String {
        let alias = self.descriptor.name();
        if !self.descriptor.is_rollover() {
            return alias;
        }

        let query = json!({
            "query": { "ids": { "values": [id] } },
            "size": 1,
            "_source": false
        });
        match self.client.search(&alias, &query, None).await {
            Ok(response) => match response.hits.into_iter().next() {
                Some(hit) if !hit.index.is_empty() => hit.index,
                _ => {
                    debug!(index = %alias, id = %id, "Document not found in any generation");
                    alias
                }
            },
            Err(e) => {
                warn!(index = %alias, id = %id, error = %e, "Generation lookup failed, deleting via alias");
                alias
            }
        }
    }

    async fn dispatch<F>(&self, mode: WriteMode, write: F) -> BridgeResult<()>
    where
        F: Future<Output = BridgeResult<()>> + Send + 'static,
    {
        match mode {
            WriteMode::Synchronous => write.await,
            WriteMode::Asynchronous => {
                let stats = self.stats.clone();
                let index = self.descriptor.name();
                stats.pending.fetch_add(1, Ordering::AcqRel);
                tokio::spawn(async move {
                    if let Err(e) = write.await {
                        stats.failed.fetch_add(1, Ordering::AcqRel);
                        error!(index = %index, error = %e, "Asynchronous index write failed");
                    }
                    stats.pending.fetch_sub(1, Ordering::AcqRel);
                });
                Ok(())
            }
        }
    }
}
