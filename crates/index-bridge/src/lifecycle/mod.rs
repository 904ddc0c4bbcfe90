//! Index lifecycle manager: creation, rollover setup and teardown.
//!
//! The manager owns the existence of indices, policies, templates and
//! aliases. Creation is safe to race: a concurrent creator winning is
//! treated as success, and removal of something already gone is not an
//! error.

pub mod mapping;
pub mod rollover;

pub use rollover::RolloverState;

use std::collections::HashSet;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::client::SearchClient;
use crate::error::{BridgeResult, LifecycleError, RequestError, RequestResult};
use crate::marshal::IndexSchema;
use crate::types::IndexDescriptor;

/// Creates and drops the indices backing secondary indexes.
#[derive(Debug)]
pub struct IndexLifecycleManager {
    client: SearchClient,
    /// Index names known to exist, to skip repeated existence checks.
    known: RwLock<HashSet<String>>,
}

impl IndexLifecycleManager {
    /// Creates a manager using the given client.
    pub fn new(client: SearchClient) -> Self {
        Self {
            client,
            known: RwLock::new(HashSet::new()),
        }
    }

    /// Returns the client.
    pub fn client(&self) -> &SearchClient {
        &self.client
    }

    /// Makes sure the index (or rollover family) of a descriptor exists.
    ///
    /// Idempotent: calling it again, or concurrently, leaves exactly one
    /// index (or one family) in place.
    pub async fn ensure_index(
        &self,
        descriptor: &IndexDescriptor,
        schema: &IndexSchema,
    ) -> BridgeResult<()> {
        let name = descriptor.name();
        if self.known.read().contains(&name) {
            return Ok(());
        }

        descriptor.options.validate()?;
        schema.validate()?;

        if descriptor.is_rollover() {
            self.ensure_rollover(descriptor, schema).await?;
        } else {
            self.ensure_plain(&name, descriptor, schema).await?;
        }

        self.known.write().insert(name);
        Ok(())
    }

    async fn ensure_plain(
        &self,
        name: &str,
        descriptor: &IndexDescriptor,
        schema: &IndexSchema,
    ) -> BridgeResult<()> {
        if self.client.index_exists(name).await? {
            debug!(index = %name, "Index already exists");
            return Ok(());
        }

        let shards = self.shard_count().await?;
        let body = mapping::build_index_body(schema, &descriptor.options, shards);
        tolerate_existing(self.client.create_index(name, &body).await)?;

        info!(index = %name, shards, "Created search index");
        Ok(())
    }

    async fn ensure_rollover(
        &self,
        descriptor: &IndexDescriptor,
        schema: &IndexSchema,
    ) -> BridgeResult<()> {
        let name = descriptor.name();
        let mut state = rollover::probe_state(&self.client, descriptor).await?;
        if state == RolloverState::IndexCreated {
            debug!(index = %name, "Rollover family already exists");
            return Ok(());
        }

        let shards = self.shard_count().await?;
        let index_body = mapping::build_index_body(schema, &descriptor.options, shards);

        while let Some(next) = state.next() {
            let step = match next {
                RolloverState::PolicyRegistered => {
                    let policy = rollover::policy_body(descriptor);
                    self.client
                        .put_index_policy(&descriptor.policy_id(), &policy)
                        .await
                }
                RolloverState::TemplateRegistered => {
                    let template = rollover::template_body(descriptor, &index_body);
                    self.client
                        .put_index_template(&descriptor.template_name(), &template)
                        .await
                }
                RolloverState::IndexCreated => {
                    self.client
                        .create_rollover_index(&name, &descriptor.first_generation(), &index_body)
                        .await
                }
                RolloverState::Absent => Ok(()),
            };

            tolerate_existing(step).map_err(|e| LifecycleError::IncompleteRollover {
                index: name.clone(),
                state: state.to_string(),
                message: e.to_string(),
            })?;
            debug!(index = %name, state = %next, "Rollover family advanced");
            state = next;
        }

        info!(
            index = %name,
            generation = %descriptor.first_generation(),
            shards,
            "Created rollover index family"
        );
        Ok(())
    }

    /// Removes the index (or whole rollover family) of a descriptor.
    ///
    /// For a family, every index behind the alias goes first, then the
    /// policy, then the template. Missing pieces are skipped.
    pub async fn drop_index(&self, descriptor: &IndexDescriptor) -> BridgeResult<()> {
        let name = descriptor.name();
        self.known.write().remove(&name);

        if !descriptor.is_rollover() {
            if self.client.delete_index(&name).await? {
                info!(index = %name, "Deleted search index");
            }
            return Ok(());
        }

        let generations = self.client.get_alias(&name).await?;
        for generation in &generations {
            self.client.delete_index(generation).await?;
        }
        let policy = self.client.delete_index_policy(&descriptor.policy_id()).await?;
        let template = self
            .client
            .delete_index_template(&descriptor.template_name())
            .await?;

        info!(
            index = %name,
            generations = generations.len(),
            policy,
            template,
            "Deleted rollover index family"
        );
        Ok(())
    }

    /// Whether an index or alias exists.
    pub async fn index_exists(&self, name: &str) -> BridgeResult<bool> {
        if self.known.read().contains(name) {
            return Ok(true);
        }
        Ok(self.client.index_exists(name).await?)
    }

    /// Probes the setup state of a rollover family.
    pub async fn rollover_state(&self, descriptor: &IndexDescriptor) -> BridgeResult<RolloverState> {
        Ok(rollover::probe_state(&self.client, descriptor).await?)
    }

    /// Primary shard count: one per live node.
    async fn shard_count(&self) -> RequestResult<u32> {
        let health = self.client.cluster_health().await?;
        Ok(health.number_of_nodes.max(1))
    }
}

/// Maps "already exists" responses to success.
fn tolerate_existing(result: RequestResult<()>) -> RequestResult<()> {
    match result {
        Err(e) if e.is_already_exists() => {
            debug!(error = %e, "Resource already exists");
            Ok(())
        }
        other => other,
    }
}
