//! Rollover families: lifecycle policy, index template and write alias.
//!
//! A family is set up in three steps, each idempotent on the backend:
//!
//! 1. an index state management policy rolling the write index over once it
//!    reaches the document count or size threshold,
//! 2. an index template applying the mapping and the rollover alias to every
//!    `<name>-*` index,
//! 3. the first generation `<name>-000001`, holding the alias as write index.
//!
//! The current [`RolloverState`] is probed from the backend, so an
//! interrupted setup resumes from the first missing step.

use std::fmt;

use serde_json::{Value, json};

use crate::client::SearchClient;
use crate::error::RequestResult;
use crate::types::IndexDescriptor;

/// Settings key binding an index to its rollover alias.
pub const ROLLOVER_ALIAS_SETTING: &str = "plugins.index_state_management.rollover_alias";

/// How far the setup of a rollover family has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RolloverState {
    /// Nothing registered.
    Absent,
    /// The lifecycle policy exists.
    PolicyRegistered,
    /// Policy and index template exist.
    TemplateRegistered,
    /// The write alias points at a generation; the family is usable.
    IndexCreated,
}

impl RolloverState {
    /// Derives the state from what exists on the backend.
    ///
    /// Each step depends on the previous ones, so the state is the last step
    /// before the first missing piece.
    pub fn from_parts(policy: bool, template: bool, index: bool) -> Self {
        match (policy, template, index) {
            (false, _, _) => RolloverState::Absent,
            (true, false, _) => RolloverState::PolicyRegistered,
            (true, true, false) => RolloverState::TemplateRegistered,
            (true, true, true) => RolloverState::IndexCreated,
        }
    }

    /// The step that moves the family out of this state, if any.
    pub fn next(self) -> Option<RolloverState> {
        match self {
            RolloverState::Absent => Some(RolloverState::PolicyRegistered),
            RolloverState::PolicyRegistered => Some(RolloverState::TemplateRegistered),
            RolloverState::TemplateRegistered => Some(RolloverState::IndexCreated),
            RolloverState::IndexCreated => None,
        }
    }
}

impl fmt::Display for RolloverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RolloverState::Absent => "absent",
            RolloverState::PolicyRegistered => "policy_registered",
            RolloverState::TemplateRegistered => "template_registered",
            RolloverState::IndexCreated => "index_created",
        };
        f.write_str(name)
    }
}

/// Probes which parts of a rollover family exist.
pub async fn probe_state(
    client: &SearchClient,
    descriptor: &IndexDescriptor,
) -> RequestResult<RolloverState> {
    let policy = client.get_index_policy(&descriptor.policy_id()).await?.is_some();
    let template = client
        .get_index_template(&descriptor.template_name())
        .await?
        .is_some();
    let index = !client.get_alias(&descriptor.name()).await?.is_empty();
    Ok(RolloverState::from_parts(policy, template, index))
}

/// Body of the lifecycle policy of a family.
pub fn policy_body(descriptor: &IndexDescriptor) -> Value {
    let options = &descriptor.options;
    let mut condition = serde_json::Map::new();
    if options.rollover_min_doc_count > 0 {
        condition.insert("min_doc_count".to_string(), json!(options.rollover_min_doc_count));
    }
    if !options.rollover_min_size.is_empty() {
        condition.insert("min_size".to_string(), json!(options.rollover_min_size));
    }

    json!({
        "policy": {
            "description": format!("Rollover policy for {}", descriptor.name()),
            "default_state": "hot",
            "states": [
                {
                    "name": "hot",
                    "actions": [ { "rollover": condition } ],
                    "transitions": []
                }
            ],
            "ism_template": {
                "index_patterns": [descriptor.generation_pattern()],
                "priority": 100
            }
        }
    })
}

/// Body of the index template of a family.
///
/// `index_body` is the settings and mappings body a plain index would be
/// created with; the rollover alias is added to its settings.
pub fn template_body(descriptor: &IndexDescriptor, index_body: &Value) -> Value {
    let mut settings = index_body
        .get("settings")
        .cloned()
        .unwrap_or_else(|| json!({}));
    if let Some(object) = settings.as_object_mut() {
        object.insert(ROLLOVER_ALIAS_SETTING.to_string(), json!(descriptor.name()));
    }
    json!({
        "index_patterns": [descriptor.generation_pattern()],
        "template": {
            "settings": settings,
            "mappings": index_body.get("mappings").cloned().unwrap_or_else(|| json!({}))
        }
    })
}
