//! Configuration for the REST client and for individual indices.
//!
//! Both structures deserialize with defaults for every field, so a minimal
//! configuration only names the backend nodes:
//!
//! ```
//! use helios_index_bridge::config::SearchClientConfig;
//!
//! let config: SearchClientConfig =
//!     serde_json::from_str(r#"{"nodes": ["http://search:9200"]}"#).unwrap();
//! assert_eq!(config.request_timeout_ms, 30000);
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};
use crate::marshal::{DEFAULT_TIMESTAMP_PATTERN, DatePattern};

/// Authentication for the search backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SearchAuth {
    /// Basic username/password authentication.
    Basic {
        /// The username for basic auth.
        username: String,
        /// The password for basic auth.
        password: String,
    },
    /// Bearer token authentication.
    Bearer {
        /// The bearer token.
        token: String,
    },
}

/// Configuration of the REST protocol client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchClientConfig {
    /// Backend node URLs. The first node is used (single-node connection pool).
    #[serde(default = "default_nodes")]
    pub nodes: Vec<String>,

    /// Optional authentication.
    #[serde(default)]
    pub auth: Option<SearchAuth>,

    /// Whether to disable certificate validation (default: false).
    /// Only use for development/testing.
    #[serde(default)]
    pub disable_certificate_validation: bool,

    /// Connection establishment budget in milliseconds (default: 5000).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Response budget in milliseconds (default: 30000).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Keep-alive of scroll contexts, in backend duration syntax (default: `"1m"`).
    #[serde(default = "default_scroll_keep_alive")]
    pub scroll_keep_alive: String,

    /// Major version assumed when the version probe fails (default: 7).
    #[serde(default = "default_fallback_major_version")]
    pub fallback_major_version: u32,
}

fn default_nodes() -> Vec<String> {
    vec!["http://localhost:9200".to_string()]
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_request_timeout_ms() -> u64 {
    30000
}

fn default_scroll_keep_alive() -> String {
    "1m".to_string()
}

fn default_fallback_major_version() -> u32 {
    7
}

impl Default for SearchClientConfig {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            auth: None,
            disable_certificate_validation: false,
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            scroll_keep_alive: default_scroll_keep_alive(),
            fallback_major_version: default_fallback_major_version(),
        }
    }
}

impl SearchClientConfig {
    /// Returns the node the client connects to.
    pub fn primary_node(&self) -> &str {
        self.nodes
            .first()
            .map(String::as_str)
            .unwrap_or("http://localhost:9200")
    }

    /// Total time a single call may take before it surfaces as a timeout.
    pub fn call_budget(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms + self.request_timeout_ms)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> BridgeResult<()> {
        let mut errors = Vec::new();

        if self.nodes.is_empty() {
            errors.push("at least one node is required".to_string());
        }
        for node in &self.nodes {
            if !(node.starts_with("http://") || node.starts_with("https://")) {
                errors.push(format!("node '{}' must be an http(s) URL", node));
            }
        }
        if self.connect_timeout_ms == 0 {
            errors.push("connect timeout cannot be 0".to_string());
        }
        if self.request_timeout_ms == 0 {
            errors.push("request timeout cannot be 0".to_string());
        }
        if let Err(e) = humantime::parse_duration(&self.scroll_keep_alive) {
            errors.push(format!(
                "scroll keep-alive '{}' is not a duration: {}",
                self.scroll_keep_alive, e
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(BridgeError::Config {
                message: errors.join("; "),
            })
        }
    }
}

/// Per-index options, fixed when the secondary index is registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexOptions {
    /// Whether the index is an auto-rolling family behind a write alias.
    #[serde(default)]
    pub rollover: bool,

    /// Document count that triggers a rollover (default: 10,000,000).
    #[serde(default = "default_rollover_min_doc_count")]
    pub rollover_min_doc_count: u64,

    /// Primary store size that triggers a rollover (default: `"50gb"`).
    #[serde(default = "default_rollover_min_size")]
    pub rollover_min_size: String,

    /// Refresh interval (default: `"1s"`).
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: String,

    /// Whether writes are fire-and-forget (default: false).
    #[serde(default)]
    pub async_write: bool,

    /// `retry_on_conflict` passed to update actions (default: 3).
    #[serde(default = "default_retry_on_conflict")]
    pub retry_on_conflict: u32,

    /// Maximum result window size (default: 10000).
    #[serde(default = "default_max_result_window")]
    pub max_result_window: u32,

    /// Column of reconstructed rows receiving the search payload
    /// (default: `"search_result"`).
    #[serde(default = "default_synthetic_column")]
    pub synthetic_column: String,

    /// Pattern for timestamp fields without their own format.
    #[serde(default = "default_timestamp_pattern")]
    pub timestamp_pattern: String,
}

fn default_rollover_min_doc_count() -> u64 {
    10_000_000
}

fn default_rollover_min_size() -> String {
    "50gb".to_string()
}

fn default_refresh_interval() -> String {
    "1s".to_string()
}

fn default_retry_on_conflict() -> u32 {
    3
}

fn default_max_result_window() -> u32 {
    10000
}

fn default_synthetic_column() -> String {
    "search_result".to_string()
}

fn default_timestamp_pattern() -> String {
    DEFAULT_TIMESTAMP_PATTERN.to_string()
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            rollover: false,
            rollover_min_doc_count: default_rollover_min_doc_count(),
            rollover_min_size: default_rollover_min_size(),
            refresh_interval: default_refresh_interval(),
            async_write: false,
            retry_on_conflict: default_retry_on_conflict(),
            max_result_window: default_max_result_window(),
            synthetic_column: default_synthetic_column(),
            timestamp_pattern: default_timestamp_pattern(),
        }
    }
}

impl IndexOptions {
    /// Options for an auto-rolling index family.
    pub fn rolling() -> Self {
        Self {
            rollover: true,
            ..Default::default()
        }
    }

    /// Validates the options.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.rollover && self.rollover_min_doc_count == 0 && self.rollover_min_size.is_empty() {
            return Err(BridgeError::Config {
                message: "rollover requires a document count or size threshold".to_string(),
            });
        }
        if self.synthetic_column.is_empty() {
            return Err(BridgeError::Config {
                message: "synthetic column name cannot be empty".to_string(),
            });
        }
        DatePattern::compile(&self.timestamp_pattern)?;
        Ok(())
    }
}
