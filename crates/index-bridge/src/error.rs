//! Error types for the index bridge.
//!
//! Errors are grouped by where they originate: the REST protocol client
//! ([`RequestError`]), the type marshaller ([`MarshalError`]), the index
//! lifecycle manager ([`LifecycleError`]) and the query translator
//! ([`QueryError`]). [`BridgeError`] wraps them all.
//!
//! Lifecycle races ("already exists") and stale search hits are deliberately
//! absent from this hierarchy: both are treated as success by the components
//! that encounter them.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

/// The primary error type for all bridge operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Transport, HTTP status and bulk item failures
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Row and field marshalling failures
    #[error(transparent)]
    Marshal(#[from] MarshalError),

    /// Index, policy and template lifecycle failures
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Filter expression translation failures
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Invalid configuration
    #[error("invalid configuration: {message}")]
    Config { message: String },
}

/// Errors raised by the REST protocol client.
#[derive(Error, Debug)]
pub enum RequestError {
    /// The request never produced an HTTP response.
    #[error("request {method} {path} failed: {message}")]
    Transport {
        method: String,
        path: String,
        message: String,
    },

    /// The request did not complete within the configured timeouts.
    #[error("request {method} {path} timed out after {timeout_ms}ms")]
    Timeout {
        method: String,
        path: String,
        timeout_ms: u64,
    },

    /// The backend answered with a status of 400 or above.
    #[error("request {method} {path} failed with status {status} ({reason})")]
    Status {
        method: String,
        path: String,
        status: u16,
        reason: String,
        body: String,
    },

    /// One or more items of a bulk request failed.
    #[error("bulk request failed for {} item(s): {}", failures.len(), summarize(failures))]
    BulkItems { failures: Vec<BulkItemFailure> },

    /// The response body could not be interpreted.
    #[error("invalid response from {path}: {message}")]
    InvalidResponse { path: String, message: String },
}

impl RequestError {
    /// Returns the HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true when the backend reported a missing index or document.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Returns true when the backend refused a create because the target exists.
    pub fn is_already_exists(&self) -> bool {
        match self {
            RequestError::Status { status, body, .. } => {
                (*status == 400 || *status == 409)
                    && (body.contains("resource_already_exists_exception")
                        || body.contains("version_conflict_engine_exception")
                        || body.contains("already exists"))
            }
            _ => false,
        }
    }
}

/// A single failed item of a bulk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemFailure {
    /// Position of the item in the batch.
    pub position: usize,
    /// The bulk action (`index`, `update`, `delete`).
    pub action: String,
    /// Target index reported by the backend.
    pub index: String,
    /// Document id.
    pub id: String,
    /// HTTP status of the item.
    pub status: u16,
    /// Backend error type, e.g. `mapper_parsing_exception`.
    pub error_type: String,
    /// Backend error reason.
    pub reason: String,
}

impl fmt::Display for BulkItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {}/{} [{}] {}: {}",
            self.position,
            self.action,
            self.index,
            self.id,
            self.status,
            self.error_type,
            self.reason
        )
    }
}

fn summarize(failures: &[BulkItemFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors raised while converting rows to documents and back.
#[derive(Error, Debug)]
pub enum MarshalError {
    /// A value does not fit the declared type.
    #[error("invalid value for field {field} of type {type_name}: {message}")]
    InvalidValue {
        field: String,
        type_name: String,
        message: String,
    },

    /// A primary key column is absent from the row or document.
    #[error("missing primary key field: {field}")]
    MissingKeyField { field: String },

    /// The schema itself is inconsistent.
    #[error("invalid index schema: {message}")]
    InvalidSchema { message: String },

    /// The timestamp pattern cannot be compiled.
    #[error("invalid date pattern '{pattern}': {message}")]
    InvalidDatePattern { pattern: String, message: String },
}

/// Errors raised by the index lifecycle manager.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// A rollover family is in a state that cannot be completed.
    #[error("rollover family {index} stuck in state {state}: {message}")]
    IncompleteRollover {
        index: String,
        state: String,
        message: String,
    },
}

/// Errors raised while translating filter expressions.
#[derive(Error, Debug)]
pub enum QueryError {
    /// The expression JSON is malformed.
    #[error("malformed filter expression: {message}")]
    Malformed { message: String },

    /// A boolean clause name is not one of must/should/must_not/filter.
    #[error("unknown boolean clause '{clause}'")]
    UnknownClause { clause: String },

    /// A leaf predicate lacks both a value and criteria.
    #[error("predicate on field {field} has neither a value nor criteria")]
    EmptyPredicate { field: String },
}

/// Result type alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Result type alias for REST client operations.
pub type RequestResult<T> = Result<T, RequestError>;

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Request(RequestError::InvalidResponse {
            path: "<json>".to_string(),
            message: err.to_string(),
        })
    }
}
