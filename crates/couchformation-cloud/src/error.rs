//! Cloud provider error types

use crate::resource::ResourceKind;
use couchformation_store::StoreError;
use thiserror::Error;

/// Cloud provider errors
///
/// `NotFound` and `EmptyResult` are negative answers, not failures: the
/// reconciler turns them into state transitions. `Transient` is only
/// produced by adapters and retried there; whatever escapes the retry
/// wrapper is fatal for the current pass.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Cloud not supported by this build: {0}")]
    UnsupportedCloud(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("No resources matched: {0}")]
    EmptyResult(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Transient provider error: {0}")]
    Transient(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{kind} requires '{param}' which has not been provisioned")]
    MissingDependency { kind: ResourceKind, param: String },

    #[error("Failed to {operation} {kind} '{name}': {source}")]
    Fatal {
        kind: ResourceKind,
        operation: &'static str,
        name: String,
        #[source]
        source: Box<CloudError>,
    },

    #[error("{operation} still failing after {attempts} attempts: {message}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        message: String,
    },

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl CloudError {
    /// Whether this is a "nothing there" answer rather than a failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound(_) | CloudError::EmptyResult(_))
    }

    /// Whether the adapter layer may retry the call
    pub fn is_transient(&self) -> bool {
        matches!(self, CloudError::Transient(_))
    }

    pub(crate) fn fatal(
        kind: ResourceKind,
        operation: &'static str,
        name: impl Into<String>,
        source: CloudError,
    ) -> Self {
        CloudError::Fatal {
            kind,
            operation,
            name: name.into(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
