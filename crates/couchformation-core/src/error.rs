use couchformation_cloud::CloudError;
use couchformation_config::ConfigError;
use couchformation_store::StoreError;
use thiserror::Error;

use crate::dispatch::DispatchError;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Service '{service}' not found in project '{project}'")]
    ServiceNotFound { project: String, service: String },

    #[error("Service '{service}' is deployed on {cloud}/{region}; node groups cannot move to {requested}")]
    ServiceMismatch {
        service: String,
        cloud: String,
        region: String,
        requested: String,
    },

    #[error("Service '{service}' still has {nodes} deployed node(s); destroy it first")]
    ServiceDeployed { service: String, nodes: usize },

    #[error("No region given and no default_region configured")]
    NoRegion,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No handler registered for {0}")]
    NoHandler(String),

    #[error("Worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
