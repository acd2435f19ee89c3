//! Docker driver error types

use couchformation_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DockerError {
    #[error("Cannot connect to Docker: {0}\n\nHint: make sure the Docker daemon is running")]
    ConnectionFailed(String),

    #[error("Docker API error: {0}")]
    Api(String),

    #[error("Image pull failed for {image}: {message}")]
    ImagePull { image: String, message: String },

    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),
}

impl From<DockerError> for CloudError {
    fn from(err: DockerError) -> Self {
        match err {
            DockerError::Cloud(inner) => inner,
            DockerError::ConnectionFailed(message) => CloudError::AuthenticationFailed(message),
            other => CloudError::ApiError(other.to_string()),
        }
    }
}

/// Map a Docker Engine error onto the capability contract's taxonomy
pub fn classify(err: bollard::errors::Error, target: &str) -> CloudError {
    match &err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => CloudError::NotFound(target.to_string()),
        bollard::errors::Error::DockerResponseServerError {
            status_code: 409, ..
        } => CloudError::AlreadyExists(target.to_string()),
        bollard::errors::Error::DockerResponseServerError {
            status_code: 429 | 502 | 503 | 504,
            ..
        }
        | bollard::errors::Error::RequestTimeoutError => {
            CloudError::Transient(format!("{}: {}", target, err))
        }
        _ => CloudError::ApiError(format!("{}: {}", target, err)),
    }
}

pub type Result<T> = std::result::Result<T, DockerError>;
