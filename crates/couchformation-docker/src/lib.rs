//! Docker driver for Couch Formation
//!
//! Implements the cloud capability contract on the local Docker engine:
//! the project network is a bridge network with an IPAM subnet and every
//! node is a container attached to it.
//!
//! # Requirements
//!
//! - A running Docker daemon reachable through the local socket or
//!   `DOCKER_HOST`
//!
//! # Example
//!
//! ```ignore
//! use couchformation_cloud::{CloudDriver, RetryConfig};
//! use couchformation_docker::{DockerDriver, DockerOptions};
//!
//! let driver = DockerDriver::connect(DockerOptions {
//!     image: "couchbase/server:latest".into(),
//!     retry: RetryConfig::default(),
//! })?;
//!
//! let auth = driver.check_auth().await?;
//! if !auth.authenticated {
//!     panic!("Docker unavailable: {:?}", auth.error);
//! }
//! ```

pub mod container;
pub mod driver;
pub mod error;
pub mod labels;
pub mod network;

pub use container::ContainerAdapter;
pub use driver::{DockerDriver, DockerOptions};
pub use error::{DockerError, Result, classify};
pub use labels::{MANAGED_LABEL, node_labels};
pub use network::NetworkAdapter;
