//! Docker driver

use crate::container::ContainerAdapter;
use crate::error::{DockerError, Result};
use crate::network::NetworkAdapter;
use async_trait::async_trait;
use bollard::Docker;
use couchformation_cloud::{
    AuthStatus, Cloud, CloudDriver, NetworkPlan, NetworkRequest, ResourceAdapter, ResourceKind,
    ResourceSlot, ResourceSpec, RetryConfig, resource_name,
};

/// Options for the Docker driver
#[derive(Debug, Clone)]
pub struct DockerOptions {
    /// Default node image
    pub image: String,

    pub retry: RetryConfig,
}

/// Driver placing project networks and nodes on the local Docker engine
pub struct DockerDriver {
    docker: Docker,
    network: NetworkAdapter,
    containers: ContainerAdapter,
}

impl DockerDriver {
    /// Connect using the local defaults (socket or `DOCKER_HOST`)
    pub fn connect(options: DockerOptions) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| DockerError::ConnectionFailed(e.to_string()))?;
        Ok(Self::with_client(docker, options))
    }

    pub fn with_client(docker: Docker, options: DockerOptions) -> Self {
        Self {
            network: NetworkAdapter::new(docker.clone(), options.retry.clone()),
            containers: ContainerAdapter::new(docker.clone(), options.image, options.retry),
            docker,
        }
    }
}

#[async_trait]
impl CloudDriver for DockerDriver {
    fn cloud(&self) -> Cloud {
        Cloud::Docker
    }

    fn display_name(&self) -> &str {
        "Docker"
    }

    async fn check_auth(&self) -> couchformation_cloud::Result<AuthStatus> {
        if let Err(e) = self.docker.ping().await {
            return Ok(AuthStatus::failed(
                DockerError::ConnectionFailed(e.to_string()).to_string(),
            ));
        }
        let info = match self.docker.version().await {
            Ok(version) => format!(
                "Docker Engine {}",
                version.version.unwrap_or_else(|| "unknown".to_string())
            ),
            Err(_) => "Docker Engine".to_string(),
        };
        Ok(AuthStatus::ok(info))
    }

    fn network_plan(&self, request: &NetworkRequest) -> couchformation_cloud::Result<NetworkPlan> {
        // a single bridge network; the engine handles addressing and routing
        let spec = ResourceSpec::new(
            ResourceKind::Network,
            resource_name(&request.project_uid, ResourceKind::Network.suffix()),
        )
        .with("cidr", request.cidr.as_str())
        .with("project", request.project.as_str());

        Ok(NetworkPlan::new(vec![ResourceSlot::new(spec)]))
    }

    fn adapter(&self, kind: ResourceKind) -> Option<&dyn ResourceAdapter> {
        match kind {
            ResourceKind::Network => Some(&self.network as &dyn ResourceAdapter),
            ResourceKind::Instance => Some(&self.containers as &dyn ResourceAdapter),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> NetworkRequest {
        NetworkRequest {
            project: "demo".into(),
            project_uid: "a1b2c3d4".into(),
            cloud: Cloud::Docker,
            region: "local".into(),
            cidr: "10.11.0.0/16".into(),
            zones: Vec::new(),
        }
    }

    fn options() -> DockerOptions {
        DockerOptions {
            image: "couchbase/server:latest".into(),
            retry: RetryConfig::default(),
        }
    }

    // Constructing a client does not contact the daemon
    #[test]
    fn test_plan_is_single_network() {
        let Ok(driver) = DockerDriver::connect(options()) else {
            return;
        };
        let plan = driver.network_plan(&request()).unwrap();
        assert_eq!(plan.len(), 1);
        let slot = &plan.slots()[0];
        assert_eq!(slot.name(), "cf-a1b2c3d4-vpc");
        assert_eq!(slot.spec.get_str("cidr"), Some("10.11.0.0/16"));
        assert_eq!(slot.reference.to_string(), "vpc_id");
    }

    #[test]
    fn test_supported_kinds() {
        let Ok(driver) = DockerDriver::connect(options()) else {
            return;
        };
        assert!(driver.adapter(ResourceKind::Network).is_some());
        assert!(driver.node_adapter().is_ok());
        assert!(driver.adapter(ResourceKind::Gateway).is_none());
        assert!(driver.group_kinds().is_empty());
    }

    #[tokio::test]
    #[ignore = "requires a running Docker daemon"]
    async fn test_check_auth_against_daemon() {
        let driver = DockerDriver::connect(options()).unwrap();
        let status = driver.check_auth().await.unwrap();
        assert!(status.authenticated, "{:?}", status.error);
    }
}
