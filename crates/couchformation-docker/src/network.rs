//! Docker networks as the project network resource

use crate::error::classify;
use crate::labels::{MANAGED_LABEL, labels_value};
use async_trait::async_trait;
use bollard::Docker;
use bollard::models::{Ipam, IpamConfig, NetworkCreateRequest};
use couchformation_cloud::{
    CloudError, Descriptor, ListFilter, ResourceAdapter, ResourceKind, ResourceSpec, Result,
    RetryConfig, with_retry,
};
use serde_json::Value;
use std::collections::HashMap;

/// Adapter managing one bridge network per project
pub struct NetworkAdapter {
    docker: Docker,
    retry: RetryConfig,
}

impl NetworkAdapter {
    pub fn new(docker: Docker, retry: RetryConfig) -> Self {
        Self { docker, retry }
    }
}

/// Build the create request for a project network
pub fn network_request(spec: &ResourceSpec) -> Result<NetworkCreateRequest> {
    let cidr = spec.get_str("cidr").ok_or_else(|| {
        CloudError::InvalidConfig(format!("network {} has no cidr", spec.name))
    })?;

    let mut labels = HashMap::new();
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
    if let Some(project) = spec.get_str("project") {
        labels.insert("couch-formation.project".to_string(), project.to_string());
    }

    Ok(NetworkCreateRequest {
        name: spec.name.clone(),
        driver: Some("bridge".to_string()),
        ipam: Some(Ipam {
            config: Some(vec![IpamConfig {
                subnet: Some(cidr.to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        labels: Some(labels),
        ..Default::default()
    })
}

fn describe(
    id: Option<String>,
    name: Option<String>,
    labels: Option<HashMap<String, String>>,
    subnet: Option<String>,
) -> Option<Descriptor> {
    let mut descriptor = Descriptor::new(id?, name.unwrap_or_default(), ResourceKind::Network)
        .with_attribute("labels", labels_value(labels.unwrap_or_default()));
    if let Some(subnet) = subnet {
        descriptor = descriptor.with_attribute("cidr", Value::from(subnet));
    }
    Some(descriptor)
}

#[async_trait]
impl ResourceAdapter for NetworkAdapter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Network
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<Descriptor>> {
        let matcher = filter.matcher()?;
        let networks = with_retry(&self.retry, "list networks", || async {
            self.docker
                .list_networks(None::<bollard::query_parameters::ListNetworksOptions>)
                .await
                .map_err(|e| classify(e, "networks"))
        })
        .await?;

        let found: Vec<Descriptor> = networks
            .into_iter()
            .filter_map(|n| {
                let subnet = n
                    .ipam
                    .and_then(|ipam| ipam.config)
                    .and_then(|config| config.into_iter().find_map(|c| c.subnet));
                describe(n.id, n.name, n.labels, subnet)
            })
            .filter(|d| matcher.matches(d))
            .collect();

        if found.is_empty() {
            return Err(CloudError::EmptyResult(filter.describe()));
        }
        Ok(found)
    }

    async fn details(&self, id: &str) -> Result<Option<Descriptor>> {
        let inspected = with_retry(&self.retry, "inspect network", || async {
            self.docker
                .inspect_network(id, None::<bollard::query_parameters::InspectNetworkOptions>)
                .await
                .map_err(|e| classify(e, id))
        })
        .await;

        match inspected {
            Ok(n) => {
                let subnet = n
                    .ipam
                    .and_then(|ipam| ipam.config)
                    .and_then(|config| config.into_iter().find_map(|c| c.subnet));
                Ok(describe(n.id, n.name, n.labels, subnet))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<String>> {
        // the engine resolves names as well as ids
        Ok(self
            .details(name)
            .await?
            .filter(|d| d.name == name)
            .map(|d| d.id))
    }

    async fn create(&self, spec: &ResourceSpec) -> Result<String> {
        let request = network_request(spec)?;
        with_retry(&self.retry, "create network", || async {
            self.docker
                .create_network(request.clone())
                .await
                .map_err(|e| classify(e, &spec.name))
        })
        .await?;

        let id = self.get_by_name(&spec.name).await?.ok_or_else(|| {
            CloudError::ApiError(format!("network {} vanished after create", spec.name))
        })?;
        tracing::debug!("Docker network {} created ({})", spec.name, id);
        Ok(id)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        with_retry(&self.retry, "remove network", || async {
            self.docker
                .remove_network(id)
                .await
                .map_err(|e| classify(e, id))
        })
        .await
    }
}
