//! Containers as node instances
#![allow(deprecated)]

use crate::error::classify;
use crate::labels::{labels_value, node_labels};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{Config, CreateContainerOptions, ListContainersOptions, NetworkingConfig};
use bollard::models::{ContainerInspectResponse, EndpointSettings, HostConfig};
use couchformation_cloud::{
    CloudError, Descriptor, ListFilter, ResourceAdapter, ResourceKind, ResourceSpec, Result,
    RetryConfig, with_retry,
};
use futures_util::stream::StreamExt;
use serde_json::Value;
use std::collections::HashMap;

/// Adapter running each node as a container on the project network
pub struct ContainerAdapter {
    docker: Docker,
    image: String,
    retry: RetryConfig,
}

impl ContainerAdapter {
    pub fn new(docker: Docker, image: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            docker,
            image: image.into(),
            retry,
        }
    }

    /// Pull `image` unless it is already present
    async fn ensure_image(&self, image: &str) -> Result<()> {
        match self.docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(e) => {
                let e = classify(e, image);
                if !e.is_not_found() {
                    return Err(e);
                }
            }
        }

        tracing::info!("Pulling image {}", image);
        let (from_image, tag) = parse_image_tag(image);
        let options = bollard::image::CreateImageOptions {
            from_image,
            tag,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(info) = stream.next().await {
            match info {
                Ok(bollard::models::CreateImageInfo {
                    status: Some(status),
                    ..
                }) => tracing::debug!("{}: {}", image, status),
                Ok(_) => {}
                Err(e) => return Err(classify(e, image)),
            }
        }
        Ok(())
    }
}

/// Split an image reference into name and tag ("latest" when absent)
pub fn parse_image_tag(image: &str) -> (&str, &str) {
    match image.rsplit_once(':') {
        // a colon inside a registry host:port is not a tag separator
        Some((name, tag)) if !tag.contains('/') => (name, tag),
        _ => (image, "latest"),
    }
}

/// Container configuration for a node spec
pub fn container_config(
    spec: &ResourceSpec,
    default_image: &str,
) -> Result<(Config<String>, CreateContainerOptions<String>)> {
    let network = spec.get_str("vpc_id").ok_or_else(|| CloudError::MissingDependency {
        kind: ResourceKind::Instance,
        param: "vpc_id".to_string(),
    })?;
    let image = spec.get_str("image").unwrap_or(default_image).to_string();
    let hostname = spec.get_str("hostname").unwrap_or(&spec.name).to_string();

    let mut endpoints = HashMap::new();
    endpoints.insert(
        network.to_string(),
        EndpointSettings {
            aliases: Some(vec![hostname.clone()]),
            ..Default::default()
        },
    );

    let config = Config {
        image: Some(image),
        hostname: Some(hostname),
        labels: Some(node_labels(spec)),
        host_config: Some(HostConfig {
            network_mode: Some(network.to_string()),
            ..Default::default()
        }),
        networking_config: Some(NetworkingConfig {
            endpoints_config: endpoints,
        }),
        ..Default::default()
    };
    let options = CreateContainerOptions {
        name: spec.name.clone(),
        platform: None,
    };

    Ok((config, options))
}

/// Descriptor for an inspected container
pub fn describe_container(inspected: ContainerInspectResponse) -> Option<Descriptor> {
    let id = inspected.id?;
    let name = inspected
        .name
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default();
    let labels = inspected
        .config
        .and_then(|c| c.labels)
        .unwrap_or_default();
    let private_ip = inspected
        .network_settings
        .and_then(|s| s.networks)
        .and_then(|networks| {
            networks
                .into_values()
                .filter_map(|e| e.ip_address)
                .find(|ip| !ip.is_empty())
        });
    let status = inspected
        .state
        .and_then(|s| s.status)
        .map(|s| s.to_string());

    let mut descriptor = Descriptor::new(id, name, ResourceKind::Instance)
        .with_attribute("labels", labels_value(labels));
    if let Some(ip) = private_ip {
        descriptor = descriptor.with_attribute("private_ip", Value::from(ip));
    }
    if let Some(status) = status {
        descriptor = descriptor.with_attribute("state", Value::from(status));
    }
    Some(descriptor)
}

#[async_trait]
impl ResourceAdapter for ContainerAdapter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Instance
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<Descriptor>> {
        let matcher = filter.matcher()?;
        let containers = with_retry(&self.retry, "list containers", || async {
            let options = ListContainersOptions::<String> {
                all: true,
                ..Default::default()
            };
            self.docker
                .list_containers(Some(options))
                .await
                .map_err(|e| classify(e, "containers"))
        })
        .await?;

        let found: Vec<Descriptor> = containers
            .into_iter()
            .filter_map(|c| {
                let name = c
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default();
                Some(
                    Descriptor::new(c.id?, name, ResourceKind::Instance)
                        .with_attribute("labels", labels_value(c.labels.unwrap_or_default())),
                )
            })
            .filter(|d| matcher.matches(d))
            .collect();

        if found.is_empty() {
            return Err(CloudError::EmptyResult(filter.describe()));
        }
        Ok(found)
    }

    async fn details(&self, id: &str) -> Result<Option<Descriptor>> {
        let inspected = with_retry(&self.retry, "inspect container", || async {
            self.docker
                .inspect_container(id, None::<bollard::query_parameters::InspectContainerOptions>)
                .await
                .map_err(|e| classify(e, id))
        })
        .await;

        match inspected {
            Ok(response) => Ok(describe_container(response)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .details(name)
            .await?
            .filter(|d| d.name == name)
            .map(|d| d.id))
    }

    async fn create(&self, spec: &ResourceSpec) -> Result<String> {
        let (config, options) = container_config(spec, &self.image)?;
        if let Some(image) = &config.image {
            self.ensure_image(image).await?;
        }

        let created = with_retry(&self.retry, "create container", || async {
            self.docker
                .create_container(Some(options.clone()), config.clone())
                .await
                .map_err(|e| classify(e, &spec.name))
        })
        .await?;

        with_retry(&self.retry, "start container", || async {
            self.docker
                .start_container(
                    &created.id,
                    None::<bollard::query_parameters::StartContainerOptions>,
                )
                .await
                .map_err(|e| classify(e, &spec.name))
        })
        .await?;

        tracing::debug!("Container {} started ({})", spec.name, created.id);
        Ok(created.id)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        with_retry(&self.retry, "remove container", || async {
            self.docker
                .remove_container(
                    id,
                    Some(bollard::query_parameters::RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await
                .map_err(|e| classify(e, id))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::{ContainerConfig, NetworkSettings};

    fn node_spec() -> ResourceSpec {
        ResourceSpec::new(ResourceKind::Instance, "cf-a1b2c3d4-cbs-node-01-01")
            .with("project", "demo")
            .with("service", "cbs")
            .with("group", 1)
            .with("number", 1)
            .with("vpc_id", "net-1")
    }

    #[test]
    fn test_parse_image_tag() {
        assert_eq!(parse_image_tag("couchbase/server:7.6.1"), ("couchbase/server", "7.6.1"));
        assert_eq!(parse_image_tag("couchbase/server"), ("couchbase/server", "latest"));
        assert_eq!(
            parse_image_tag("localhost:5000/cbs"),
            ("localhost:5000/cbs", "latest")
        );
    }

    #[test]
    fn test_container_config() {
        let (config, options) = container_config(&node_spec(), "couchbase/server:latest").unwrap();
        assert_eq!(options.name, "cf-a1b2c3d4-cbs-node-01-01");
        assert_eq!(config.image.as_deref(), Some("couchbase/server:latest"));
        assert_eq!(
            config.host_config.unwrap().network_mode.as_deref(),
            Some("net-1")
        );
        let endpoints = config.networking_config.unwrap().endpoints_config;
        assert!(endpoints.contains_key("net-1"));
        assert_eq!(
            config.labels.unwrap()["couch-formation.service"],
            "cbs"
        );
    }

    #[test]
    fn test_container_config_image_override() {
        let spec = node_spec().with("image", "couchbase/sync-gateway:3.2");
        let (config, _) = container_config(&spec, "couchbase/server:latest").unwrap();
        assert_eq!(config.image.as_deref(), Some("couchbase/sync-gateway:3.2"));
    }

    #[test]
    fn test_container_config_requires_network() {
        let spec = ResourceSpec::new(ResourceKind::Instance, "n");
        assert!(matches!(
            container_config(&spec, "img"),
            Err(CloudError::MissingDependency { .. })
        ));
    }

    #[test]
    fn test_describe_container() {
        let mut networks = HashMap::new();
        networks.insert(
            "cf-x-vpc".to_string(),
            EndpointSettings {
                ip_address: Some("10.11.0.3".to_string()),
                ..Default::default()
            },
        );
        let mut labels = HashMap::new();
        labels.insert("couch-formation.service".to_string(), "cbs".to_string());

        let inspected = ContainerInspectResponse {
            id: Some("c0ffee".to_string()),
            name: Some("/cf-x-cbs-node-01-01".to_string()),
            config: Some(ContainerConfig {
                labels: Some(labels),
                ..Default::default()
            }),
            network_settings: Some(NetworkSettings {
                networks: Some(networks),
                ..Default::default()
            }),
            ..Default::default()
        };

        let d = describe_container(inspected).unwrap();
        assert_eq!(d.id, "c0ffee");
        assert_eq!(d.name, "cf-x-cbs-node-01-01");
        assert_eq!(d.get_attribute::<String>("private_ip").as_deref(), Some("10.11.0.3"));
        assert!(
            ListFilter::all()
                .with_label("couch-formation.service", "cbs")
                .matcher()
                .unwrap()
                .matches(&d)
        );
    }
}
