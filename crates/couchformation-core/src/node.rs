//! Node work
//!
//! Handlers for the work units that touch a single node. They run inside
//! worker processes (or in-process for tests) and only see their own node
//! document, so everything they need from the network is passed in.

use crate::context::RunContext;
use crate::dispatch::WorkHandler;
use crate::error::Result;
use crate::project::{
    NodeGroupSpec, Project, group_document, node_document, read_fields, write_fields,
};
use async_trait::async_trait;
use couchformation_cloud::{
    Cloud, CloudDriver, CloudError, Discovery, Reconciler, ResourceKind, ResourceSlot,
    ResourceSpec, TransitionType, resource_name,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Contents of a node document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub service: String,
    pub group: u32,
    pub number: u32,
    pub cloud: Cloud,
    pub region: String,

    #[serde(default)]
    pub zone: Option<String>,

    pub machine_type: String,

    #[serde(default)]
    pub instance_id: Option<String>,

    #[serde(default)]
    pub private_ip: Option<String>,

    #[serde(default)]
    pub state: Option<String>,
}

/// Network placement handed to a node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeNetwork {
    #[serde(default)]
    pub vpc_id: Option<String>,

    #[serde(default)]
    pub zone: Option<String>,

    #[serde(default)]
    pub subnet_id: Option<String>,

    /// Per-group resource ids keyed by reference key
    #[serde(default)]
    pub resources: BTreeMap<String, String>,
}

/// Parameters of the node work units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeParams {
    pub project: String,
    pub service: String,
    pub group: u32,
    pub number: u32,
    pub spec: NodeGroupSpec,

    #[serde(default)]
    pub network: NodeNetwork,
}

impl NodeParams {
    pub fn document(&self) -> String {
        node_document(&self.service, self.group, self.number)
    }

    fn slot(&self, project_uid: &str) -> ResourceSlot {
        let document = self.document();
        let mut spec = ResourceSpec::new(ResourceKind::Instance, resource_name(project_uid, &document))
            .with("project", self.project.as_str())
            .with("service", self.service.as_str())
            .with("group", self.group)
            .with("number", self.number)
            .with("hostname", document.as_str())
            .with("machine_type", self.spec.machine_type.as_str())
            .with("tags", self.spec.tags.clone());

        if let Some(image) = &self.spec.image {
            spec.set("image", image.as_str());
        }
        if let Some(size) = self.spec.volume_size {
            spec.set("volume_size", size);
        }
        if let Some(vpc_id) = &self.network.vpc_id {
            spec.set("vpc_id", vpc_id.as_str());
        }
        if let Some(zone) = &self.network.zone {
            spec.set("zone", zone.as_str());
        }
        if let Some(subnet_id) = &self.network.subnet_id {
            spec.set("subnet_id", subnet_id.as_str());
        }
        for (key, id) in &self.network.resources {
            spec.set(key.as_str(), id.as_str());
        }

        ResourceSlot::new(spec).discovered_by(Discovery::ByName)
    }

    fn record(&self) -> NodeRecord {
        NodeRecord {
            name: self.document(),
            service: self.service.clone(),
            group: self.group,
            number: self.number,
            cloud: self.spec.cloud,
            region: self.spec.region.clone(),
            zone: self.network.zone.clone(),
            machine_type: self.spec.machine_type.clone(),
            instance_id: None,
            private_ip: None,
            state: None,
        }
    }
}

/// Parameters of the auth check unit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AuthParams {
    pub cloud: Cloud,
}

/// Result of a node teardown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTeardown {
    pub name: String,
    pub transition: TransitionType,
    pub instance_id: Option<String>,
}

/// Refresh `record` from what the provider reports for its instance
async fn describe(driver: &dyn CloudDriver, record: &mut NodeRecord) -> Result<()> {
    let Some(id) = &record.instance_id else {
        return Ok(());
    };
    match driver.node_adapter()?.details(id).await? {
        Some(descriptor) => {
            if let Some(ip) = descriptor.get_attribute::<String>("private_ip") {
                record.private_ip = Some(ip);
            }
            record.state = Some(
                descriptor
                    .get_attribute::<String>("state")
                    .unwrap_or_else(|| "running".to_string()),
            );
        }
        None => record.state = Some("missing".to_string()),
    }
    Ok(())
}

/// Create or converge one node and record it
pub struct DeployNode;

#[async_trait]
impl WorkHandler for DeployNode {
    async fn run(&self, ctx: &RunContext, params: Value) -> Result<Value> {
        let params: NodeParams = serde_json::from_value(params)?;
        let project = Project::open(ctx.project(&params.project))?;
        let driver = ctx.driver(params.spec.cloud)?;
        let store = project.service_store(&params.service, &params.document())?;

        let slot = params.slot(project.uid());
        let transitions = Reconciler::new(&store, driver.as_ref())
            .converge(&slot)
            .await?;
        let last = transitions.last().ok_or_else(|| {
            CloudError::ApiError(format!("no transition applied to {}", slot.name()))
        })?;

        let mut record = params.record();
        record.instance_id = last.id.clone();
        describe(driver.as_ref(), &mut record).await?;
        write_fields(&store, &record)?;

        tracing::info!(
            "Node {} {} ({})",
            record.name,
            last.transition_type,
            record.private_ip.as_deref().unwrap_or("no address")
        );
        Ok(serde_json::to_value(record)?)
    }
}

/// Delete one node and drop its document
pub struct DestroyNode;

#[async_trait]
impl WorkHandler for DestroyNode {
    async fn run(&self, ctx: &RunContext, params: Value) -> Result<Value> {
        let params: NodeParams = serde_json::from_value(params)?;
        let project = Project::open(ctx.project(&params.project))?;
        let document = params.document();

        let absent = || NodeTeardown {
            name: params.document(),
            transition: TransitionType::Absent,
            instance_id: None,
        };
        if !project.paths().service_db(&params.service).exists() {
            return Ok(serde_json::to_value(absent())?);
        }
        let mut store =
            project.service_store(&params.service, &group_document(&params.service, params.group))?;
        if !store.has_document(&document)? {
            return Ok(serde_json::to_value(absent())?);
        }
        store.document(&document);

        let driver = ctx.driver(params.spec.cloud)?;
        let slot = params.slot(project.uid());
        let transition = Reconciler::new(&store, driver.as_ref())
            .destroy(&slot)
            .await?;
        store.remove(&document)?;

        tracing::info!("Node {} {}", document, transition.transition_type);
        Ok(serde_json::to_value(NodeTeardown {
            name: document,
            transition: transition.transition_type,
            instance_id: transition.id,
        })?)
    }
}

/// Report a node's record refreshed from the provider
pub struct NodeInfo;

#[async_trait]
impl WorkHandler for NodeInfo {
    async fn run(&self, ctx: &RunContext, params: Value) -> Result<Value> {
        let params: NodeParams = serde_json::from_value(params)?;
        let project = Project::open(ctx.project(&params.project))?;
        let store = project.service_store(&params.service, &params.document())?;

        let mut record = read_fields::<NodeRecord>(&store)?.unwrap_or_else(|| params.record());
        let driver = ctx.driver(record.cloud)?;
        describe(driver.as_ref(), &mut record).await?;
        Ok(serde_json::to_value(record)?)
    }
}

/// Verify credentials for a cloud before any work fans out
pub struct AuthCheck;

#[async_trait]
impl WorkHandler for AuthCheck {
    async fn run(&self, ctx: &RunContext, params: Value) -> Result<Value> {
        let params: AuthParams = serde_json::from_value(params)?;
        let driver = ctx.driver(params.cloud)?;
        let status = driver.check_auth().await?;
        if !status.authenticated {
            return Err(CloudError::AuthenticationFailed(
                status
                    .error
                    .unwrap_or_else(|| format!("{} credentials rejected", params.cloud)),
            )
            .into());
        }
        tracing::debug!(
            "{} authenticated: {}",
            driver.display_name(),
            status.account_info.as_deref().unwrap_or("-")
        );
        Ok(serde_json::to_value(status)?)
    }
}
