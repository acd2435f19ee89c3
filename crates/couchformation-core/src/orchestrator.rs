//! Service lifecycle
//!
//! Deploy: auth check, network, service reference, group resources, then
//! every node in parallel. Destroy runs the same steps backwards and only
//! releases the network once no service references it.

use crate::context::RunContext;
use crate::dispatch::{Dispatcher, Executor, WorkKind, WorkRegistry, WorkUnit};
use crate::error::{CoreError, Result};
use crate::network::{
    NetworkHandle, NetworkTeardown, add_service_reference, destroy_network, prune_service_groups,
    reconcile_group, reconcile_network, remove_service_reference,
};
use crate::node::{AuthParams, NodeNetwork, NodeParams, NodeRecord, NodeTeardown};
use crate::project::{NodeGroupSpec, Project, ServiceEntry};
use couchformation_cloud::ReconcileReport;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Outcome of `deploy_service`
#[derive(Debug, Clone)]
pub struct DeployReport {
    pub network: NetworkHandle,
    pub network_report: ReconcileReport,
    pub nodes: Vec<NodeRecord>,
}

/// Outcome of `destroy_service`
#[derive(Debug, Clone)]
pub struct DestroyReport {
    pub nodes: Vec<NodeTeardown>,
    pub groups: ReconcileReport,
    pub network: NetworkTeardown,
}

/// Outcome of `clean_project`
#[derive(Debug, Clone, Default)]
pub struct CleanReport {
    pub destroyed: Vec<String>,

    /// Services whose teardown failed but were dropped anyway
    pub forced: Vec<String>,
}

/// Drives whole services through their lifecycle
pub struct Orchestrator {
    ctx: Arc<RunContext>,
    registry: Arc<WorkRegistry>,
    executor: Executor,
}

impl Orchestrator {
    pub fn new(ctx: Arc<RunContext>, executor: Executor) -> Self {
        Self {
            ctx,
            registry: Arc::new(WorkRegistry::standard()),
            executor,
        }
    }

    pub fn with_registry(mut self, registry: WorkRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.ctx.clone(),
            self.registry.clone(),
            self.executor.clone(),
        )
    }

    fn open(&self, project: &str) -> Result<Project> {
        Project::open(self.ctx.project(project))
    }

    /// Register `service` (creating the project if needed) and add a node group
    pub fn create_service(&self, project: &str, service: &str, spec: NodeGroupSpec) -> Result<u32> {
        Project::open_or_create(self.ctx.project(project))?.create_service(service, spec)
    }

    pub async fn deploy_service(&self, project: &str, service: &str) -> Result<DeployReport> {
        let project = self.open(project)?;
        let entry = project.service(service)?;
        let groups = project.node_groups(service)?;
        if groups.is_empty() {
            return Err(CoreError::InvalidArgument(format!(
                "service '{}' has no node groups",
                service
            )));
        }

        let mut dispatcher = self.dispatcher();
        dispatcher
            .foreground(WorkUnit::new(
                WorkKind::AuthCheck,
                &AuthParams { cloud: entry.cloud },
            )?)
            .await?;

        let (network, network_report) =
            reconcile_network(&self.ctx, &project, entry.cloud, &entry.region).await?;
        add_service_reference(&project, entry.cloud, &entry.region, service)?;

        let mut group_resources = BTreeMap::new();
        for group in &groups {
            let ids = reconcile_group(
                &self.ctx,
                &project,
                entry.cloud,
                &entry.region,
                service,
                group.number,
            )
            .await?;
            group_resources.insert(group.number, ids);
        }

        for (group, number) in project.node_slots(service)? {
            let zone = network.zone_for(number);
            let params = NodeParams {
                project: project.name().to_string(),
                service: service.to_string(),
                group: group.number,
                number,
                spec: group.spec,
                network: NodeNetwork {
                    vpc_id: network.vpc_id.clone(),
                    zone: zone.map(|z| z.zone.clone()),
                    subnet_id: zone.map(|z| z.subnet_id.clone()),
                    resources: group_resources.get(&group.number).cloned().unwrap_or_default(),
                },
            };
            dispatcher.dispatch(WorkUnit::new(WorkKind::DeployNode, &params)?);
        }

        let mut nodes = dispatcher
            .join()
            .await?
            .into_iter()
            .map(|c| serde_json::from_value::<NodeRecord>(c.value))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        nodes.sort_by_key(|n| (n.group, n.number));

        tracing::info!(
            "Deployed {} node(s) for {}/{}",
            nodes.len(),
            project.name(),
            service
        );
        Ok(DeployReport {
            network,
            network_report,
            nodes,
        })
    }

    /// Teardown params for every node the service calls for or still has
    fn teardown_params(&self, project: &Project, entry: &ServiceEntry) -> Result<Vec<NodeParams>> {
        let groups = project.node_groups(&entry.name)?;
        let mut params: BTreeMap<(u32, u32), NodeParams> = BTreeMap::new();

        for (group, number) in project.node_slots(&entry.name)? {
            params.insert(
                (group.number, number),
                NodeParams {
                    project: project.name().to_string(),
                    service: entry.name.clone(),
                    group: group.number,
                    number,
                    spec: group.spec,
                    network: NodeNetwork::default(),
                },
            );
        }

        // nodes left over from a larger quantity or a removed group
        for record in project.nodes(&entry.name)? {
            let spec = groups
                .iter()
                .find(|g| g.number == record.group)
                .map(|g| g.spec.clone())
                .unwrap_or_else(|| NodeGroupSpec {
                    cloud: record.cloud,
                    region: record.region.clone(),
                    machine_type: record.machine_type.clone(),
                    quantity: record.number,
                    tags: Vec::new(),
                    image: None,
                    volume_size: None,
                });
            params
                .entry((record.group, record.number))
                .or_insert_with(|| NodeParams {
                    project: project.name().to_string(),
                    service: entry.name.clone(),
                    group: record.group,
                    number: record.number,
                    spec,
                    network: NodeNetwork::default(),
                });
        }
        Ok(params.into_values().collect())
    }

    /// Destroy every node of `service`, then its group resources, then
    /// release its network reference and the network if unused.
    ///
    /// If any node fails to go away the reference is kept, so the network
    /// outlives the failure and a later destroy can finish the job.
    pub async fn destroy_service(&self, project: &str, service: &str) -> Result<DestroyReport> {
        let project = self.open(project)?;
        let entry = project.service(service)?;

        let mut dispatcher = self.dispatcher();
        for params in self.teardown_params(&project, &entry)? {
            dispatcher.dispatch(WorkUnit::new(WorkKind::DestroyNode, &params)?);
        }
        let mut nodes = dispatcher
            .join()
            .await?
            .into_iter()
            .map(|c| serde_json::from_value::<NodeTeardown>(c.value))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        nodes.sort_by(|a, b| a.name.cmp(&b.name));

        let groups =
            prune_service_groups(&self.ctx, &project, entry.cloud, &entry.region, service).await?;
        remove_service_reference(&project, entry.cloud, &entry.region, service)?;
        let network = destroy_network(&self.ctx, &project, entry.cloud, &entry.region).await?;

        tracing::info!(
            "Destroyed {} node(s) of {}/{}",
            nodes.len(),
            project.name(),
            service
        );
        Ok(DestroyReport {
            nodes,
            groups,
            network,
        })
    }

    /// Current state of every node of `service`, refreshed from the provider
    pub async fn list_service(&self, project: &str, service: &str) -> Result<Vec<NodeRecord>> {
        let project = self.open(project)?;
        project.service(service)?;

        let groups = project.node_groups(service)?;
        let mut dispatcher = self.dispatcher();
        for record in project.nodes(service)? {
            let Some(group) = groups.iter().find(|g| g.number == record.group) else {
                continue;
            };
            let params = NodeParams {
                project: project.name().to_string(),
                service: service.to_string(),
                group: record.group,
                number: record.number,
                spec: group.spec.clone(),
                network: NodeNetwork::default(),
            };
            dispatcher.dispatch(WorkUnit::new(WorkKind::NodeInfo, &params)?);
        }

        let mut nodes = dispatcher
            .join()
            .await?
            .into_iter()
            .map(|c| serde_json::from_value::<NodeRecord>(c.value))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        nodes.sort_by_key(|n| (n.group, n.number));
        Ok(nodes)
    }

    /// Forget a service that has no deployed nodes
    pub fn remove_service(&self, project: &str, service: &str) -> Result<()> {
        self.open(project)?.remove_service(service)
    }

    /// Destroy every service of `project` and delete the project.
    ///
    /// With `force`, services whose teardown fails are dropped anyway and
    /// the network is released regardless.
    pub async fn clean_project(&self, project_name: &str, force: bool) -> Result<CleanReport> {
        let project = self.open(project_name)?;
        let mut report = CleanReport::default();

        for entry in project.services()? {
            match self.destroy_service(project_name, &entry.name).await {
                Ok(_) => report.destroyed.push(entry.name.clone()),
                Err(e) if force => {
                    tracing::warn!("Forcing removal of {}: {}", entry.name, e);
                    remove_service_reference(&project, entry.cloud, &entry.region, &entry.name)?;
                    if let Err(e) =
                        destroy_network(&self.ctx, &project, entry.cloud, &entry.region).await
                    {
                        tracing::warn!("Network {}/{} not destroyed: {}", entry.cloud, entry.region, e);
                    }
                    report.forced.push(entry.name.clone());
                }
                Err(e) => return Err(e),
            }
        }

        std::fs::remove_dir_all(project.paths().root())?;
        tracing::info!("Removed project {}", project_name);
        Ok(report)
    }
}
