//! Project network orchestration
//!
//! One network per project, cloud and region, shared by every service
//! placed there. Services register in the network's `services` list; the
//! network is only torn down once that list is empty.

use crate::context::RunContext;
use crate::error::{CoreError, Result};
use crate::project::{Project, SERVICES_LIST, network_document};
use couchformation_cloud::{
    Cloud, CloudDriver, NetworkRequest, ReconcileReport, Reconciler, ResourceKind,
};
use couchformation_store::{Store, text_of};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// CIDR used when neither the document nor the settings name one
pub const DEFAULT_NETWORK_CIDR: &str = "10.11.0.0/16";

const ZONE_LIST: &str = "zone";

/// Subnet placed in one availability zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneSubnet {
    pub zone: String,
    pub cidr: Option<String>,
    pub subnet_id: String,
}

/// What the network document records after reconciliation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkHandle {
    pub cloud: Cloud,
    pub region: String,
    pub cidr: String,
    pub vpc_id: Option<String>,
    pub zones: Vec<ZoneSubnet>,
    pub services: Vec<String>,
}

impl NetworkHandle {
    fn read(store: &Store, cloud: Cloud, region: &str) -> Result<Self> {
        let zones = store
            .list_get(ZONE_LIST)?
            .into_iter()
            .filter(|entry| entry.len() >= 2)
            .map(|entry| ZoneSubnet {
                zone: text_of(&entry[0]),
                cidr: (entry.len() > 2).then(|| text_of(&entry[1])),
                subnet_id: entry.last().map(text_of).unwrap_or_default(),
            })
            .collect();

        Ok(Self {
            cloud,
            region: region.to_string(),
            cidr: store
                .get_str("cidr")?
                .unwrap_or_else(|| DEFAULT_NETWORK_CIDR.to_string()),
            vpc_id: store.get_str(ResourceKind::Network.state_key())?,
            zones,
            services: service_references(store)?,
        })
    }

    /// Subnet a node lands in; nodes are spread round-robin over zones
    pub fn zone_for(&self, number: u32) -> Option<&ZoneSubnet> {
        if self.zones.is_empty() {
            return None;
        }
        let index = (number.saturating_sub(1) as usize) % self.zones.len();
        self.zones.get(index)
    }
}

/// Result of a teardown request
#[derive(Debug, Clone)]
pub enum NetworkTeardown {
    /// Refused: these services still reference the network
    InUse(Vec<String>),
    Destroyed(ReconcileReport),
}

/// Open the network document of `project` for `cloud` in `region`
pub fn network_store(project: &Project, cloud: Cloud, region: &str) -> Result<Store> {
    Ok(Store::open(
        project.paths().network_db(region),
        &network_document(cloud),
    )?)
}

/// Recorded network state, or `None` if it was never reconciled
pub fn network_info(project: &Project, cloud: Cloud, region: &str) -> Result<Option<NetworkHandle>> {
    if !project.paths().network_db(region).exists() {
        return Ok(None);
    }
    let store = network_store(project, cloud, region)?;
    if store.keys()?.is_empty() {
        return Ok(None);
    }
    Ok(Some(NetworkHandle::read(&store, cloud, region)?))
}

fn service_references(store: &Store) -> Result<Vec<String>> {
    Ok(store
        .list_get(SERVICES_LIST)?
        .iter()
        .filter_map(|entry| entry.first().map(text_of))
        .collect())
}

fn network_request(
    ctx: &RunContext,
    project: &Project,
    driver: &dyn CloudDriver,
    store: &Store,
    region: &str,
) -> Result<NetworkRequest> {
    let cidr = match store.get_str("cidr")? {
        Some(cidr) => cidr,
        None if driver.cloud() == Cloud::Docker => ctx.settings().docker.cidr.clone(),
        None => DEFAULT_NETWORK_CIDR.to_string(),
    };
    Ok(NetworkRequest {
        project: project.name().to_string(),
        project_uid: project.uid().to_string(),
        cloud: driver.cloud(),
        region: region.to_string(),
        cidr,
        zones: driver.zones(region),
    })
}

/// Create or converge the project network
pub async fn reconcile_network(
    ctx: &RunContext,
    project: &Project,
    cloud: Cloud,
    region: &str,
) -> Result<(NetworkHandle, ReconcileReport)> {
    let driver = ctx.driver(cloud)?;

    ctx.guard()
        .with_lock(async {
            let store = network_store(project, cloud, region)?;
            let request = network_request(ctx, project, driver.as_ref(), &store, region)?;
            store.set("cidr", &request.cidr)?;

            let plan = driver.network_plan(&request)?;
            let report = Reconciler::new(&store, driver.as_ref())
                .converge_plan(&plan)
                .await?;
            tracing::info!(
                "Network {}/{} for {}: {}",
                cloud,
                region,
                project.name(),
                report.summary()
            );

            Ok::<_, CoreError>((NetworkHandle::read(&store, cloud, region)?, report))
        })
        .await
}

/// Tear the project network down unless a service still uses it
pub async fn destroy_network(
    ctx: &RunContext,
    project: &Project,
    cloud: Cloud,
    region: &str,
) -> Result<NetworkTeardown> {
    if !project.paths().network_db(region).exists() {
        return Ok(NetworkTeardown::Destroyed(ReconcileReport::new()));
    }
    let driver = ctx.driver(cloud)?;

    ctx.guard()
        .with_lock(async {
            let store = network_store(project, cloud, region)?;
            let services = service_references(&store)?;
            if !services.is_empty() {
                tracing::warn!(
                    "Network {}/{} is still used by {}; not destroying",
                    cloud,
                    region,
                    services.join(", ")
                );
                return Ok(NetworkTeardown::InUse(services));
            }

            let request = network_request(ctx, project, driver.as_ref(), &store, region)?;
            let plan = driver.network_plan(&request)?;
            let reconciler = Reconciler::new(&store, driver.as_ref());

            let mut report = ReconcileReport::new();
            // per-group resources left behind by services removed with --force
            for kind in driver.group_kinds() {
                let pattern = format!(r"_group_\d+_{}_id$", kind.suffix());
                let owners: BTreeSet<String> = store
                    .key_match(&pattern)?
                    .iter()
                    .filter_map(|key| key.split("_group_").next().map(str::to_string))
                    .collect();
                for service in owners {
                    report.extend(reconciler.prune_groups(&service, *kind).await?);
                }
            }
            report.extend(reconciler.destroy_plan(&plan).await?);
            store.clear()?;

            tracing::info!(
                "Network {}/{} for {} destroyed: {}",
                cloud,
                region,
                project.name(),
                report.summary()
            );
            Ok::<_, CoreError>(NetworkTeardown::Destroyed(report))
        })
        .await
}

/// Record that `service` uses the network; returns false if it already did
pub fn add_service_reference(
    project: &Project,
    cloud: Cloud,
    region: &str,
    service: &str,
) -> Result<bool> {
    let store = network_store(project, cloud, region)?;
    Ok(store.list_add(SERVICES_LIST, [service])?)
}

/// Drop `service` from the network's users; returns whether it was listed
pub fn remove_service_reference(
    project: &Project,
    cloud: Cloud,
    region: &str,
    service: &str,
) -> Result<bool> {
    if !project.paths().network_db(region).exists() {
        return Ok(false);
    }
    let store = network_store(project, cloud, region)?;
    Ok(store.list_remove(SERVICES_LIST, service)? > 0)
}

/// Converge the per-group resources of one node group.
///
/// Returns the recorded ids keyed by the kind's reference key, e.g.
/// `security_group_id`.
pub async fn reconcile_group(
    ctx: &RunContext,
    project: &Project,
    cloud: Cloud,
    region: &str,
    service: &str,
    group: u32,
) -> Result<BTreeMap<String, String>> {
    let driver = ctx.driver(cloud)?;
    if driver.group_kinds().is_empty() {
        return Ok(BTreeMap::new());
    }

    ctx.guard()
        .with_lock(async {
            let store = network_store(project, cloud, region)?;
            let report = Reconciler::new(&store, driver.as_ref())
                .converge_group(project.uid(), service, group)
                .await?;

            let ids = report
                .transitions
                .into_iter()
                .filter(|t| t.is_live())
                .filter_map(|t| t.id.map(|id| (t.kind.state_key().to_string(), id)))
                .collect();
            Ok::<_, CoreError>(ids)
        })
        .await
}

/// Remove every per-group resource recorded for `service`
pub async fn prune_service_groups(
    ctx: &RunContext,
    project: &Project,
    cloud: Cloud,
    region: &str,
    service: &str,
) -> Result<ReconcileReport> {
    if !project.paths().network_db(region).exists() {
        return Ok(ReconcileReport::new());
    }
    let driver = ctx.driver(cloud)?;

    ctx.guard()
        .with_lock(async {
            let store = network_store(project, cloud, region)?;
            let reconciler = Reconciler::new(&store, driver.as_ref());
            let mut report = ReconcileReport::new();
            for kind in driver.group_kinds() {
                report.extend(reconciler.prune_groups(service, *kind).await?);
            }
            Ok::<_, CoreError>(report)
        })
        .await
}
