//! In-process cloud
//!
//! A complete implementation of the capability contract that keeps its
//! resources in memory. It counts every call and can be told to fail a
//! given operation, which makes it the reference driver for exercising
//! reconciliation without a provider account.

use crate::error::{CloudError, Result};
use crate::plan::{
    Dependency, NetworkPlan, NetworkRequest, ReferenceSlot, ResourceSlot, zone_cidr,
};
use crate::provider::{AuthStatus, CloudDriver, ResourceAdapter};
use crate::resource::{
    Cloud, Descriptor, ListFilter, ResourceKind, ResourceSpec, resource_name,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Adapter operations, for call counting and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    List,
    Details,
    GetByName,
    Create,
    Delete,
}

#[derive(Debug, Default)]
struct MemoryState {
    resources: BTreeMap<String, Descriptor>,
    next_id: u64,
    calls: HashMap<(ResourceKind, Op), usize>,
    failures: HashSet<(ResourceKind, Op)>,
}

impl MemoryState {
    fn record(&mut self, kind: ResourceKind, op: Op) -> Result<()> {
        *self.calls.entry((kind, op)).or_default() += 1;
        if self.failures.contains(&(kind, op)) {
            return Err(CloudError::ApiError(format!(
                "injected {:?} failure for {}",
                op, kind
            )));
        }
        Ok(())
    }

    fn allocate(&mut self, kind: ResourceKind) -> String {
        self.next_id += 1;
        format!("{}-{:06}", kind.suffix(), self.next_id)
    }
}

type Shared = Arc<Mutex<MemoryState>>;

fn lock(state: &Shared) -> MutexGuard<'_, MemoryState> {
    // a panic while holding the lock leaves plain data; keep going
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory cloud driver
///
/// Clones share the same resources.
#[derive(Clone)]
pub struct MemoryCloud {
    cloud: Cloud,
    state: Shared,
    adapters: Vec<MemoryAdapter>,
    group_kinds: Vec<ResourceKind>,
}

impl MemoryCloud {
    pub fn new(cloud: Cloud) -> Self {
        let state: Shared = Arc::default();
        let adapters = [
            ResourceKind::Network,
            ResourceKind::Subnet,
            ResourceKind::SecurityGroup,
            ResourceKind::SshKey,
            ResourceKind::Gateway,
            ResourceKind::RouteTable,
            ResourceKind::DnsZone,
            ResourceKind::Instance,
        ]
        .into_iter()
        .map(|kind| MemoryAdapter {
            kind,
            state: state.clone(),
        })
        .collect();

        Self {
            cloud,
            state,
            adapters,
            group_kinds: vec![ResourceKind::SecurityGroup],
        }
    }

    /// Create a resource behind the reconciler's back; returns its id
    pub fn insert(&self, kind: ResourceKind, name: &str) -> String {
        let mut state = lock(&self.state);
        let id = state.allocate(kind);
        let mut descriptor = Descriptor::new(&id, name, kind);
        descriptor.created_at = Some(Utc::now());
        state.resources.insert(id.clone(), descriptor);
        id
    }

    /// Delete a resource behind the reconciler's back
    pub fn remove_resource(&self, id: &str) -> bool {
        lock(&self.state).resources.remove(id).is_some()
    }

    /// Live resources of `kind`
    pub fn live(&self, kind: ResourceKind) -> Vec<Descriptor> {
        lock(&self.state)
            .resources
            .values()
            .filter(|d| d.kind == kind)
            .cloned()
            .collect()
    }

    /// Number of `op` calls made against `kind`
    pub fn calls(&self, kind: ResourceKind, op: Op) -> usize {
        lock(&self.state)
            .calls
            .get(&(kind, op))
            .copied()
            .unwrap_or(0)
    }

    /// Number of `op` calls across all kinds
    pub fn total_calls(&self, op: Op) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|((_, o), _)| *o == op)
            .map(|(_, n)| n)
            .sum()
    }

    /// Make every `op` against `kind` fail
    pub fn fail_on(&self, kind: ResourceKind, op: Op) {
        lock(&self.state).failures.insert((kind, op));
    }

    pub fn clear_failures(&self) {
        lock(&self.state).failures.clear();
    }

    pub fn with_group_kinds(mut self, kinds: Vec<ResourceKind>) -> Self {
        self.group_kinds = kinds;
        self
    }
}

#[async_trait]
impl CloudDriver for MemoryCloud {
    fn cloud(&self) -> Cloud {
        self.cloud
    }

    fn display_name(&self) -> &str {
        "In-memory"
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        Ok(AuthStatus::ok(format!("memory ({})", self.cloud)))
    }

    fn zones(&self, region: &str) -> Vec<String> {
        vec![format!("{}a", region), format!("{}b", region)]
    }

    fn network_plan(&self, request: &NetworkRequest) -> Result<NetworkPlan> {
        let uid = &request.project_uid;
        let name = |kind: ResourceKind| resource_name(uid, kind.suffix());
        let vpc = || Dependency::on_key(ResourceKind::Network.state_key());

        let mut slots = vec![ResourceSlot::new(
            ResourceSpec::new(ResourceKind::Network, name(ResourceKind::Network))
                .with("cidr", request.cidr.as_str())
                .with("region", request.region.as_str()),
        )];

        for (index, zone) in request.zones.iter().enumerate() {
            let cidr = zone_cidr(&request.cidr, index).ok_or_else(|| {
                CloudError::InvalidConfig(format!("cannot split {} into zones", request.cidr))
            })?;
            slots.push(
                ResourceSlot::new(
                    ResourceSpec::new(
                        ResourceKind::Subnet,
                        format!("{}-{}", name(ResourceKind::Subnet), zone),
                    )
                    .with("zone", zone.as_str())
                    .with("cidr", cidr.as_str()),
                )
                .stored_at(ReferenceSlot::entry("zone", zone.as_str(), vec![json!(cidr)]))
                .depends_on(vpc()),
            );
        }

        for kind in [
            ResourceKind::SecurityGroup,
            ResourceKind::SshKey,
            ResourceKind::Gateway,
            ResourceKind::RouteTable,
            ResourceKind::DnsZone,
        ] {
            let mut slot = ResourceSlot::new(ResourceSpec::new(kind, name(kind)));
            if kind != ResourceKind::SshKey {
                slot = slot.depends_on(vpc());
            }
            if kind == ResourceKind::RouteTable {
                slot = slot.depends_on(Dependency::on_key(ResourceKind::Gateway.state_key()));
            }
            slots.push(slot);
        }

        Ok(NetworkPlan::new(slots))
    }

    fn adapter(&self, kind: ResourceKind) -> Option<&dyn ResourceAdapter> {
        self.adapters
            .iter()
            .find(|a| a.kind == kind)
            .map(|a| a as &dyn ResourceAdapter)
    }

    fn group_kinds(&self) -> &[ResourceKind] {
        &self.group_kinds
    }
}

/// Adapter over one kind of in-memory resource
#[derive(Clone)]
pub struct MemoryAdapter {
    kind: ResourceKind,
    state: Shared,
}

#[async_trait]
impl ResourceAdapter for MemoryAdapter {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<Descriptor>> {
        let matcher = filter.matcher()?;
        let mut state = lock(&self.state);
        state.record(self.kind, Op::List)?;
        let found: Vec<Descriptor> = state
            .resources
            .values()
            .filter(|d| d.kind == self.kind && matcher.matches(d))
            .cloned()
            .collect();
        if found.is_empty() {
            return Err(CloudError::EmptyResult(filter.describe()));
        }
        Ok(found)
    }

    async fn details(&self, id: &str) -> Result<Option<Descriptor>> {
        let mut state = lock(&self.state);
        state.record(self.kind, Op::Details)?;
        Ok(state
            .resources
            .get(id)
            .filter(|d| d.kind == self.kind)
            .cloned())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<String>> {
        let mut state = lock(&self.state);
        state.record(self.kind, Op::GetByName)?;
        Ok(state
            .resources
            .values()
            .find(|d| d.kind == self.kind && d.name == name)
            .map(|d| d.id.clone()))
    }

    async fn create(&self, spec: &ResourceSpec) -> Result<String> {
        let mut state = lock(&self.state);
        state.record(self.kind, Op::Create)?;
        let id = state.allocate(self.kind);
        let mut descriptor = Descriptor::new(&id, &spec.name, self.kind);
        descriptor.attributes = spec.config.clone();
        if self.kind == ResourceKind::Instance {
            let host = state.next_id % 250 + 2;
            descriptor
                .attributes
                .insert("private_ip".into(), Value::from(format!("10.11.1.{}", host)));
        }
        descriptor.created_at = Some(Utc::now());
        state.resources.insert(id.clone(), descriptor);
        Ok(id)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.record(self.kind, Op::Delete)?;
        match state.resources.remove(id) {
            Some(_) => Ok(()),
            None => Err(CloudError::NotFound(id.to_string())),
        }
    }
}
