//! Generic resource reconciliation
//!
//! For each slot of a plan the reconciler compares what the document
//! records with what the provider reports and applies one transition:
//!
//! ```text
//!   Unknown ──create──────────────▶ Recorded
//!   Unknown ──orphan found──adopt─▶ Recorded
//!   Recorded ──details ok─────────▶ Verified
//!   Recorded ──details not found──▶ Stale ──evict──▶ Unknown
//! ```
//!
//! Every document write commits on its own, so an aborted pass leaves the
//! progress made so far and the next pass resumes from there.

use crate::action::{ReconcileReport, ResourceState, Transition, TransitionType};
use crate::error::{CloudError, Result};
use crate::plan::{Discovery, NetworkPlan, ReferenceSlot, ResourceSlot};
use crate::provider::{CloudDriver, ResourceAdapter};
use crate::resource::{Descriptor, ListFilter, ResourceKind, ResourceSpec, group_key_pattern};
use couchformation_store::Store;

/// A slot's reference resolved against the provider
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub state: ResourceState,

    /// Recorded id (Verified/Stale) or discovered id (Orphaned)
    pub id: Option<String>,
}

/// Converges one document against one cloud driver
pub struct Reconciler<'a> {
    store: &'a Store,
    driver: &'a dyn CloudDriver,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a Store, driver: &'a dyn CloudDriver) -> Self {
        Self { store, driver }
    }

    /// Determine the current state of `slot` without changing anything
    pub async fn observe(&self, slot: &ResourceSlot) -> Result<Observation> {
        let adapter = self.driver.require(slot.kind())?;

        if let Some(id) = slot.reference.read(self.store)? {
            let state = match details(adapter, &id).await? {
                Some(_) => ResourceState::Verified,
                None => ResourceState::Stale,
            };
            return Ok(Observation { state, id: Some(id) });
        }

        match self.find_orphan(slot, adapter).await? {
            Some(id) => Ok(Observation {
                state: ResourceState::Orphaned,
                id: Some(id),
            }),
            None => Ok(Observation {
                state: ResourceState::Unknown,
                id: None,
            }),
        }
    }

    /// Apply exactly one transition to `slot`
    pub async fn step(&self, slot: &ResourceSlot) -> Result<Transition> {
        let adapter = self.driver.require(slot.kind())?;
        let observation = self.observe(slot).await?;
        let transition = |t: TransitionType, id: String| {
            Transition::new(t, slot.kind(), slot.name(), slot.reference.to_string(), Some(id))
        };

        match (observation.state, observation.id) {
            (ResourceState::Verified, Some(id)) => {
                tracing::debug!("{} {} verified ({})", slot.kind(), slot.name(), id);
                Ok(transition(TransitionType::Verified, id))
            }
            (ResourceState::Stale, Some(id)) => {
                slot.reference.evict(self.store)?;
                tracing::warn!(
                    "{} {} ({}) no longer exists; removed stale reference {}",
                    slot.kind(),
                    slot.name(),
                    id,
                    slot.reference
                );
                Ok(transition(TransitionType::Evicted, id))
            }
            (ResourceState::Orphaned, Some(id)) => {
                slot.reference.record(self.store, &id)?;
                tracing::info!("Imported existing {} {} ({})", slot.kind(), slot.name(), id);
                Ok(transition(TransitionType::Adopted, id))
            }
            _ => {
                let spec = self.resolve_spec(slot)?;
                let id = adapter
                    .create(&spec)
                    .await
                    .map_err(|e| CloudError::fatal(slot.kind(), "create", slot.name(), e))?;
                slot.reference.record(self.store, &id)?;
                tracing::info!("Created {} {} ({})", slot.kind(), slot.name(), id);
                Ok(transition(TransitionType::Created, id))
            }
        }
    }

    /// Step `slot` until it holds a live, recorded resource.
    ///
    /// A stale reference is evicted and replaced within the same call.
    pub async fn converge(&self, slot: &ResourceSlot) -> Result<Vec<Transition>> {
        let mut transitions = Vec::new();
        loop {
            let transition = self.step(slot).await?;
            let done = transition.is_live();
            transitions.push(transition);
            if done {
                return Ok(transitions);
            }
        }
    }

    /// Converge every slot of `plan` in dependency order
    pub async fn converge_plan(&self, plan: &NetworkPlan) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::new();
        for slot in plan.iter() {
            for transition in self.converge(slot).await? {
                report.push(transition);
            }
        }
        Ok(report)
    }

    /// Delete the resource recorded for `slot` and drop the reference.
    ///
    /// A resource that is already gone still has its reference removed.
    pub async fn destroy(&self, slot: &ResourceSlot) -> Result<Transition> {
        self.destroy_reference(slot.kind(), slot.name(), &slot.reference)
            .await
    }

    /// Tear `plan` down in reverse dependency order
    pub async fn destroy_plan(&self, plan: &NetworkPlan) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::new();
        for slot in plan.iter_rev() {
            report.push(self.destroy(slot).await?);
        }
        Ok(report)
    }

    /// Converge the per-group resources the driver declares for one group
    pub async fn converge_group(
        &self,
        project_uid: &str,
        service: &str,
        group: u32,
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::new();
        for kind in self.driver.group_kinds() {
            let slot = self.driver.group_slot(project_uid, service, group, *kind);
            for transition in self.converge(&slot).await? {
                report.push(transition);
            }
        }
        Ok(report)
    }

    /// Destroy every per-group resource of `kind` recorded for `service`
    pub async fn prune_groups(&self, service: &str, kind: ResourceKind) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::new();
        for key in self.store.key_match(&group_key_pattern(service, kind))? {
            let reference = ReferenceSlot::key(key.clone());
            report.push(self.destroy_reference(kind, &key, &reference).await?);
        }
        Ok(report)
    }

    async fn destroy_reference(
        &self,
        kind: ResourceKind,
        name: &str,
        reference: &ReferenceSlot,
    ) -> Result<Transition> {
        let Some(id) = reference.read(self.store)? else {
            return Ok(Transition::new(
                TransitionType::Absent,
                kind,
                name,
                reference.to_string(),
                None,
            ));
        };

        let adapter = self.driver.require(kind)?;
        match adapter.delete(&id).await {
            Ok(()) => tracing::info!("Deleted {} {} ({})", kind, name, id),
            Err(e) if e.is_not_found() => {
                tracing::info!("{} {} ({}) already gone", kind, name, id)
            }
            Err(e) => return Err(CloudError::fatal(kind, "delete", name, e)),
        }
        reference.evict(self.store)?;

        Ok(Transition::new(
            TransitionType::Deleted,
            kind,
            name,
            reference.to_string(),
            Some(id),
        ))
    }

    async fn find_orphan(
        &self,
        slot: &ResourceSlot,
        adapter: &dyn ResourceAdapter,
    ) -> Result<Option<String>> {
        match &slot.discovery {
            Discovery::ByName => match adapter.get_by_name(slot.name()).await {
                Ok(found) => Ok(found),
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(e),
            },
            Discovery::ByPattern(pattern) => {
                let candidates = match adapter.list(&ListFilter::name_matching(pattern)).await {
                    Ok(found) => found,
                    Err(e) if e.is_not_found() => Vec::new(),
                    Err(e) => return Err(e),
                };
                for candidate in candidates {
                    if !self.is_tracked(&candidate)? {
                        return Ok(Some(candidate.id));
                    }
                }
                Ok(None)
            }
        }
    }

    /// Whether `descriptor`'s id already appears anywhere in the document
    fn is_tracked(&self, descriptor: &Descriptor) -> Result<bool> {
        let pattern = format!(r#"(^|"){}("|$)"#, regex::escape(&descriptor.id));
        Ok(!self.store.value_match(&pattern)?.is_empty())
    }

    fn resolve_spec(&self, slot: &ResourceSlot) -> Result<ResourceSpec> {
        let mut spec = slot.spec.clone();
        for dependency in &slot.depends_on {
            let id = dependency.reference.read(self.store)?.ok_or_else(|| {
                CloudError::MissingDependency {
                    kind: slot.kind(),
                    param: dependency.param.clone(),
                }
            })?;
            spec.set(dependency.param.clone(), id);
        }
        Ok(spec)
    }
}

async fn details(adapter: &dyn ResourceAdapter, id: &str) -> Result<Option<Descriptor>> {
    match adapter.details(id).await {
        Ok(found) => Ok(found),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryCloud, Op};
    use crate::plan::{Dependency, NetworkRequest};
    use crate::resource::{Cloud, ResourceSpec, group_key, group_resource_name};
    use couchformation_store::DEFAULT_DOCUMENT;

    fn request() -> NetworkRequest {
        NetworkRequest {
            project: "demo".into(),
            project_uid: "a1b2c3d4".into(),
            cloud: Cloud::Aws,
            region: "us-east-1".into(),
            cidr: "10.11.0.0/16".into(),
            zones: vec!["us-east-1a".into(), "us-east-1b".into()],
        }
    }

    fn vpc_slot() -> ResourceSlot {
        ResourceSlot::new(ResourceSpec::new(ResourceKind::Network, "cf-a1b2c3d4-vpc"))
    }

    #[tokio::test]
    async fn test_create_then_idempotent() {
        let cloud = MemoryCloud::new(Cloud::Aws);
        let store = Store::temporary("network:aws").unwrap();
        let plan = cloud.network_plan(&request()).unwrap();
        let reconciler = Reconciler::new(&store, &cloud);

        let first = reconciler.converge_plan(&plan).await.unwrap();
        assert_eq!(first.summary().created, plan.len());
        let state_after_first = store.items().unwrap();
        let creates = cloud.total_calls(Op::Create);

        let second = reconciler.converge_plan(&plan).await.unwrap();
        assert_eq!(second.summary().verified, plan.len());
        assert!(!second.has_changes());
        assert_eq!(cloud.total_calls(Op::Create), creates);
        assert_eq!(store.items().unwrap(), state_after_first);
    }

    #[tokio::test]
    async fn test_orphan_adopted_without_create() {
        let cloud = MemoryCloud::new(Cloud::Aws);
        let store = Store::temporary("network:aws").unwrap();
        let existing = cloud.insert(ResourceKind::Network, "cf-a1b2c3d4-vpc");

        let reconciler = Reconciler::new(&store, &cloud);
        let transition = reconciler.step(&vpc_slot()).await.unwrap();

        assert_eq!(transition.transition_type, TransitionType::Adopted);
        assert_eq!(store.get_str("vpc_id").unwrap(), Some(existing));
        assert_eq!(cloud.calls(ResourceKind::Network, Op::Create), 0);
    }

    #[tokio::test]
    async fn test_observe_resolves_recorded_reference() {
        let cloud = MemoryCloud::new(Cloud::Aws);
        let store = Store::temporary("network:aws").unwrap();
        let reconciler = Reconciler::new(&store, &cloud);

        let created = reconciler.step(&vpc_slot()).await.unwrap();
        let id = created.id.clone().unwrap();

        let live = reconciler.observe(&vpc_slot()).await.unwrap();
        assert_eq!(live.state, ResourceState::Verified);
        assert_eq!(live.id.as_deref(), Some(id.as_str()));

        cloud.remove_resource(&id);
        let gone = reconciler.observe(&vpc_slot()).await.unwrap();
        assert_eq!(gone.state, ResourceState::Stale);
        assert_eq!(gone.id.as_deref(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn test_stale_evicted_then_recreated() {
        let cloud = MemoryCloud::new(Cloud::Aws);
        let store = Store::temporary("network:aws").unwrap();
        let reconciler = Reconciler::new(&store, &cloud);

        let created = reconciler.step(&vpc_slot()).await.unwrap();
        let old_id = created.id.clone().unwrap();
        cloud.remove_resource(&old_id);

        let evicted = reconciler.step(&vpc_slot()).await.unwrap();
        assert_eq!(evicted.transition_type, TransitionType::Evicted);
        assert_eq!(store.get("vpc_id").unwrap(), None);

        let recreated = reconciler.step(&vpc_slot()).await.unwrap();
        assert_eq!(recreated.transition_type, TransitionType::Created);
        assert_ne!(recreated.id.as_deref(), Some(old_id.as_str()));
        assert_eq!(store.get_str("vpc_id").unwrap(), recreated.id);
    }

    #[tokio::test]
    async fn test_converge_replaces_stale_in_one_call() {
        let cloud = MemoryCloud::new(Cloud::Aws);
        let store = Store::temporary("network:aws").unwrap();
        store.set("vpc_id", "vpc-gone").unwrap();

        let reconciler = Reconciler::new(&store, &cloud);
        let transitions = reconciler.converge(&vpc_slot()).await.unwrap();
        let types: Vec<_> = transitions.iter().map(|t| t.transition_type).collect();
        assert_eq!(types, vec![TransitionType::Evicted, TransitionType::Created]);
    }

    #[tokio::test]
    async fn test_create_failure_is_fatal_and_keeps_progress() {
        let cloud = MemoryCloud::new(Cloud::Aws);
        cloud.fail_on(ResourceKind::SecurityGroup, Op::Create);
        let store = Store::temporary("network:aws").unwrap();
        let plan = cloud.network_plan(&request()).unwrap();

        let reconciler = Reconciler::new(&store, &cloud);
        let err = reconciler.converge_plan(&plan).await.unwrap_err();
        assert!(matches!(
            err,
            CloudError::Fatal {
                kind: ResourceKind::SecurityGroup,
                operation: "create",
                ..
            }
        ));
        // the network and subnets created before the failure stay recorded
        assert!(store.exists("vpc_id").unwrap());
        assert_eq!(store.list_get("zone").unwrap().len(), 2);

        cloud.clear_failures();
        let resumed = reconciler.converge_plan(&plan).await.unwrap();
        assert_eq!(resumed.summary().verified, 3);
        assert_eq!(resumed.summary().created, plan.len() - 3);
    }

    #[tokio::test]
    async fn test_missing_dependency() {
        let cloud = MemoryCloud::new(Cloud::Aws);
        let store = Store::temporary(DEFAULT_DOCUMENT).unwrap();
        let slot = ResourceSlot::new(ResourceSpec::new(ResourceKind::SecurityGroup, "cf-x-sg"))
            .depends_on(Dependency::on_key("vpc_id"));

        let err = Reconciler::new(&store, &cloud).step(&slot).await.unwrap_err();
        assert!(matches!(err, CloudError::MissingDependency { .. }));
        assert_eq!(cloud.total_calls(Op::Create), 0);
    }

    #[tokio::test]
    async fn test_destroy_reverse_order_and_idempotent() {
        let cloud = MemoryCloud::new(Cloud::Aws);
        let store = Store::temporary("network:aws").unwrap();
        let plan = cloud.network_plan(&request()).unwrap();
        let reconciler = Reconciler::new(&store, &cloud);
        reconciler.converge_plan(&plan).await.unwrap();

        // something removed out of band is still dropped from the document
        let dns = store.get_str("dns_zone_id").unwrap().unwrap();
        cloud.remove_resource(&dns);

        let report = reconciler.destroy_plan(&plan).await.unwrap();
        assert_eq!(report.summary().deleted, plan.len());
        assert_eq!(report.transitions.first().unwrap().kind, ResourceKind::DnsZone);
        assert_eq!(report.transitions.last().unwrap().kind, ResourceKind::Network);
        assert!(store.keys().unwrap().iter().all(|k| {
            let v = store.get(k).unwrap().unwrap();
            v.as_array().is_some_and(|a| a.is_empty())
        }));
        assert!(cloud.live(ResourceKind::Network).is_empty());

        let again = reconciler.destroy_plan(&plan).await.unwrap();
        assert!(again.transitions.iter().all(|t| t.transition_type == TransitionType::Absent));
    }

    #[tokio::test]
    async fn test_delete_failure_is_fatal() {
        let cloud = MemoryCloud::new(Cloud::Aws);
        let store = Store::temporary("network:aws").unwrap();
        let reconciler = Reconciler::new(&store, &cloud);
        reconciler.step(&vpc_slot()).await.unwrap();

        cloud.fail_on(ResourceKind::Network, Op::Delete);
        let err = reconciler.destroy(&vpc_slot()).await.unwrap_err();
        assert!(matches!(err, CloudError::Fatal { operation: "delete", .. }));
        assert!(store.exists("vpc_id").unwrap());
    }

    #[tokio::test]
    async fn test_group_orphan_skips_tracked_ids() {
        let cloud = MemoryCloud::new(Cloud::Aws);
        let store = Store::temporary("network:aws").unwrap();
        let reconciler = Reconciler::new(&store, &cloud);
        reconciler.step(&vpc_slot()).await.unwrap();

        let name = group_resource_name("a1b2c3d4", "cbs", 1, ResourceKind::SecurityGroup);
        let tracked = cloud.insert(ResourceKind::SecurityGroup, &name);
        let untracked = cloud.insert(ResourceKind::SecurityGroup, &name);
        store.set("sgw_group_1_sg_id", &tracked).unwrap();

        let slot = cloud.group_slot("a1b2c3d4", "cbs", 1, ResourceKind::SecurityGroup);
        let transition = reconciler.step(&slot).await.unwrap();

        assert_eq!(transition.transition_type, TransitionType::Adopted);
        assert_eq!(transition.id.as_deref(), Some(untracked.as_str()));
        assert_eq!(
            store.get_str(&group_key("cbs", 1, ResourceKind::SecurityGroup)).unwrap(),
            Some(untracked)
        );
        assert_eq!(cloud.calls(ResourceKind::SecurityGroup, Op::Create), 0);
    }

    #[tokio::test]
    async fn test_converge_group_is_idempotent() {
        let cloud = MemoryCloud::new(Cloud::Aws);
        let store = Store::temporary("network:aws").unwrap();
        let reconciler = Reconciler::new(&store, &cloud);
        reconciler.step(&vpc_slot()).await.unwrap();

        let first = reconciler.converge_group("a1b2c3d4", "cbs", 1).await.unwrap();
        assert_eq!(first.summary().created, 1);
        let second = reconciler.converge_group("a1b2c3d4", "cbs", 1).await.unwrap();
        assert_eq!(second.summary().verified, 1);
        assert_eq!(cloud.calls(ResourceKind::SecurityGroup, Op::Create), 1);
        assert!(store.exists("cbs_group_1_sg_id").unwrap());
    }

    #[tokio::test]
    async fn test_prune_groups() {
        let cloud = MemoryCloud::new(Cloud::Aws);
        let store = Store::temporary("network:aws").unwrap();
        let reconciler = Reconciler::new(&store, &cloud);
        reconciler.step(&vpc_slot()).await.unwrap();

        for group in 1..=2 {
            let slot = cloud.group_slot("a1b2c3d4", "cbs", group, ResourceKind::SecurityGroup);
            reconciler.converge(&slot).await.unwrap();
        }
        let other = cloud.group_slot("a1b2c3d4", "sgw", 1, ResourceKind::SecurityGroup);
        reconciler.converge(&other).await.unwrap();

        let report = reconciler
            .prune_groups("cbs", ResourceKind::SecurityGroup)
            .await
            .unwrap();
        assert_eq!(report.summary().deleted, 2);
        assert!(store.key_match("^cbs_group_").unwrap().is_empty());
        assert!(store.exists("sgw_group_1_sg_id").unwrap());
        assert_eq!(cloud.live(ResourceKind::SecurityGroup).len(), 1);
    }
}
