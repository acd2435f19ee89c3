//! Service lifecycle against the in-memory cloud

use couchformation_cloud::{Cloud, MemoryCloud, NetworkGuard, Op, ResourceKind};
use couchformation_config::Settings;
use couchformation_core::network::network_store;
use couchformation_core::{
    CoreError, DispatchError, Executor, NetworkTeardown, NodeGroupSpec, Orchestrator, Project,
    RunContext, StaticDrivers,
};
use couchformation_store::text_of;
use std::sync::Arc;

const REGION: &str = "us-east-1";

struct Harness {
    _temp: tempfile::TempDir,
    cloud: MemoryCloud,
    orchestrator: Orchestrator,
}

impl Harness {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let cloud = MemoryCloud::new(Cloud::Aws);
        let ctx = RunContext::new(
            temp.path(),
            Settings::default(),
            Arc::new(StaticDrivers::new().with(Arc::new(cloud.clone()))),
        )
        .with_guard(Arc::new(NetworkGuard::new()));
        let orchestrator = Orchestrator::new(Arc::new(ctx), Executor::InProcess);
        Self {
            _temp: temp,
            cloud,
            orchestrator,
        }
    }

    fn project(&self) -> Project {
        Project::open(self.orchestrator.context().project("demo")).unwrap()
    }

    fn network_services(&self) -> Vec<String> {
        network_store(&self.project(), Cloud::Aws, REGION)
            .unwrap()
            .list_get("services")
            .unwrap()
            .iter()
            .map(|entry| text_of(&entry[0]))
            .collect()
    }
}

fn spec(quantity: u32) -> NodeGroupSpec {
    NodeGroupSpec {
        cloud: Cloud::Aws,
        region: REGION.into(),
        machine_type: "8x32".into(),
        quantity,
        tags: vec!["data".into()],
        image: None,
        volume_size: Some(256),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_deploy_then_destroy() {
    let h = Harness::new();
    h.orchestrator.create_service("demo", "cbs", spec(3)).unwrap();

    let report = h.orchestrator.deploy_service("demo", "cbs").await.unwrap();
    assert_eq!(report.nodes.len(), 3);
    let numbers: Vec<_> = report.nodes.iter().map(|n| n.number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert!(report.nodes.iter().all(|n| n.instance_id.is_some()));
    assert!(report.network.vpc_id.is_some());
    assert_eq!(h.network_services(), vec!["cbs".to_string()]);
    assert_eq!(h.cloud.live(ResourceKind::Instance).len(), 3);

    // nodes are spread over the zones
    assert_eq!(report.nodes[0].zone.as_deref(), Some("us-east-1a"));
    assert_eq!(report.nodes[1].zone.as_deref(), Some("us-east-1b"));

    let destroyed = h.orchestrator.destroy_service("demo", "cbs").await.unwrap();
    assert_eq!(destroyed.nodes.len(), 3);
    assert!(matches!(destroyed.network, NetworkTeardown::Destroyed(_)));

    assert!(h.project().nodes("cbs").unwrap().is_empty());
    let store = network_store(&h.project(), Cloud::Aws, REGION).unwrap();
    assert!(!store.exists("vpc_id").unwrap());
    assert!(store.list_get("zone").unwrap().is_empty());
    assert!(h.cloud.live(ResourceKind::Instance).is_empty());
    assert!(h.cloud.live(ResourceKind::Network).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_redeploy_is_idempotent() {
    let h = Harness::new();
    h.orchestrator.create_service("demo", "cbs", spec(2)).unwrap();
    h.orchestrator.deploy_service("demo", "cbs").await.unwrap();
    let creates = h.cloud.total_calls(Op::Create);

    let again = h.orchestrator.deploy_service("demo", "cbs").await.unwrap();
    assert!(!again.network_report.has_changes());
    assert_eq!(h.cloud.total_calls(Op::Create), creates);
    assert_eq!(h.network_services(), vec!["cbs".to_string()]);

    let listed = h.orchestrator.list_service("demo", "cbs").await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|n| n.private_ip.is_some()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_network_outlives_first_service() {
    let h = Harness::new();
    h.orchestrator.create_service("demo", "cbs", spec(1)).unwrap();
    h.orchestrator.create_service("demo", "sgw", spec(1)).unwrap();
    h.orchestrator.deploy_service("demo", "cbs").await.unwrap();
    h.orchestrator.deploy_service("demo", "sgw").await.unwrap();
    assert_eq!(h.cloud.live(ResourceKind::Network).len(), 1);

    let first = h.orchestrator.destroy_service("demo", "cbs").await.unwrap();
    assert!(matches!(first.network, NetworkTeardown::InUse(ref s) if s == &vec!["sgw".to_string()]));
    assert_eq!(h.cloud.live(ResourceKind::Network).len(), 1);

    let second = h.orchestrator.destroy_service("demo", "sgw").await.unwrap();
    assert!(matches!(second.network, NetworkTeardown::Destroyed(_)));
    assert!(h.cloud.live(ResourceKind::Network).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_node_teardown_keeps_network() {
    let h = Harness::new();
    h.orchestrator.create_service("demo", "cbs", spec(2)).unwrap();
    h.orchestrator.deploy_service("demo", "cbs").await.unwrap();

    h.cloud.fail_on(ResourceKind::Instance, Op::Delete);
    let err = h
        .orchestrator
        .destroy_service("demo", "cbs")
        .await
        .unwrap_err();
    match err {
        CoreError::Dispatch(DispatchError::Aggregate { failures, .. }) => {
            assert_eq!(failures.len(), 2)
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(h.network_services(), vec!["cbs".to_string()]);
    assert_eq!(h.cloud.live(ResourceKind::Network).len(), 1);

    h.cloud.clear_failures();
    h.orchestrator.destroy_service("demo", "cbs").await.unwrap();
    assert!(h.cloud.live(ResourceKind::Network).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remove_requires_destroy() {
    let h = Harness::new();
    h.orchestrator.create_service("demo", "cbs", spec(1)).unwrap();
    h.orchestrator.deploy_service("demo", "cbs").await.unwrap();

    assert!(matches!(
        h.orchestrator.remove_service("demo", "cbs"),
        Err(CoreError::ServiceDeployed { nodes: 1, .. })
    ));
    h.orchestrator.destroy_service("demo", "cbs").await.unwrap();
    h.orchestrator.remove_service("demo", "cbs").unwrap();
    assert!(h.project().services().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_clean_force_drops_stuck_service() {
    let h = Harness::new();
    h.orchestrator.create_service("demo", "cbs", spec(1)).unwrap();
    h.orchestrator.deploy_service("demo", "cbs").await.unwrap();
    let root = h.project().paths().root().to_path_buf();

    h.cloud.fail_on(ResourceKind::Instance, Op::Delete);
    assert!(h.orchestrator.clean_project("demo", false).await.is_err());
    assert!(root.exists());

    let report = h.orchestrator.clean_project("demo", true).await.unwrap();
    assert_eq!(report.forced, vec!["cbs".to_string()]);
    assert!(!root.exists());
}
