//! Project / service / node group hierarchy
//!
//! ```text
//! <base>/<project>/
//!   metadata.db          metadata: project_uid, project, services[(service, cloud, region)]
//!   network-<region>.db  network:<cloud>: vpc_id, zone[...], services[...], ...
//!   <service>.db         <service>:0001.. node groups, <service>-node-GG-NN nodes
//! ```

use crate::error::{CoreError, Result};
use crate::node::NodeRecord;
use couchformation_cloud::Cloud;
use couchformation_store::Store;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

pub const METADATA_DOCUMENT: &str = "metadata";
pub const SERVICES_LIST: &str = "services";

/// File locations of one project
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    name: String,
    root: PathBuf,
}

impl ProjectPaths {
    pub fn new(base: &Path, name: &str) -> Self {
        Self {
            name: name.to_string(),
            root: base.join(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exists(&self) -> bool {
        self.root.join("metadata.db").exists()
    }

    pub fn metadata_db(&self) -> PathBuf {
        self.root.join("metadata.db")
    }

    pub fn network_db(&self, region: &str) -> PathBuf {
        self.root.join(format!("network-{}.db", region))
    }

    pub fn service_db(&self, service: &str) -> PathBuf {
        self.root.join(format!("{}.db", service))
    }
}

/// Network document name for `cloud`
pub fn network_document(cloud: Cloud) -> String {
    format!("network:{}", cloud)
}

/// Document name of the `group`th node group of `service`
pub fn group_document(service: &str, group: u32) -> String {
    format!("{}:{:04}", service, group)
}

/// Document name of one node
pub fn node_document(service: &str, group: u32, number: u32) -> String {
    format!("{}-node-{:02}-{:02}", service, group, number)
}

/// A registered service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    pub cloud: Cloud,
    pub region: String,
}

/// Settings of one node group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeGroupSpec {
    pub cloud: Cloud,
    pub region: String,
    pub machine_type: String,
    pub quantity: u32,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Image override for container and VM clouds
    #[serde(default)]
    pub image: Option<String>,

    /// Data volume size in GiB
    #[serde(default)]
    pub volume_size: Option<u32>,
}

/// A numbered node group
#[derive(Debug, Clone, PartialEq)]
pub struct NodeGroup {
    pub number: u32,
    pub spec: NodeGroupSpec,
}

/// An open project
pub struct Project {
    paths: ProjectPaths,
    uid: String,
}

impl Project {
    /// Open an existing project
    pub fn open(paths: ProjectPaths) -> Result<Self> {
        if !paths.exists() {
            return Err(CoreError::ProjectNotFound(paths.name().to_string()));
        }
        let store = Store::open(paths.metadata_db(), METADATA_DOCUMENT)?;
        let uid = match store.get_str("project_uid")? {
            Some(uid) => uid,
            None => Self::init_metadata(&store, paths.name())?,
        };
        Ok(Self { paths, uid })
    }

    /// Open a project, creating its directory and metadata if needed
    pub fn open_or_create(paths: ProjectPaths) -> Result<Self> {
        if !paths.exists() {
            std::fs::create_dir_all(paths.root())?;
            let store = Store::open(paths.metadata_db(), METADATA_DOCUMENT)?;
            let uid = Self::init_metadata(&store, paths.name())?;
            tracing::info!("Created project {} ({})", paths.name(), uid);
        }
        Self::open(paths)
    }

    fn init_metadata(store: &Store, name: &str) -> Result<String> {
        let uid = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        store.set("project", name)?;
        store.set("project_uid", &uid)?;
        Ok(uid)
    }

    pub fn name(&self) -> &str {
        self.paths.name()
    }

    /// Short id embedded in every generated resource name
    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn paths(&self) -> &ProjectPaths {
        &self.paths
    }

    pub fn metadata(&self) -> Result<Store> {
        Ok(Store::open(self.paths.metadata_db(), METADATA_DOCUMENT)?)
    }

    /// Store of `service`, opened on the document `document`
    pub fn service_store(&self, service: &str, document: &str) -> Result<Store> {
        Ok(Store::open(self.paths.service_db(service), document)?)
    }

    /// Registered services in creation order
    pub fn services(&self) -> Result<Vec<ServiceEntry>> {
        let store = self.metadata()?;
        store
            .list_get(SERVICES_LIST)?
            .into_iter()
            .map(|entry| {
                let field = |i: usize| {
                    entry
                        .get(i)
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .ok_or_else(|| {
                            CoreError::InvalidArgument(format!("malformed service entry {:?}", entry))
                        })
                };
                Ok(ServiceEntry {
                    name: field(0)?,
                    cloud: field(1)?.parse()?,
                    region: field(2)?,
                })
            })
            .collect()
    }

    pub fn service(&self, name: &str) -> Result<ServiceEntry> {
        self.services()?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| CoreError::ServiceNotFound {
                project: self.name().to_string(),
                service: name.to_string(),
            })
    }

    /// Register `service` if needed and add a node group to it.
    ///
    /// Returns the new group's number.
    ///
    /// The group is checked before anything is written, so a rejected
    /// request leaves no registration behind.
    pub fn create_service(&self, service: &str, spec: NodeGroupSpec) -> Result<u32> {
        validate_service_name(service)?;
        if let Some(entry) = self.services()?.into_iter().find(|s| s.name == service) {
            check_placement(&entry, &spec)?;
        }
        check_quantity(&spec)?;

        let store = self.metadata()?;
        let added = store.list_add(
            SERVICES_LIST,
            [
                Value::from(service),
                Value::from(spec.cloud.as_str()),
                Value::from(spec.region.as_str()),
            ],
        )?;
        if added {
            tracing::info!("Registered service {} ({}/{})", service, spec.cloud, spec.region);
        }
        self.add_group(service, spec)
    }

    /// Append a node group to an existing service
    pub fn add_group(&self, service: &str, spec: NodeGroupSpec) -> Result<u32> {
        let entry = self.service(service)?;
        check_placement(&entry, &spec)?;
        check_quantity(&spec)?;

        let number = self
            .node_groups(service)?
            .last()
            .map(|g| g.number + 1)
            .unwrap_or(1);
        let store = self.service_store(service, &group_document(service, number))?;
        write_fields(&store, &spec)?;
        store.set("group", &number)?;
        tracing::info!("Added node group {} to {}", number, service);
        Ok(number)
    }

    /// Node groups of `service` in order
    pub fn node_groups(&self, service: &str) -> Result<Vec<NodeGroup>> {
        let path = self.paths.service_db(service);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut store = Store::open(path, &group_document(service, 1))?;
        let pattern = Regex::new(&format!(r"^{}:(\d{{4}})$", regex::escape(service)))
            .map_err(|e| CoreError::InvalidArgument(e.to_string()))?;

        let mut groups = Vec::new();
        for document in store.documents()? {
            let Some(number) = pattern
                .captures(&document)
                .and_then(|c| c[1].parse::<u32>().ok())
            else {
                continue;
            };
            store.document(&document);
            if let Some(spec) = read_fields::<NodeGroupSpec>(&store)? {
                groups.push(NodeGroup { number, spec });
            }
        }
        groups.sort_by_key(|g| g.number);
        Ok(groups)
    }

    /// Every (group, number) slot the node groups of `service` call for
    pub fn node_slots(&self, service: &str) -> Result<Vec<(NodeGroup, u32)>> {
        Ok(self
            .node_groups(service)?
            .into_iter()
            .flat_map(|g| (1..=g.spec.quantity).map(move |n| (g.clone(), n)))
            .collect())
    }

    /// Node documents of `service`, ordered by group and number
    pub fn nodes(&self, service: &str) -> Result<Vec<NodeRecord>> {
        let path = self.paths.service_db(service);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let prefix = format!("{}-node-", service);
        let mut store = Store::open(path, &group_document(service, 1))?;

        let mut nodes = Vec::new();
        for document in store.documents()? {
            if !document.starts_with(&prefix) {
                continue;
            }
            store.document(&document);
            if let Some(record) = read_fields::<NodeRecord>(&store)? {
                nodes.push(record);
            }
        }
        nodes.sort_by_key(|n| (n.group, n.number));
        Ok(nodes)
    }

    /// Forget `service`: drop its store file and registry entry.
    ///
    /// Refused while any node still has a live instance recorded.
    pub fn remove_service(&self, service: &str) -> Result<()> {
        self.service(service)?;
        let deployed = self
            .nodes(service)?
            .iter()
            .filter(|n| n.instance_id.is_some())
            .count();
        if deployed > 0 {
            return Err(CoreError::ServiceDeployed {
                service: service.to_string(),
                nodes: deployed,
            });
        }

        remove_store_file(&self.paths.service_db(service))?;
        self.metadata()?.list_remove(SERVICES_LIST, service)?;
        tracing::info!("Removed service {} from {}", service, self.name());
        Ok(())
    }
}

const SERVICE_NAME: &str = r"^[a-z][a-z0-9-]{0,31}$";

/// Service names that would map onto the project's own store files
const RESERVED_NAME: &str = "metadata";
const RESERVED_PREFIX: &str = "network-";

fn validate_service_name(name: &str) -> Result<()> {
    let re = Regex::new(SERVICE_NAME).map_err(|e| CoreError::InvalidArgument(e.to_string()))?;
    if !re.is_match(name) {
        return Err(CoreError::InvalidArgument(format!(
            "service name '{}' must be lowercase letters, digits and '-'",
            name
        )));
    }
    if name == RESERVED_NAME || name.starts_with(RESERVED_PREFIX) {
        return Err(CoreError::InvalidArgument(format!(
            "service name '{}' is reserved for project state",
            name
        )));
    }
    Ok(())
}

fn check_placement(entry: &ServiceEntry, spec: &NodeGroupSpec) -> Result<()> {
    if entry.cloud != spec.cloud || entry.region != spec.region {
        return Err(CoreError::ServiceMismatch {
            service: entry.name.clone(),
            cloud: entry.cloud.to_string(),
            region: entry.region.clone(),
            requested: format!("{}/{}", spec.cloud, spec.region),
        });
    }
    Ok(())
}

fn check_quantity(spec: &NodeGroupSpec) -> Result<()> {
    if spec.quantity == 0 {
        return Err(CoreError::InvalidArgument("quantity must be at least 1".into()));
    }
    Ok(())
}

/// Delete a store file with its WAL side files
pub(crate) fn remove_store_file(path: &Path) -> Result<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut file = path.as_os_str().to_owned();
        file.push(suffix);
        let file = PathBuf::from(file);
        if file.exists() {
            std::fs::remove_file(&file)?;
        }
    }
    Ok(())
}

/// Write each field of `value` as its own key in the active document
pub(crate) fn write_fields<T: Serialize>(store: &Store, value: &T) -> Result<()> {
    if let Value::Object(fields) = serde_json::to_value(value)? {
        for (key, field) in fields {
            if field.is_null() {
                store.delete(&key)?;
            } else {
                store.set(&key, &field)?;
            }
        }
    }
    Ok(())
}

/// Read the active document back into `T`; `None` when it is empty
pub(crate) fn read_fields<T: DeserializeOwned>(store: &Store) -> Result<Option<T>> {
    let items = store.items()?;
    if items.is_empty() {
        return Ok(None);
    }
    let object: Map<String, Value> = items.into_iter().collect();
    Ok(Some(serde_json::from_value(Value::Object(object))?))
}
