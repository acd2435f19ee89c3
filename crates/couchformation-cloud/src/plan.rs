//! Network plans
//!
//! A driver describes the resources it needs for a project network as an
//! ordered list of slots. Each slot says what to create, how to find an
//! existing copy, and where its reference is kept in the network document.

use crate::error::Result;
use crate::resource::{Cloud, ResourceKind, ResourceSpec};
use couchformation_store::{Store, text_of};
use serde_json::Value;

/// Where a resource reference lives inside a document
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceSlot {
    /// A scalar key, e.g. `vpc_id`
    Key(String),

    /// An entry of a list attribute keyed by `member`. The entry is stored
    /// as `[member, fields..., id]`, e.g. `zone -> [zone, cidr, subnet_id]`.
    Entry {
        list: String,
        member: String,
        fields: Vec<Value>,
    },
}

impl ReferenceSlot {
    pub fn key(key: impl Into<String>) -> Self {
        ReferenceSlot::Key(key.into())
    }

    pub fn entry(list: impl Into<String>, member: impl Into<String>, fields: Vec<Value>) -> Self {
        ReferenceSlot::Entry {
            list: list.into(),
            member: member.into(),
            fields,
        }
    }

    /// Read the recorded provider id, if any
    pub fn read(&self, store: &Store) -> Result<Option<String>> {
        match self {
            ReferenceSlot::Key(key) => Ok(store.get_str(key)?),
            ReferenceSlot::Entry { list, member, .. } => Ok(store
                .list_find(list, member.as_str())?
                .and_then(|entry| entry.last().map(text_of))),
        }
    }

    /// Record `id` as the live resource for this slot
    pub fn record(&self, store: &Store, id: &str) -> Result<()> {
        match self {
            ReferenceSlot::Key(key) => store.set(key, id)?,
            ReferenceSlot::Entry {
                list,
                member,
                fields,
            } => {
                store.list_remove(list, member.as_str())?;
                let mut entry = Vec::with_capacity(fields.len() + 2);
                entry.push(Value::from(member.as_str()));
                entry.extend(fields.iter().cloned());
                entry.push(Value::from(id));
                store.list_add(list, entry)?;
            }
        }
        Ok(())
    }

    /// Drop the reference
    pub fn evict(&self, store: &Store) -> Result<()> {
        match self {
            ReferenceSlot::Key(key) => store.delete(key)?,
            ReferenceSlot::Entry { list, member, .. } => {
                store.list_remove(list, member.as_str())?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for ReferenceSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferenceSlot::Key(key) => write!(f, "{}", key),
            ReferenceSlot::Entry { list, member, .. } => write!(f, "{}[{}]", list, member),
        }
    }
}

/// How an untracked live copy of a resource is found
#[derive(Debug, Clone, PartialEq)]
pub enum Discovery {
    /// `get_by_name` with the spec name
    ByName,

    /// `list` filtered by a name pattern, skipping ids already tracked in
    /// the document
    ByPattern(String),
}

/// A parent whose id is copied into the spec before `create`
#[derive(Debug, Clone, PartialEq)]
pub struct Dependency {
    /// Config key the id is written under
    pub param: String,
    pub reference: ReferenceSlot,
}

impl Dependency {
    pub fn new(param: impl Into<String>, reference: ReferenceSlot) -> Self {
        Self {
            param: param.into(),
            reference,
        }
    }

    /// Depend on a scalar key, passed under the same name
    pub fn on_key(key: &str) -> Self {
        Self::new(key, ReferenceSlot::key(key))
    }
}

/// One resource of a plan
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSlot {
    pub spec: ResourceSpec,
    pub reference: ReferenceSlot,
    pub discovery: Discovery,
    pub depends_on: Vec<Dependency>,
}

impl ResourceSlot {
    /// A slot stored under the kind's default key and discovered by name
    pub fn new(spec: ResourceSpec) -> Self {
        let reference = ReferenceSlot::key(spec.kind.state_key());
        Self {
            spec,
            reference,
            discovery: Discovery::ByName,
            depends_on: Vec::new(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.spec.kind
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn stored_at(mut self, reference: ReferenceSlot) -> Self {
        self.reference = reference;
        self
    }

    pub fn discovered_by(mut self, discovery: Discovery) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn depends_on(mut self, dependency: Dependency) -> Self {
        self.depends_on.push(dependency);
        self
    }
}

/// Ordered set of slots making up a project network
#[derive(Debug, Clone, Default)]
pub struct NetworkPlan {
    slots: Vec<ResourceSlot>,
}

impl NetworkPlan {
    /// Build a plan; slots are ordered by dependency tier, keeping the
    /// given order within a tier.
    pub fn new(mut slots: Vec<ResourceSlot>) -> Self {
        slots.sort_by_key(|s| s.kind().tier());
        Self { slots }
    }

    pub fn slots(&self) -> &[ResourceSlot] {
        &self.slots
    }

    /// Slots in creation order
    pub fn iter(&self) -> impl Iterator<Item = &ResourceSlot> {
        self.slots.iter()
    }

    /// Slots in teardown order
    pub fn iter_rev(&self) -> impl Iterator<Item = &ResourceSlot> {
        self.slots.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Input to `CloudDriver::network_plan`
#[derive(Debug, Clone)]
pub struct NetworkRequest {
    pub project: String,
    pub project_uid: String,
    pub cloud: Cloud,
    pub region: String,

    /// Network CIDR, e.g. `10.11.0.0/16`
    pub cidr: String,

    /// Availability zones to place subnets in
    pub zones: Vec<String>,
}

/// Carve the `index`th /24 out of a /16 network CIDR.
///
/// `10.11.0.0/16` with index 0 gives `10.11.1.0/24`.
pub fn zone_cidr(network_cidr: &str, index: usize) -> Option<String> {
    let (addr, prefix) = network_cidr.split_once('/')?;
    if prefix != "16" || index >= 255 {
        return None;
    }
    let octets: Vec<u8> = addr
        .split('.')
        .map(|o| o.parse().ok())
        .collect::<Option<_>>()?;
    if octets.len() != 4 {
        return None;
    }
    Some(format!("{}.{}.{}.0/24", octets[0], octets[1], index + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use couchformation_store::DEFAULT_DOCUMENT;
    use serde_json::json;

    #[test]
    fn test_plan_sorted_by_tier() {
        let plan = NetworkPlan::new(vec![
            ResourceSlot::new(ResourceSpec::new(ResourceKind::DnsZone, "dns")),
            ResourceSlot::new(ResourceSpec::new(ResourceKind::RouteTable, "rt")),
            ResourceSlot::new(ResourceSpec::new(ResourceKind::SecurityGroup, "sg")),
            ResourceSlot::new(ResourceSpec::new(ResourceKind::Network, "vpc")),
        ]);
        let kinds: Vec<_> = plan.iter().map(|s| s.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                ResourceKind::Network,
                ResourceKind::SecurityGroup,
                ResourceKind::RouteTable,
                ResourceKind::DnsZone
            ]
        );
        let rev: Vec<_> = plan.iter_rev().map(|s| s.kind()).collect();
        assert_eq!(rev.first(), Some(&ResourceKind::DnsZone));
        assert_eq!(rev.last(), Some(&ResourceKind::Network));
    }

    #[test]
    fn test_key_reference_roundtrip() {
        let store = Store::temporary(DEFAULT_DOCUMENT).unwrap();
        let slot = ReferenceSlot::key("vpc_id");

        assert_eq!(slot.read(&store).unwrap(), None);
        slot.record(&store, "vpc-1").unwrap();
        assert_eq!(slot.read(&store).unwrap().as_deref(), Some("vpc-1"));
        slot.evict(&store).unwrap();
        assert_eq!(slot.read(&store).unwrap(), None);
    }

    #[test]
    fn test_entry_reference_replaces_entry() {
        let store = Store::temporary(DEFAULT_DOCUMENT).unwrap();
        let slot = ReferenceSlot::entry("zone", "us-east-1a", vec![json!("10.11.1.0/24")]);

        slot.record(&store, "subnet-1").unwrap();
        slot.record(&store, "subnet-2").unwrap();

        let zones = store.list_get("zone").unwrap();
        assert_eq!(
            zones,
            vec![vec![json!("us-east-1a"), json!("10.11.1.0/24"), json!("subnet-2")]]
        );
        assert_eq!(slot.read(&store).unwrap().as_deref(), Some("subnet-2"));

        slot.evict(&store).unwrap();
        assert!(store.list_get("zone").unwrap().is_empty());
    }

    #[test]
    fn test_zone_cidr() {
        assert_eq!(zone_cidr("10.11.0.0/16", 0).as_deref(), Some("10.11.1.0/24"));
        assert_eq!(zone_cidr("10.11.0.0/16", 2).as_deref(), Some("10.11.3.0/24"));
        assert_eq!(zone_cidr("10.11.0.0/24", 0), None);
        assert_eq!(zone_cidr("not-a-cidr", 0), None);
    }
}
