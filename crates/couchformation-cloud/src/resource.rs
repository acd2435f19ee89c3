//! Resource model shared by every cloud driver

use crate::error::{CloudError, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Prefix of every generated resource name
pub const NAME_PREFIX: &str = "cf";

/// Supported cloud targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cloud {
    Aws,
    Azure,
    Gcp,
    Docker,
    Capella,
}

impl Cloud {
    pub const ALL: [Cloud; 5] = [
        Cloud::Aws,
        Cloud::Azure,
        Cloud::Gcp,
        Cloud::Docker,
        Cloud::Capella,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Cloud::Aws => "aws",
            Cloud::Azure => "azure",
            Cloud::Gcp => "gcp",
            Cloud::Docker => "docker",
            Cloud::Capella => "capella",
        }
    }
}

impl std::fmt::Display for Cloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cloud {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        Cloud::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CloudError::UnsupportedCloud(s.to_string()))
    }
}

/// Kinds of resources the reconciler manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Network,
    Subnet,
    SecurityGroup,
    SshKey,
    Gateway,
    RouteTable,
    DnsZone,
    Instance,
}

impl ResourceKind {
    /// Dependency tier. Lower tiers are created first and destroyed last.
    pub fn tier(&self) -> u8 {
        match self {
            ResourceKind::Network => 0,
            ResourceKind::Subnet | ResourceKind::SecurityGroup | ResourceKind::SshKey => 1,
            ResourceKind::Gateway | ResourceKind::RouteTable => 2,
            ResourceKind::DnsZone => 3,
            ResourceKind::Instance => 4,
        }
    }

    /// Document key holding the provider id of this kind
    pub fn state_key(&self) -> &'static str {
        match self {
            ResourceKind::Network => "vpc_id",
            ResourceKind::Subnet => "subnet_id",
            ResourceKind::SecurityGroup => "security_group_id",
            ResourceKind::SshKey => "ssh_key",
            ResourceKind::Gateway => "gateway_id",
            ResourceKind::RouteTable => "route_table_id",
            ResourceKind::DnsZone => "dns_zone_id",
            ResourceKind::Instance => "instance_id",
        }
    }

    /// Short suffix used in generated names and per-group keys
    pub fn suffix(&self) -> &'static str {
        match self {
            ResourceKind::Network => "vpc",
            ResourceKind::Subnet => "subnet",
            ResourceKind::SecurityGroup => "sg",
            ResourceKind::SshKey => "key",
            ResourceKind::Gateway => "gw",
            ResourceKind::RouteTable => "rt",
            ResourceKind::DnsZone => "dns",
            ResourceKind::Instance => "node",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceKind::Network => "network",
            ResourceKind::Subnet => "subnet",
            ResourceKind::SecurityGroup => "security group",
            ResourceKind::SshKey => "ssh key",
            ResourceKind::Gateway => "gateway",
            ResourceKind::RouteTable => "route table",
            ResourceKind::DnsZone => "dns zone",
            ResourceKind::Instance => "instance",
        };
        f.write_str(s)
    }
}

/// Deterministic name for a project-level resource: `cf-<uid>-<suffix>`
pub fn resource_name(project_uid: &str, suffix: &str) -> String {
    format!("{}-{}-{}", NAME_PREFIX, project_uid, suffix)
}

/// Deterministic name for a per-group resource:
/// `cf-<uid>-<service>-group-<n>-<suffix>`
pub fn group_resource_name(project_uid: &str, service: &str, group: u32, kind: ResourceKind) -> String {
    format!(
        "{}-{}-{}-group-{}-{}",
        NAME_PREFIX,
        project_uid,
        service,
        group,
        kind.suffix()
    )
}

/// Document key of a per-group resource: `<service>_group_<n>_<suffix>_id`
pub fn group_key(service: &str, group: u32, kind: ResourceKind) -> String {
    format!("{}_group_{}_{}_id", service, group, kind.suffix())
}

/// Pattern matching every per-group key of `kind` for `service`
pub fn group_key_pattern(service: &str, kind: ResourceKind) -> String {
    format!(
        r"^{}_group_\d+_{}_id$",
        regex::escape(service),
        kind.suffix()
    )
}

/// A live resource as reported by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Provider-assigned identifier
    pub id: String,

    /// Resource name (usually the generated name)
    pub name: String,

    pub kind: ResourceKind,

    /// Provider-specific attributes (addresses, CIDR, state, ...)
    pub attributes: Map<String, Value>,

    pub created_at: Option<DateTime<Utc>>,
}

impl Descriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            attributes: Map::new(),
            created_at: None,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn get_attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// What to create
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub kind: ResourceKind,

    /// Name the resource is created under; also used for orphan lookup
    pub name: String,

    /// Resource-specific configuration, including resolved parent ids
    pub config: Map<String, Value>,
}

impl ResourceSpec {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            config: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.config.insert(key.into(), value.into());
    }

    /// Get a configuration value as a specific type
    pub fn get_config<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.config
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Get a string configuration value
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

/// Filter passed to `ResourceAdapter::list`
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Regular expression the resource name must match
    pub name_pattern: Option<String>,

    /// Labels/tags that must all be present with equal values
    pub labels: BTreeMap<String, String>,
}

impl ListFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn name_matching(pattern: impl Into<String>) -> Self {
        Self {
            name_pattern: Some(pattern.into()),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Compile the name pattern once for repeated matching
    pub fn matcher(&self) -> Result<FilterMatcher<'_>> {
        let name = self.name_pattern.as_deref().map(Regex::new).transpose()?;
        Ok(FilterMatcher { filter: self, name })
    }

    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(p) = &self.name_pattern {
            parts.push(format!("name =~ {}", p));
        }
        for (k, v) in &self.labels {
            parts.push(format!("{}={}", k, v));
        }
        if parts.is_empty() {
            "*".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// A `ListFilter` with its pattern compiled
pub struct FilterMatcher<'a> {
    filter: &'a ListFilter,
    name: Option<Regex>,
}

impl FilterMatcher<'_> {
    pub fn matches(&self, descriptor: &Descriptor) -> bool {
        if let Some(re) = &self.name
            && !re.is_match(&descriptor.name)
        {
            return false;
        }
        self.filter.labels.iter().all(|(k, v)| {
            descriptor
                .attributes
                .get("labels")
                .and_then(|labels| labels.get(k))
                .and_then(Value::as_str)
                == Some(v.as_str())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cloud_parse() {
        assert_eq!("aws".parse::<Cloud>().unwrap(), Cloud::Aws);
        assert_eq!("Docker".parse::<Cloud>().unwrap(), Cloud::Docker);
        assert!(matches!(
            "openstack".parse::<Cloud>(),
            Err(CloudError::UnsupportedCloud(_))
        ));
        assert_eq!(Cloud::Capella.to_string(), "capella");
    }

    #[test]
    fn test_tiers_follow_dependency_order() {
        assert!(ResourceKind::Network.tier() < ResourceKind::Subnet.tier());
        assert_eq!(ResourceKind::Subnet.tier(), ResourceKind::SecurityGroup.tier());
        assert!(ResourceKind::SecurityGroup.tier() < ResourceKind::RouteTable.tier());
        assert!(ResourceKind::Gateway.tier() < ResourceKind::DnsZone.tier());
    }

    #[test]
    fn test_generated_names() {
        assert_eq!(resource_name("a1b2c3d4", "vpc"), "cf-a1b2c3d4-vpc");
        assert_eq!(
            group_resource_name("a1b2c3d4", "cbs", 2, ResourceKind::SecurityGroup),
            "cf-a1b2c3d4-cbs-group-2-sg"
        );
        assert_eq!(group_key("cbs", 2, ResourceKind::SecurityGroup), "cbs_group_2_sg_id");

        let re = Regex::new(&group_key_pattern("cbs", ResourceKind::SecurityGroup)).unwrap();
        assert!(re.is_match("cbs_group_12_sg_id"));
        assert!(!re.is_match("sgw_group_1_sg_id"));
    }

    #[test]
    fn test_filter_matching() {
        let d = Descriptor::new("id-1", "cf-a1-cbs-group-1-sg", ResourceKind::SecurityGroup)
            .with_attribute("labels", json!({"project": "demo"}));

        let filter = ListFilter::name_matching(r"^cf-a1-cbs-group-\d+-sg$");
        assert!(filter.matcher().unwrap().matches(&d));

        let filter = ListFilter::all().with_label("project", "demo");
        assert!(filter.matcher().unwrap().matches(&d));

        let filter = ListFilter::all().with_label("project", "other");
        assert!(!filter.matcher().unwrap().matches(&d));
    }

    #[test]
    fn test_spec_config() {
        let spec = ResourceSpec::new(ResourceKind::Subnet, "cf-x-subnet")
            .with("cidr", "10.1.1.0/24")
            .with("vpc_id", "vpc-1");
        assert_eq!(spec.get_str("cidr"), Some("10.1.1.0/24"));
        assert_eq!(spec.get_config::<String>("vpc_id").as_deref(), Some("vpc-1"));
        assert_eq!(spec.get_config::<u32>("missing"), None);
    }
}
