//! Cloud capability contract
//!
//! Every cloud (AWS, Azure, GCP, Docker, Capella) supplies a `CloudDriver`
//! that hands out one `ResourceAdapter` per resource kind it supports. The
//! reconciler only talks to these traits.

use crate::error::{CloudError, Result};
use crate::plan::{Dependency, Discovery, NetworkPlan, NetworkRequest, ReferenceSlot, ResourceSlot};
use crate::resource::{
    Cloud, Descriptor, ListFilter, ResourceKind, ResourceSpec, group_key, group_resource_name,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Uniform verbs over one kind of provider resource
#[async_trait]
pub trait ResourceAdapter: Send + Sync {
    /// The kind of resource this adapter manages
    fn kind(&self) -> ResourceKind;

    /// List resources matching `filter`.
    ///
    /// Fails with `CloudError::EmptyResult` when nothing matches.
    async fn list(&self, filter: &ListFilter) -> Result<Vec<Descriptor>>;

    /// Describe a resource by id; `None` when it does not exist
    async fn details(&self, id: &str) -> Result<Option<Descriptor>>;

    /// Look a resource up by its (generated) name
    async fn get_by_name(&self, name: &str) -> Result<Option<String>>;

    /// Create a resource and return its provider id
    async fn create(&self, spec: &ResourceSpec) -> Result<String>;

    /// Delete a resource. Deleting something already gone succeeds.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Cloud driver abstraction trait
#[async_trait]
pub trait CloudDriver: Send + Sync {
    /// Which cloud this driver talks to
    fn cloud(&self) -> Cloud;

    /// Returns the provider display name for UI
    fn display_name(&self) -> &str;

    /// Check if the provider is properly configured and authenticated
    async fn check_auth(&self) -> Result<AuthStatus>;

    /// Availability zones to spread subnets and nodes over in `region`
    fn zones(&self, _region: &str) -> Vec<String> {
        Vec::new()
    }

    /// Resources making up a project network in `request.region`
    fn network_plan(&self, request: &NetworkRequest) -> Result<NetworkPlan>;

    /// Adapter for `kind`, if this cloud has such resources
    fn adapter(&self, kind: ResourceKind) -> Option<&dyn ResourceAdapter>;

    /// Adapter that creates and removes nodes
    fn node_adapter(&self) -> Result<&dyn ResourceAdapter> {
        self.require(ResourceKind::Instance)
    }

    /// Kinds created once per node group (e.g. per-group firewall rules)
    fn group_kinds(&self) -> &[ResourceKind] {
        &[]
    }

    /// Slot for a per-group resource of `kind`.
    ///
    /// Stored under `<service>_group_<n>_<suffix>_id` and discovered by
    /// listing resources whose name matches the generated group name.
    fn group_slot(
        &self,
        project_uid: &str,
        service: &str,
        group: u32,
        kind: ResourceKind,
    ) -> ResourceSlot {
        let name = group_resource_name(project_uid, service, group, kind);
        let pattern = format!("^{}$", regex::escape(&name));
        let spec = ResourceSpec::new(kind, name)
            .with("service", service)
            .with("group", group);
        let slot = ResourceSlot::new(spec)
            .stored_at(ReferenceSlot::key(group_key(service, group, kind)))
            .discovered_by(Discovery::ByPattern(pattern));

        if kind != ResourceKind::Network && self.adapter(ResourceKind::Network).is_some() {
            slot.depends_on(Dependency::on_key(ResourceKind::Network.state_key()))
        } else {
            slot
        }
    }

    /// Adapter for `kind` or an error naming the missing capability
    fn require(&self, kind: ResourceKind) -> Result<&dyn ResourceAdapter> {
        self.adapter(kind).ok_or_else(|| {
            CloudError::InvalidConfig(format!("{} has no {} support", self.cloud(), kind))
        })
    }
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether authentication is valid
    pub authenticated: bool,

    /// Account/user information if available
    pub account_info: Option<String>,

    /// Error message if not authenticated
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_info: None,
            error: Some(error.into()),
        }
    }
}

/// Retry configuration for adapter operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before attempt `attempt + 1` (attempts count from 1)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // the cap is reached long before 64 doublings
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Run `op`, retrying transient failures with exponential backoff.
///
/// Non-transient errors are returned immediately. When attempts run out the
/// last transient error is escalated to `CloudError::RetriesExhausted`.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < config.max_attempts => {
                let delay = config.delay_for(attempt);
                tracing::debug!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    operation,
                    attempt,
                    config.max_attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) if e.is_transient() => {
                return Err(CloudError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    message: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_backoff_capped() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for(1), Duration::from_secs(1));
        assert_eq!(config.delay_for(2), Duration::from_secs(2));
        assert_eq!(config.delay_for(3), Duration::from_secs(4));
        assert_eq!(config.delay_for(10), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_large_attempts_stay_capped() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for(1025), config.max_delay);
        assert_eq!(config.delay_for(u32::MAX), config.max_delay);

        let steep = RetryConfig {
            backoff_multiplier: 1e300,
            ..RetryConfig::default()
        };
        assert_eq!(steep.delay_for(3), steep.max_delay);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast(), "create", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CloudError::Transient("throttled".into()))
            } else {
                Ok("vpc-1")
            }
        })
        .await
        .unwrap();

        assert_eq!(result, "vpc-1");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted_is_fatal() {
        let calls = AtomicU32::new(0);
        let err = with_retry(&fast(), "create", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(CloudError::Transient("throttled".into()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, CloudError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let err = with_retry(&fast(), "delete", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(CloudError::ApiError("forbidden".into()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, CloudError::ApiError(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
