//! Per-invocation run context
//!
//! Everything a command needs (base directory, settings, cloud drivers and
//! the network guard) is built once and passed down explicitly.

use crate::error::Result;
use crate::project::ProjectPaths;
use couchformation_cloud::{Cloud, CloudDriver, CloudError, NetworkGuard, RetryConfig, process_guard};
use couchformation_config::Settings;
use couchformation_docker::{DockerDriver, DockerOptions};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Hands out a driver per cloud
pub trait DriverFactory: Send + Sync {
    fn driver(&self, cloud: Cloud) -> Result<Arc<dyn CloudDriver>>;
}

/// Drivers shipped with this build
///
/// Only Docker has a driver; every other cloud reports
/// `CloudError::UnsupportedCloud`.
pub struct StandardDrivers {
    docker: DockerOptions,
}

impl StandardDrivers {
    pub fn new(settings: &Settings) -> Self {
        Self {
            docker: DockerOptions {
                image: settings.docker.image.clone(),
                retry: RetryConfig::default(),
            },
        }
    }
}

impl DriverFactory for StandardDrivers {
    fn driver(&self, cloud: Cloud) -> Result<Arc<dyn CloudDriver>> {
        match cloud {
            Cloud::Docker => {
                let driver = DockerDriver::connect(self.docker.clone()).map_err(CloudError::from)?;
                Ok(Arc::new(driver))
            }
            other => Err(CloudError::UnsupportedCloud(other.to_string()).into()),
        }
    }
}

/// A fixed set of driver instances, shared by every caller
#[derive(Default)]
pub struct StaticDrivers {
    drivers: HashMap<Cloud, Arc<dyn CloudDriver>>,
}

impl StaticDrivers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, driver: Arc<dyn CloudDriver>) -> Self {
        self.drivers.insert(driver.cloud(), driver);
        self
    }
}

impl DriverFactory for StaticDrivers {
    fn driver(&self, cloud: Cloud) -> Result<Arc<dyn CloudDriver>> {
        self.drivers
            .get(&cloud)
            .cloned()
            .ok_or_else(|| CloudError::UnsupportedCloud(cloud.to_string()).into())
    }
}

/// Explicit state for one command invocation
#[derive(Clone)]
pub struct RunContext {
    base: PathBuf,
    settings: Settings,
    drivers: Arc<dyn DriverFactory>,
    guard: Arc<NetworkGuard>,
}

impl RunContext {
    pub fn new(base: impl Into<PathBuf>, settings: Settings, drivers: Arc<dyn DriverFactory>) -> Self {
        Self {
            base: base.into(),
            settings,
            drivers,
            guard: process_guard(),
        }
    }

    /// Context from the configured base directory and settings file
    pub fn load() -> Result<Self> {
        let base = couchformation_config::base_dir()?;
        let settings = Settings::load(&base)?;
        let drivers = Arc::new(StandardDrivers::new(&settings));
        Ok(Self::new(base, settings, drivers))
    }

    /// Use a private guard instead of the process-wide one
    pub fn with_guard(mut self, guard: Arc<NetworkGuard>) -> Self {
        self.guard = guard;
        self
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn guard(&self) -> &NetworkGuard {
        &self.guard
    }

    pub fn driver(&self, cloud: Cloud) -> Result<Arc<dyn CloudDriver>> {
        self.drivers.driver(cloud)
    }

    pub fn project(&self, name: &str) -> ProjectPaths {
        ProjectPaths::new(&self.base, name)
    }

    /// Region to use when a command does not name one
    pub fn region_or_default(&self, region: Option<&str>) -> Option<String> {
        region
            .map(str::to_string)
            .or_else(|| self.settings.default_region.clone())
    }
}
