//! Couch Formation core
//!
//! Project, service and node group hierarchy on top of the document store,
//! network orchestration under the process-wide lock, and the dispatcher
//! that fans node work out to worker processes.

pub mod context;
pub mod dispatch;
pub mod error;
pub mod network;
pub mod node;
pub mod orchestrator;
pub mod project;

pub use context::{DriverFactory, RunContext, StandardDrivers, StaticDrivers};
pub use dispatch::{
    Completed, DispatchError, Dispatcher, Executor, Failure, WorkHandler, WorkKind, WorkRegistry,
    WorkUnit, WorkerReply, serve,
};
pub use error::{CoreError, Result};
pub use network::{NetworkHandle, NetworkTeardown, ZoneSubnet, network_info};
pub use node::{NodeNetwork, NodeParams, NodeRecord, NodeTeardown};
pub use orchestrator::{CleanReport, DeployReport, DestroyReport, Orchestrator};
pub use project::{NodeGroup, NodeGroupSpec, Project, ProjectPaths, ServiceEntry};
