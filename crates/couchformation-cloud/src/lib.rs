//! Couch Formation Cloud Infrastructure
//!
//! This crate provides the cloud capability contract and the generic
//! reconciler that converges a project network document against a live
//! provider.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 cloudmgr CLI                     │
//! │          (create / deploy / destroy)             │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │             couchformation-cloud                 │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │           Capability Contract             │   │
//! │  │  trait CloudDriver / ResourceAdapter      │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │  Reconciler  │  │ Network Lock │            │
//! │  └──────────────┘  └──────────────┘            │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │    docker     │ │   in-memory   │
//! │    driver     │ │    driver     │
//! └───────────────┘ └───────────────┘
//! ```

pub mod action;
pub mod error;
pub mod lock;
pub mod memory;
pub mod plan;
pub mod provider;
pub mod reconcile;
pub mod resource;

// Re-exports
pub use action::{ReconcileReport, ReportSummary, ResourceState, Transition, TransitionType};
pub use error::{CloudError, Result};
pub use lock::{NetworkGuard, NetworkLock, process_guard};
pub use memory::{MemoryCloud, Op};
pub use plan::{
    Dependency, Discovery, NetworkPlan, NetworkRequest, ReferenceSlot, ResourceSlot, zone_cidr,
};
pub use provider::{AuthStatus, CloudDriver, ResourceAdapter, RetryConfig, with_retry};
pub use reconcile::{Observation, Reconciler};
pub use resource::{
    Cloud, Descriptor, ListFilter, NAME_PREFIX, ResourceKind, ResourceSpec, group_key,
    group_key_pattern, group_resource_name, resource_name,
};
