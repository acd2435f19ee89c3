pub mod clean;
pub mod create;
pub mod deploy;
pub mod destroy;
pub mod list;
pub mod remove;
pub mod show;
pub mod worker;

use couchformation_core::{Executor, Orchestrator, RunContext};
use std::sync::Arc;

/// Orchestrator over the configured base directory
pub fn orchestrator(serial: bool) -> anyhow::Result<Orchestrator> {
    let ctx = RunContext::load()?;
    let executor = if serial {
        Executor::InProcess
    } else {
        Executor::current_exe()?
    };
    Ok(Orchestrator::new(Arc::new(ctx), executor))
}
