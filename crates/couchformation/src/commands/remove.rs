use colored::Colorize;
use couchformation_core::{Project, RunContext};

pub fn handle(project: &str, service: &str) -> anyhow::Result<()> {
    let ctx = RunContext::load()?;
    Project::open(ctx.project(project))?.remove_service(service)?;
    println!("{} removed {}/{}", "✓".green(), project, service);
    Ok(())
}
