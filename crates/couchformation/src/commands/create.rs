use colored::Colorize;
use couchformation_cloud::Cloud;
use couchformation_core::{CoreError, NodeGroupSpec, Project, RunContext};

pub struct CreateArgs {
    pub project: String,
    pub name: String,
    pub cloud: String,
    pub region: Option<String>,
    pub quantity: u32,
    pub machine_type: String,
    pub image: Option<String>,
    pub volume_size: Option<u32>,
    pub tags: Vec<String>,
}

pub fn handle(args: CreateArgs) -> anyhow::Result<()> {
    let ctx = RunContext::load()?;
    let cloud: Cloud = args.cloud.parse()?;
    let region = ctx
        .region_or_default(args.region.as_deref())
        .ok_or(CoreError::NoRegion)?;

    let spec = NodeGroupSpec {
        cloud,
        region: region.clone(),
        machine_type: args.machine_type,
        quantity: args.quantity,
        tags: args.tags,
        image: args.image,
        volume_size: args.volume_size,
    };
    let project = Project::open_or_create(ctx.project(&args.project))?;
    let group = project.create_service(&args.name, spec)?;

    println!(
        "{} {}/{} group {} ({} node(s) on {}/{})",
        "✓".green(),
        args.project.cyan(),
        args.name.cyan(),
        group,
        args.quantity,
        cloud,
        region
    );
    Ok(())
}
