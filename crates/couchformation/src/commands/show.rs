use couchformation_core::{Project, RunContext, network_info};
use serde_json::{Value, json};

pub fn handle(project: &str, service: Option<&str>) -> anyhow::Result<()> {
    let ctx = RunContext::load()?;
    let project = Project::open(ctx.project(project))?;

    let entries = match service {
        Some(name) => vec![project.service(name)?],
        None => project.services()?,
    };

    let mut services = Vec::new();
    let mut networks = Vec::new();
    for entry in &entries {
        let groups: Vec<Value> = project
            .node_groups(&entry.name)?
            .into_iter()
            .map(|g| json!({"group": g.number, "spec": g.spec}))
            .collect();
        services.push(json!({
            "name": entry.name,
            "cloud": entry.cloud,
            "region": entry.region,
            "groups": groups,
            "nodes": project.nodes(&entry.name)?,
        }));
        if let Some(network) = network_info(&project, entry.cloud, &entry.region)? {
            if !networks.contains(&network) {
                networks.push(network);
            }
        }
    }

    let dump = json!({
        "project": project.name(),
        "project_uid": project.uid(),
        "services": services,
        "networks": networks,
    });
    println!("{}", serde_json::to_string_pretty(&dump)?);
    Ok(())
}
