use colored::Colorize;
use couchformation_core::Project;

pub async fn handle(project: &str, service: Option<&str>, serial: bool) -> anyhow::Result<()> {
    let orchestrator = super::orchestrator(serial)?;

    let Some(service) = service else {
        let project = Project::open(orchestrator.context().project(project))?;
        let services = project.services()?;
        if services.is_empty() {
            println!("{}", "No services".dimmed());
        }
        for entry in services {
            let nodes = project.nodes(&entry.name)?;
            let deployed = nodes.iter().filter(|n| n.instance_id.is_some()).count();
            println!(
                "{:<16} {:<8} {:<16} {} node(s) deployed",
                entry.name.cyan(),
                entry.cloud,
                entry.region,
                deployed
            );
        }
        return Ok(());
    };

    let nodes = orchestrator.list_service(project, service).await?;
    if nodes.is_empty() {
        println!("{}", "No nodes deployed".dimmed());
    }
    for node in nodes {
        let state = node.state.as_deref().unwrap_or("unknown");
        let state = if state == "missing" {
            state.red()
        } else {
            state.green()
        };
        println!(
            "{:<20} {:<16} {:<16} {}",
            node.name,
            node.private_ip.as_deref().unwrap_or("-"),
            node.zone.as_deref().unwrap_or("-"),
            state
        );
    }
    Ok(())
}
