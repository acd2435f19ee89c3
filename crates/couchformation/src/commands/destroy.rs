use colored::Colorize;
use couchformation_core::NetworkTeardown;

pub async fn handle(project: &str, service: &str, serial: bool) -> anyhow::Result<()> {
    println!("{}", format!("Destroying {}/{}...", project, service).blue());
    let orchestrator = super::orchestrator(serial)?;
    let report = orchestrator.destroy_service(project, service).await?;

    for node in &report.nodes {
        println!("  {} {} {}", "✓".green(), node.name, node.transition);
    }
    match &report.network {
        NetworkTeardown::InUse(services) => println!(
            "  {} network kept for {}",
            "•".yellow(),
            services.join(", ")
        ),
        NetworkTeardown::Destroyed(network) => {
            println!("  network released ({})", network.summary())
        }
    }
    println!("{}", "Destroy complete".green());
    Ok(())
}
