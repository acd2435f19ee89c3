use colored::Colorize;

pub async fn handle(project: &str, service: &str, serial: bool) -> anyhow::Result<()> {
    println!("{}", format!("Deploying {}/{}...", project, service).blue());
    let orchestrator = super::orchestrator(serial)?;
    let report = orchestrator.deploy_service(project, service).await?;

    println!(
        "  network {} ({})",
        report.network.vpc_id.as_deref().unwrap_or("-").cyan(),
        report.network_report.summary()
    );
    for node in &report.nodes {
        println!(
            "  {} {} {}",
            "✓".green(),
            node.name,
            node.private_ip.as_deref().unwrap_or("-").dimmed()
        );
    }
    println!(
        "{}",
        format!("Deployed {} node(s)", report.nodes.len()).green()
    );
    Ok(())
}
