use colored::Colorize;

pub async fn handle(project: &str, force: bool, serial: bool) -> anyhow::Result<()> {
    println!("{}", format!("Cleaning project {}...", project).blue());
    let orchestrator = super::orchestrator(serial)?;
    let report = orchestrator.clean_project(project, force).await?;

    for service in &report.destroyed {
        println!("  {} {}", "✓".green(), service);
    }
    for service in &report.forced {
        println!("  {} {} (forced)", "!".yellow(), service);
    }
    println!("{}", format!("Project {} removed", project).green());
    Ok(())
}
