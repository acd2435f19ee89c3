use couchformation_core::{RunContext, WorkRegistry, serve};
use tokio::io::AsyncReadExt;

/// Entry point of worker processes spawned by the dispatcher
pub async fn handle() -> anyhow::Result<()> {
    let mut input = String::new();
    tokio::io::stdin().read_to_string(&mut input).await?;

    let ctx = RunContext::load()?;
    let reply = serve(&ctx, &WorkRegistry::standard(), &input).await;
    println!("{}", serde_json::to_string(&reply)?);

    if reply.ok {
        Ok(())
    } else {
        anyhow::bail!(
            "{}",
            reply.error.unwrap_or_else(|| "work unit failed".to_string())
        )
    }
}
