//! Host status

use crate::client::HostClient;
use anyhow::Result;
use console::style;
use tabtrace_common::constants::SERVICE_NAME;

pub async fn run(client: &HostClient) -> Result<()> {
    let health = client.health().await?;

    if health.service != SERVICE_NAME {
        anyhow::bail!(
            "{} is not a tabtrace host (reported service '{}')",
            client.base_url(),
            health.service
        );
    }

    println!(
        "{} {} {}",
        style("●").green(),
        style("tabtrace host").white().bold(),
        style(format!("v{}", health.version)).dim()
    );
    println!("  URL:             {}", style(client.base_url()).cyan());
    println!("  Active sessions: {}", health.active_sessions);
    let mode = if health.capture_mode == "full" {
        style(health.capture_mode.as_str()).yellow()
    } else {
        style(health.capture_mode.as_str()).green()
    };
    println!("  Capture mode:    {}", mode);

    Ok(())
}
