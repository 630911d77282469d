//! Capture mode, URL history, clearing and the host URL

use super::{format_time, truncate};
use crate::client::HostClient;
use crate::config::{config_file, Config};
use anyhow::{Context, Result};
use console::{style, Term};
use tabtrace_common::{FullInfoMode, Message};

/// Show the capture mode, optionally switching it first
pub async fn capture(client: &HostClient, enable: Option<bool>) -> Result<()> {
    if let Some(enabled) = enable {
        client.command(&Message::SetFullInfoMode { enabled }).await?;
    }

    let mode: FullInfoMode = client.message(&Message::GetFullInfoMode).await?;
    if mode.enabled {
        println!("Capture mode: {}", style("full").yellow().bold());
        println!(
            "  {}",
            style("Headers and bodies are recorded for new calls.").dim()
        );
    } else {
        println!("Capture mode: {}", style("reduced").green().bold());
        println!(
            "  {}",
            style("Only URL, method, status and timing are recorded.").dim()
        );
    }

    Ok(())
}

/// Show visited URLs, optionally changing the bound first
pub async fn history(client: &HostClient, size: Option<usize>) -> Result<()> {
    if let Some(size) = size {
        let size = client.set_history_size(size).await?;
        println!("{} Keeping the last {} URLs", style("✓").green(), size);
        println!();
    }

    let entries = client.history().await?;
    if entries.is_empty() {
        println!("No URL history.");
        return Ok(());
    }

    println!("{:<20} {:<6} {:<50} {:<30}", "VISITED", "TAB", "URL", "TITLE");
    println!("{}", "-".repeat(108));
    for entry in entries.iter().rev() {
        println!(
            "{:<20} {:<6} {:<50} {:<30}",
            format_time(entry.timestamp),
            entry.tab_id,
            truncate(&entry.url, 48),
            truncate(&entry.title, 30)
        );
    }

    Ok(())
}

/// Wipe sessions, history and cached analytics
pub async fn clear(client: &HostClient, yes: bool) -> Result<()> {
    if !yes {
        let term = Term::stderr();
        term.write_str("Delete all recorded sessions and history? [y/N] ")?;
        let answer = term.read_line().context("Failed to read confirmation")?;
        if !is_yes(&answer) {
            println!("Aborted.");
            return Ok(());
        }
    }

    client.command(&Message::ClearSessions).await?;
    println!("{} Cleared all recorded data", style("✓").green());
    Ok(())
}

pub fn set_host(url: &str) -> Result<()> {
    let parsed = reqwest::Url::parse(url).with_context(|| format!("Invalid host URL '{}'", url))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("Host URL must use http or https");
    }

    let mut config = Config::load()?;
    config.host_url = url.trim_end_matches('/').to_string();
    config.save()?;

    println!(
        "{} Saved host URL {} to {}",
        style("✓").green(),
        style(&config.host_url).cyan(),
        config_file().display()
    );
    Ok(())
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y"));
        assert!(is_yes(" YES \n"));
        assert!(!is_yes(""));
        assert!(!is_yes("no"));
    }
}
