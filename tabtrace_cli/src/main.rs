//! tabtrace CLI - inspect what the capture host has recorded
//!
//! Usage:
//!   tabtrace status                 Check the host and capture mode
//!   tabtrace sessions [--log]       List active (or logged) sessions
//!   tabtrace calls <TAB>            List the calls of a tab's session
//!   tabtrace analytics              Show endpoint analytics
//!   tabtrace capture [on|off]       Show or switch the capture mode
//!   tabtrace replay <TAB> <CALL>    Re-issue a recorded call
//!   tabtrace history                Show visited URLs
//!   tabtrace clear                  Wipe all recorded data

mod client;
mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tabtrace")]
#[command(version)]
#[command(about = "Inspect network calls recorded by the tabtrace host", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Host URL (overrides the config file)
    #[arg(long, global = true, env = "TABTRACE_HOST_URL")]
    host: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the host is reachable
    Status,

    /// List sessions
    Sessions {
        /// Show the historical session log instead of active sessions
        #[arg(long)]
        log: bool,
    },

    /// List the calls recorded for a tab
    Calls {
        /// Tab ID
        tab: i64,

        /// Only show calls that failed
        #[arg(long)]
        errors: bool,
    },

    /// Show endpoint analytics
    Analytics {
        /// Restrict to one tab's session
        #[arg(long)]
        tab: Option<i64>,

        /// Time window (all, last-hour, last-day, last-week)
        #[arg(short, long, default_value = "all")]
        window: String,
    },

    /// Show or switch the capture mode
    Capture {
        /// Turn full capture on or off
        #[arg(value_parser = ["on", "off"])]
        state: Option<String>,
    },

    /// Re-issue a recorded call
    Replay {
        /// Tab ID
        tab: i64,

        /// Call ID
        call_id: String,
    },

    /// Show visited URL history
    History {
        /// Change how many entries are kept (1-50)
        #[arg(long)]
        size: Option<usize>,
    },

    /// Wipe sessions, history and cached analytics
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Save the host URL to the config file
    SetHost {
        /// Host URL, e.g. http://127.0.0.1:7420
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},tabtrace_cli=info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    if let Commands::SetHost { url } = &cli.command {
        return commands::settings::set_host(url);
    }

    let config = config::Config::load()?;
    let host_url = cli.host.unwrap_or(config.host_url);
    let client = client::HostClient::new(&host_url)?;

    match cli.command {
        Commands::Status => {
            commands::status::run(&client).await?;
        }

        Commands::Sessions { log } => {
            if log {
                commands::sessions::logged(&client).await?;
            } else {
                commands::sessions::active(&client).await?;
            }
        }

        Commands::Calls { tab, errors } => {
            commands::sessions::calls(&client, tab, errors).await?;
        }

        Commands::Analytics { tab, window } => {
            commands::analytics::run(&client, tab, &window).await?;
        }

        Commands::Capture { state } => {
            let enable = state.as_deref().map(|s| s == "on");
            commands::settings::capture(&client, enable).await?;
        }

        Commands::Replay { tab, call_id } => {
            commands::sessions::replay(&client, tab, &call_id).await?;
        }

        Commands::History { size } => {
            commands::settings::history(&client, size).await?;
        }

        Commands::Clear { yes } => {
            commands::settings::clear(&client, yes).await?;
        }

        Commands::SetHost { .. } => {}
    }

    Ok(())
}
