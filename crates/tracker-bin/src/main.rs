//! Tracker CLI - queue events durably and deliver them to a collector.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracker_config_and_utils::{init_logging, Config, Paths};

/// Tracker command-line interface.
#[derive(Parser)]
#[command(name = "tracker")]
#[command(about = "Queue tracking events and deliver them to a collector")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for the queue, config and logs. Defaults to ~/.tracker
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Persist events, then try to deliver everything pending
    Track {
        /// Event as a JSON object of scalar fields; repeatable. Reads JSON
        /// lines from stdin when omitted.
        #[arg(short, long = "event")]
        events: Vec<String>,

        /// Upper bound on the delivery attempt
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },
    /// Deliver everything pending
    Flush {
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },
    /// Show the pending queue
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let mut config = Config::load(&paths)?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    init_logging(&paths, &config.log_level)?;

    match cli.command {
        Commands::Track {
            events,
            timeout_secs,
        } => {
            let payloads = if events.is_empty() {
                commands::read_events(std::io::stdin().lock())?
            } else {
                commands::parse_events(events.iter().map(String::as_str))?
            };
            commands::track(&config, &paths, payloads, timeout_secs).await?;
        }
        Commands::Flush { timeout_secs } => {
            commands::flush(&config, &paths, timeout_secs).await?;
        }
        Commands::Status => {
            commands::status(&config, &paths)?;
        }
    }

    Ok(())
}
