//! Outbox relay - publishes events recorded in SQLite to a message broker.

mod app;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use outbox_config_and_utils::{init_logging, Config, Paths};

/// Outbox relay command-line interface.
#[derive(Parser)]
#[command(name = "outbox-relay")]
#[command(about = "Transactional outbox relay")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for runtime files (config, database, logs). Defaults to ~/.outbox-relay
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay until Ctrl-C
    Run,
    /// Record a new event
    Enqueue {
        /// Aggregate the event belongs to; used as the message key
        #[arg(long)]
        aggregate_id: String,
        /// Destination topic
        #[arg(long)]
        topic: String,
        /// Event type
        #[arg(long)]
        event_type: String,
        /// Event payload
        #[arg(long, default_value = "")]
        payload: String,
    },
    /// Print event counts by state
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;

    let mut config = Config::load(&paths)?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
        config.validate()?;
    }

    init_logging(&config.log_level, &paths.log_file())?;

    match cli.command {
        Commands::Run => app::run_relay(&config, &paths).await?,
        Commands::Enqueue {
            aggregate_id,
            topic,
            event_type,
            payload,
        } => {
            let id = app::enqueue(
                &config,
                &paths,
                outbox_database::CreateEvent {
                    aggregate_id,
                    topic,
                    event_type,
                    payload: payload.into_bytes(),
                },
            )
            .await?;
            println!("{id}");
        }
        Commands::Status => {
            let counts = app::status(&config, &paths).await?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }
    }

    Ok(())
}
