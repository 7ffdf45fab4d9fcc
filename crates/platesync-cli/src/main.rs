//! PlateSync CLI
//!
//! Command-line interface for inspecting and draining the offline action
//! queue and the response cache.

use std::fs::File;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use platesync_core::transport::Method;
use platesync_core::{ActionKind, Config};

mod commands;
mod context;
mod output;

use context::Context;
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "platesync")]
#[command(about = "PlateSync - offline action queue and response cache")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to the config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show connectivity and queue status
    Status,
    /// Inspect and edit the action queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Deliver queued actions now
    Sync,
    /// Inspect and invalidate the response cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// List pending actions
    #[command(alias = "ls")]
    List,
    /// Queue an action
    Add {
        /// Action kind (create, update, delete)
        kind: ActionKind,
        /// Endpoint relative to the API base URL
        endpoint: String,
        /// JSON payload
        #[arg(short, long)]
        data: Option<String>,
        /// HTTP method (defaults from the kind)
        #[arg(short, long)]
        method: Option<Method>,
        /// Delivery attempts before the action is dropped
        #[arg(long)]
        max_retries: Option<u32>,
    },
    /// Remove a pending action
    #[command(alias = "rm")]
    Remove {
        /// Action ID (full UUID or prefix)
        id: String,
    },
    /// List permanently failed actions
    Dead,
    /// Forget permanently failed actions
    ClearDead,
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show entry counts
    Stats,
    /// Remove entries whose key contains a pattern
    Invalidate {
        /// Exact key, prefix or substring
        pattern: String,
    },
    /// Remove every entry
    Clear,
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (api_base_url, max_retries, probe_addr, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands don't need the database
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), cli.config.as_ref(), &output);
    }

    let config = Config::load_with_cli_override(cli.config.as_ref())?;
    init_logging(&config);

    let ctx = Context::open(config).await?;

    let result = match cli.command {
        Commands::Status => commands::status::show(&ctx, &output).await,
        Commands::Queue { command } => handle_queue_command(command, &ctx, &output).await,
        Commands::Sync => commands::sync::sync(&ctx, &output).await,
        Commands::Cache { command } => handle_cache_command(command, &ctx, &output).await,
        Commands::Config { .. } => Ok(()), // Handled above
    };

    ctx.close().await?;
    result
}

async fn handle_queue_command(command: QueueCommands, ctx: &Context, output: &Output) -> Result<()> {
    match command {
        QueueCommands::List => commands::queue::list(ctx, output).await,
        QueueCommands::Add {
            kind,
            endpoint,
            data,
            method,
            max_retries,
        } => commands::queue::add(ctx, kind, endpoint, data, method, max_retries, output).await,
        QueueCommands::Remove { id } => commands::queue::remove(ctx, id, output).await,
        QueueCommands::Dead => commands::queue::dead(ctx, output).await,
        QueueCommands::ClearDead => commands::queue::clear_dead(ctx, output).await,
    }
}

async fn handle_cache_command(command: CacheCommands, ctx: &Context, output: &Output) -> Result<()> {
    match command {
        CacheCommands::Stats => commands::cache::stats(ctx, output).await,
        CacheCommands::Invalidate { pattern } => {
            commands::cache::invalidate(ctx, pattern, output).await
        }
        CacheCommands::Clear => commands::cache::clear(ctx, output).await,
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

/// Initialize logging
///
/// Only initializes if PLATESYNC_LOG is set. Logs go to config.log_file when
/// set, otherwise stderr.
fn init_logging(config: &Config) {
    let Ok(log_level) = std::env::var("PLATESYNC_LOG") else {
        return;
    };

    let env_filter = EnvFilter::new(format!(
        "platesync_core={},platesync_cli={}",
        log_level, log_level
    ));

    match config.log_file {
        Some(ref log_path) => {
            let log_file = match File::create(log_path) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("Warning: Could not create log file {:?}: {}", log_path, e);
                    return;
                }
            };
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(log_file)
                .try_init();
            info!("Logging to {:?}", log_path);
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
}
