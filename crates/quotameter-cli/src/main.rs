//! quotameter CLI - rolling AI quota tracker
//!
//! A command-line front end for the usage state engine: one-shot status,
//! a live watch mode, and cache/config maintenance.

mod commands;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "quotameter")]
#[command(author, version, about = "Rolling-window AI quota tracker", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format: table (default) or json
    #[arg(long, global = true, default_value = "table")]
    format: output::OutputFormat,

    /// Suppress progress messages
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Override config file path (or set QUOTAMETER_CONFIG env var)
    #[arg(long, env = "QUOTAMETER_CONFIG", global = true)]
    config: Option<String>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll every enabled provider once and show its quota
    Status,

    /// Keep polling and print every state change until Ctrl-C
    Watch,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },

    /// Inspect or reset the snapshot cache
    Cache {
        #[command(subcommand)]
        action: commands::cache::CacheAction,
    },

    /// Show completed quota windows
    History {
        /// Only this provider
        provider: Option<String>,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli
        .config
        .as_deref()
        .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
        .unwrap_or_else(quotameter_core::config::config_path);

    // Create context for commands
    let ctx = commands::Context {
        config_path,
        format: cli.format,
        quiet: cli.quiet,
    };

    // Execute command
    match cli.command {
        Commands::Status => commands::status::execute(&ctx).await,
        Commands::Watch => commands::watch::execute(&ctx).await,
        Commands::Config { action } => commands::config::execute(&ctx, action).await,
        Commands::Cache { action } => commands::cache::execute(&ctx, action).await,
        Commands::History { provider } => commands::history::execute(&ctx, provider).await,
    }
}
