mod commands;
mod config;
mod logging;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands::{RequestArgs, SignInArgs};
use crate::config::AppConfig;

/// tokengate - authenticated HTTP calls with automatic session refresh
#[derive(Parser)]
#[command(name = "tokengate")]
#[command(about = "tokengate - authenticated HTTP calls with automatic session refresh")]
#[command(version)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print effective configuration (JSON) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration and exit
    Check,
    /// Store a backend-issued token pair
    SignIn(SignInArgs),
    /// Remove the stored session
    SignOut,
    /// Show whether a session is stored
    Status,
    /// Perform an authenticated request and print status and body
    Request(RequestArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Layered config:
    // 1) defaults -> 2) YAML (if provided) -> 3) env (TOKENGATE__*) -> 4) CLI flags
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if cli.log_json {
        config.logging.json = true;
    }

    logging::init(&config.logging, cli.verbose);

    if cli.print_config {
        println!("{}", config.to_pretty_json()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Status) {
        Commands::Check => commands::check(&config),
        Commands::SignIn(args) => args.run(&config).await,
        Commands::SignOut => commands::sign_out(&config).await,
        Commands::Status => commands::status(&config).await,
        Commands::Request(args) => args.run(&config).await,
    }
}
