//! Contract address relay
//!
//! Watches Telegram chats for token announcements, filters them by tier and
//! forwards each new contract address to the configured destinations.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

// Use the library crate
use ca_relay::cli::commands;
use ca_relay::config::Config;

/// Contract address relay
#[derive(Parser)]
#[command(name = "relay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, env = "RELAY_CONFIG", default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start relaying
    Start,

    /// Show current configuration (secrets masked)
    Config,

    /// Check Telegram connectivity and the history store
    Health,

    /// Parse a message and show the extracted record and decision
    Parse {
        /// Message text (read from stdin when omitted)
        text: Option<String>,
    },

    /// Show forwarded addresses, newest first
    History {
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Delete the forward history
    ClearHistory {
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ca_relay=info".parse()?),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Only commands that talk to Telegram need a complete configuration
    let needs_validation = matches!(cli.command, Commands::Start | Commands::Health);
    let loaded = if needs_validation {
        Config::load(&cli.config)
    } else {
        Config::load_unchecked(&cli.config)
    };
    let config = match loaded {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Start => commands::start(&config).await,
        Commands::Config => commands::show_config(&config),
        Commands::Health => commands::health(&config).await,
        Commands::Parse { text } => commands::parse(&config, text),
        Commands::History { limit } => commands::history(&config, limit).await,
        Commands::ClearHistory { force } => commands::clear_history(&config, force).await,
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
