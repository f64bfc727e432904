//! Llamart CLI: the main entry point.
//!
//! Commands:
//! - `onboard`: Create `~/.llamart/` with a default config and knowledge file
//! - `chat`: Interactive conversation with streaming output
//! - `ask`: Single request, optionally with an image
//! - `knowledge`: Show the entries a query retrieves
//! - `prompt`: Print the assembled prompt for a message
//! - `doctor`: Diagnose configuration, model and knowledge

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::Overrides;

#[derive(Parser)]
#[command(
    name = "llamart",
    about = "Llamart: on-device retrieval-augmented art assistant",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of ~/.llamart/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Model file (overrides config)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Tokenizer file (overrides config)
    #[arg(long, global = true)]
    tokenizer: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration and an example knowledge file
    Onboard,

    /// Chat interactively
    Chat {
        /// Replay this text instead of running a model
        #[arg(long)]
        scripted: Option<String>,
    },

    /// Send a single message
    Ask {
        /// The message
        #[arg(short, long)]
        message: String,

        /// Image to attach (used by multimodal models)
        #[arg(short, long)]
        image: Option<PathBuf>,

        /// Replay this text instead of running a model
        #[arg(long)]
        scripted: Option<String>,
    },

    /// Show the knowledge entries a query retrieves
    Knowledge {
        /// Text to retrieve against
        query: String,
    },

    /// Print the prompt that would be sent for a message
    Prompt {
        /// The user message
        text: String,
    },

    /// Diagnose system health
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let overrides = Overrides {
        config: cli.config,
        model: cli.model,
        tokenizer: cli.tokenizer,
    };

    match cli.command {
        Commands::Onboard => commands::onboard::run(&overrides).await?,
        Commands::Chat { scripted } => commands::chat::run(&overrides, scripted).await?,
        Commands::Ask {
            message,
            image,
            scripted,
        } => commands::ask::run(&overrides, message, image, scripted).await?,
        Commands::Knowledge { query } => commands::knowledge::run(&overrides, &query).await?,
        Commands::Prompt { text } => commands::prompt::run(&overrides, &text).await?,
        Commands::Doctor => commands::doctor::run(&overrides).await?,
    }

    Ok(())
}
