//! rl-socket CLI - Terminal consumer of the live game telemetry stream.
//!
//! Connects to the stats plugin's WebSocket server and prints events,
//! watches a single derived value, or sends a frame back. Useful for
//! debugging overlays and for scripting against a running match.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use rl_core::config::{AppConfig, ConfigHandle};
use rl_core::error::RlResult;
use rl_core::logging;
use rl_core::platform::Platform;

/// rl-socket - live Rocket League telemetry from the terminal.
#[derive(Parser)]
#[command(
    name = "rl-socket",
    version,
    about = "Live Rocket League telemetry client",
    long_about = "A command-line client for the Rocket League stats plugin.\n\
                   Connects to the plugin's WebSocket server and streams game events."
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json).
    #[arg(short = 'f', long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// One JSON object per line, for scripting.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print events as they arrive.
    Listen {
        /// Plugin address (overrides config).
        #[arg(short, long)]
        url: Option<String>,
        /// Only print these events (repeatable).
        #[arg(short, long = "event")]
        events: Vec<String>,
    },
    /// Print a value derived from one event whenever it changes.
    Watch {
        /// Event to watch, e.g. game:update_state.
        #[arg(short, long)]
        event: String,
        /// JSON pointer into the payload, e.g. /game/time_seconds.
        #[arg(short, long)]
        pointer: Option<String>,
        /// Plugin address (overrides config).
        #[arg(short, long)]
        url: Option<String>,
    },
    /// Connect, send one frame and exit.
    Send {
        /// Event name of the frame.
        #[arg(short, long)]
        event: String,
        /// JSON payload (defaults to null).
        #[arg(short, long)]
        data: Option<String>,
        /// Plugin address (overrides config).
        #[arg(short, long)]
        url: Option<String>,
    },
    /// View and manage the configuration file.
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

#[tokio::main]
async fn main() -> RlResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = match cli.config {
        Some(path) => path,
        None => AppConfig::default_config_path()?,
    };
    let config = if config_path.exists() {
        AppConfig::load_from_file(&config_path)?
    } else {
        AppConfig::default()
    };

    // Initialize logging
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let log_dir = config
        .effective_log_dir()
        .unwrap_or_else(|_| PathBuf::from("logs"));
    let _guard = match logging::init_logging(&log_level, &log_dir, config.logging.json_output) {
        Ok(guard) => Some(guard),
        Err(e) => {
            logging::init_console_logging(&log_level);
            warn!("file logging unavailable in {}: {e}", log_dir.display());
            None
        }
    };

    let config_handle = ConfigHandle::new(config).with_path(config_path);

    info!(
        "rl-socket CLI v{} on {}",
        rl_core::constants::APP_VERSION,
        Platform::current()
    );

    // Dispatch to command handlers
    match cli.command {
        Commands::Listen { url, events } => {
            commands::listen::run(config_handle, url, events, cli.format).await
        }
        Commands::Watch { event, pointer, url } => {
            commands::watch::run(config_handle, event, pointer, url, cli.format).await
        }
        Commands::Send { event, data, url } => {
            commands::send::run(config_handle, event, data, url, cli.format).await
        }
        Commands::Config { action } => {
            commands::config::run(config_handle, action, cli.format).await
        }
    }
}
