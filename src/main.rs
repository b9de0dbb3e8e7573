use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "ttyscribe")]
#[command(about = "Terminal session capture with AI conversation recovery")]
#[command(version)]
struct Cli {
    /// Directory for persisted conversation files (overrides config)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Path to the config file (defaults to ~/.config/ttyscribe/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the capture server: accepts WebSocket clients, one PTY each
    Serve {
        /// Address to listen on (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,

        /// Shell to spawn per session (overrides config)
        #[arg(long)]
        shell: Option<String>,
    },

    /// List recoverable (interrupted) sessions
    Sessions,

    /// Show the restore context for an interrupted conversation
    Restore {
        /// Conversation ID
        id: String,

        /// Mark the conversation as restored afterwards
        #[arg(long)]
        mark: bool,
    },

    /// Validate persisted conversation files
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let mut config = ttyscribe::config::Config::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    match cli.command {
        Commands::Serve { host, port, shell } => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(shell) = shell {
                config.shell = shell;
            }
            cli::serve::serve_command(config).await?;
        }
        Commands::Sessions => {
            cli::sessions::sessions_command(&config.data_dir)?;
        }
        Commands::Restore { id, mark } => {
            cli::restore::restore_command(&config.data_dir, &id, mark)?;
        }
        Commands::Validate => {
            cli::validate::validate_command(&config.data_dir)?;
        }
    }

    Ok(())
}
