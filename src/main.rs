//! easychat - Command-line client for EasyChat
//!
//! Provides both a REPL and one-shot command execution.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use easychat_client::{Client, ClientConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "easychat")]
#[command(about = "Command-line client for the EasyChat server")]
#[command(version)]
struct Cli {
    /// Server address (host:port)
    #[arg(short, long)]
    server: Option<String>,

    /// YAML config file
    #[arg(short, long, env = "EASYCHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Username for commands that need a session
    #[arg(short, long, env = "EASYCHAT_USERNAME")]
    username: Option<String>,

    /// Password for commands that need a session
    #[arg(short, long, env = "EASYCHAT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start interactive REPL
    Repl,

    /// Send a chat message
    Send {
        /// Receiver username or user id
        to: String,

        /// Message text
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },

    /// Show chat history with a peer
    History {
        /// Peer username or user id
        peer: String,

        /// Maximum records to fetch
        #[arg(short, long, default_value = "50")]
        limit: u32,
    },

    /// List online users
    Users,

    /// Look up a user by name
    Lookup {
        /// Username
        name: String,
    },

    /// Register a new account
    Register {
        /// Username
        username: String,

        /// Password
        password: String,

        /// Display name
        #[arg(default_value = "")]
        nickname: String,
    },

    /// Print every incoming event as a JSON line
    Listen,
}

/// Login credentials taken from flags or the environment.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::load_with(cli.config.as_deref()).map_err(|e| {
        eprintln!("{}: {}", "Config error".red(), e);
        e
    })?;
    if let Some(server) = cli.server {
        config.network.server = server;
    }
    let conn_config = config.connection_config()?;
    let addr = conn_config.addr();
    tracing::debug!(
        "Using server {} (resolve timeout {:?})",
        addr,
        conn_config.resolve_timeout
    );
    let client = Client::new(conn_config);

    let credentials = match (cli.username, cli.password) {
        (Some(username), Some(password)) => Some(Credentials { username, password }),
        _ => None,
    };

    match cli.command {
        Some(Commands::Repl) | None => {
            repl::run(client, addr, credentials).await?;
        }
        Some(cmd) => {
            client.connect().await.map_err(|e| {
                eprintln!("{}: {}", "Connection failed".red(), e);
                e
            })?;

            let result = commands::execute(&client, cmd, credentials.as_ref()).await;
            let _ = client.close().await;

            match result {
                Ok(output) => {
                    if !output.is_empty() {
                        println!("{}", output);
                    }
                }
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
