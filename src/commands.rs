//! One-shot command execution.

use crate::{Commands, Credentials};
use colored::Colorize;
use easychat_client::{Client, ClientError, ClientEvent};
use easychat_protocol::{HistoryEntry, UserEntry};
use tokio::sync::broadcast::error::RecvError;

/// Executes a command and returns the formatted output.
pub async fn execute(
    client: &Client,
    cmd: Commands,
    credentials: Option<&Credentials>,
) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Repl => Ok(String::new()),

        Commands::Send { to, message } => {
            login(client, credentials).await?;
            let content = message.join(" ");
            let receiver_id = client.send_chat(&to, &content).await?;
            Ok(format!(
                "{} to {} ({})",
                "Sent".green(),
                client.directory().lookup_name(receiver_id).cyan(),
                receiver_id
            ))
        }

        Commands::History { peer, limit } => {
            login(client, credentials).await?;
            let entries = client.history(&peer, limit).await?;
            Ok(format_history(client, &entries))
        }

        Commands::Users => {
            login(client, credentials).await?;
            let users = client.online_users().await?;
            Ok(format_users(&users))
        }

        Commands::Lookup { name } => {
            let user = client.lookup_user(&name).await?;
            Ok(format!("{} (ID: {})", user.name.cyan(), user.id))
        }

        Commands::Register {
            username,
            password,
            nickname,
        } => {
            let message = client.register(&username, &password, &nickname).await?;
            Ok(format!("{} {}", "Registered".green(), message))
        }

        Commands::Listen => {
            // Subscribe before logging in so the login and any offline
            // messages are printed too
            let mut events = client.subscribe_events();
            if credentials.is_some() {
                login(client, credentials).await?;
            }
            eprintln!("{}", "Press Ctrl+C to stop...".dimmed());

            loop {
                tokio::select! {
                    event = events.recv() => {
                        match event {
                            Ok(event) => {
                                println!("{}", serde_json::to_string(&event)?);
                                if matches!(event, ClientEvent::Disconnected { .. }) {
                                    break;
                                }
                            }
                            Err(RecvError::Lagged(n)) => {
                                eprintln!("{}: lagged {} events", "Warning".yellow(), n);
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        eprintln!("\n{}", "Stopping...".dimmed());
                        break;
                    }
                }
            }
            Ok(String::new())
        }
    }
}

async fn login(client: &Client, credentials: Option<&Credentials>) -> Result<i32, ClientError> {
    let credentials = credentials.ok_or(ClientError::NotAuthenticated)?;
    client
        .login(&credentials.username, &credentials.password)
        .await
}

/// Formats the online user list.
pub fn format_users(users: &[UserEntry]) -> String {
    if users.is_empty() {
        return "No users online".yellow().to_string();
    }

    let mut output = format!("{} ({}):", "Online users".bold(), users.len());
    for user in users {
        output.push_str(&format!("\n  - {} (ID: {})", user.name.cyan(), user.id));
    }
    output
}

/// Formats history records, naming senders from the directory.
pub fn format_history(client: &Client, entries: &[HistoryEntry]) -> String {
    if entries.is_empty() {
        return "No history".yellow().to_string();
    }

    let directory = client.directory();
    let mut output = format!("{} ({}):", "History".bold(), entries.len());
    for (i, entry) in entries.iter().enumerate() {
        output.push_str(&format!(
            "\n  {}. [{}] {}",
            i + 1,
            directory.lookup_name(entry.sender_id).cyan(),
            entry.content
        ));
    }
    output
}
