//! Interactive REPL.

use crate::commands::{format_history, format_users};
use crate::Credentials;
use chrono::Local;
use colored::Colorize;
use easychat_client::Client;
use easychat_protocol::HistoryRequest;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};

const HELP_TEXT: &str = r#"
Available commands:
  help                                 Show this help
  login <username> <password>          Log in
  register <username> <password> [nickname]
                                       Create an account
  send <user|id> <message>             Send a message
  history <user|id> [limit]            Show chat history (default 50)
  users                                List online users
  lookup <username>                    Look up a user id
  whoami                               Show the session identity
  ping                                 Heartbeat round trip

  quit, exit                           Exit the REPL
"#;

/// A parsed REPL line.
#[derive(Debug, PartialEq, Eq)]
pub enum ReplCommand {
    Empty,
    Help,
    Quit,
    Login { username: String, password: String },
    Register { username: String, password: String, nickname: String },
    Send { to: String, message: String },
    History { peer: String, limit: u32 },
    Users,
    Lookup { name: String },
    Whoami,
    Ping,
    Usage(&'static str),
    Unknown(String),
}

/// Splits off the first whitespace-delimited word.
fn next_word(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    if input.is_empty() {
        return None;
    }
    match input.find(char::is_whitespace) {
        Some(end) => Some((&input[..end], input[end..].trim_start())),
        None => Some((input, "")),
    }
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let Some((cmd, rest)) = next_word(line) else {
            return ReplCommand::Empty;
        };
        let cmd = cmd.to_lowercase();

        match cmd.as_str() {
            "help" | "?" => ReplCommand::Help,
            "quit" | "exit" | "q" => ReplCommand::Quit,
            "users" => ReplCommand::Users,
            "whoami" => ReplCommand::Whoami,
            "ping" => ReplCommand::Ping,

            "login" => match next_word(rest) {
                Some((username, rest)) if !rest.is_empty() => ReplCommand::Login {
                    username: username.to_string(),
                    password: rest.trim_end().to_string(),
                },
                _ => ReplCommand::Usage("login <username> <password>"),
            },

            "register" => {
                let parsed = next_word(rest).and_then(|(username, rest)| {
                    next_word(rest).map(|(password, rest)| (username, password, rest))
                });
                match parsed {
                    Some((username, password, nickname)) => ReplCommand::Register {
                        username: username.to_string(),
                        password: password.to_string(),
                        nickname: nickname.trim_end().to_string(),
                    },
                    None => ReplCommand::Usage("register <username> <password> [nickname]"),
                }
            }

            // The message keeps its inner spacing
            "send" => match next_word(rest) {
                Some((to, message)) if !message.is_empty() => ReplCommand::Send {
                    to: to.to_string(),
                    message: message.to_string(),
                },
                _ => ReplCommand::Usage("send <user|id> <message>"),
            },

            "history" => match next_word(rest) {
                Some((peer, rest)) => match next_word(rest) {
                    None => ReplCommand::History {
                        peer: peer.to_string(),
                        limit: HistoryRequest::DEFAULT_LIMIT,
                    },
                    Some((limit, _)) => match limit.parse() {
                        Ok(limit) => ReplCommand::History {
                            peer: peer.to_string(),
                            limit,
                        },
                        Err(_) => ReplCommand::Usage("history <user|id> [limit]"),
                    },
                },
                None => ReplCommand::Usage("history <user|id> [limit]"),
            },

            "lookup" => match next_word(rest) {
                Some((name, _)) => ReplCommand::Lookup {
                    name: name.to_string(),
                },
                None => ReplCommand::Usage("lookup <username>"),
            },

            _ => ReplCommand::Unknown(cmd),
        }
    }
}

pub async fn run(
    client: Client,
    addr: String,
    credentials: Option<Credentials>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "EasyChat CLI".bold().cyan());
    println!("Connecting to {}...", addr);

    client.connect().await?;
    println!("{}", "Connected!".green());

    let directory = client.directory();
    client.set_message_callback(move |kind, sender_id, payload| {
        let label = if kind == "offline" {
            "offline".yellow()
        } else {
            "message".green()
        };
        println!(
            "\n[{}] {} {}: {}",
            Local::now().format("%H:%M:%S").to_string().dimmed(),
            label,
            directory.lookup_name(sender_id).cyan(),
            payload
        );
    });
    client.set_error_callback(|_, message| {
        println!("\n{}: {}", "Server error".red(), message);
    });

    if let Some(credentials) = credentials {
        match client
            .login(&credentials.username, &credentials.password)
            .await
        {
            Ok(id) => println!("Logged in as {} (ID: {})", credentials.username.cyan(), id),
            Err(e) => println!("{}: {}", "Login failed".red(), e),
        }
    }

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    let history_path = std::env::var("HOME")
        .map(|h| std::path::PathBuf::from(h).join(".easychat_history"))
        .unwrap_or_else(|_| ".easychat_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", "easychat>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => match execute_repl_command(&client, &line).await {
                Ok(Some(output)) if output.is_empty() => {}
                Ok(Some(output)) => println!("{}\n", output),
                Ok(None) => break,
                Err(e) => println!("{}: {}\n", "Error".red(), e),
            },
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }

        if !client.is_connected() {
            println!("{}", "Connection lost.".red());
            break;
        }
    }

    let _ = rl.save_history(&history_path);

    let _ = client.close().await;
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

async fn execute_repl_command(
    client: &Client,
    line: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    match ReplCommand::parse(line) {
        ReplCommand::Empty => Ok(Some(String::new())),

        ReplCommand::Help => Ok(Some(HELP_TEXT.to_string())),

        ReplCommand::Quit => Ok(None),

        ReplCommand::Login { username, password } => {
            let id = client.login(&username, &password).await?;
            Ok(Some(format!(
                "{} as {} (ID: {})",
                "Logged in".green(),
                username.cyan(),
                id
            )))
        }

        ReplCommand::Register {
            username,
            password,
            nickname,
        } => {
            let message = client.register(&username, &password, &nickname).await?;
            Ok(Some(format!("{} {}", "Registered".green(), message)))
        }

        ReplCommand::Send { to, message } => {
            let id = client.send_chat(&to, &message).await?;
            Ok(Some(format!(
                "-> {} ({}): {}",
                client.directory().lookup_name(id).cyan(),
                id,
                message
            )))
        }

        ReplCommand::History { peer, limit } => {
            let entries = client.history(&peer, limit).await?;
            Ok(Some(format_history(client, &entries)))
        }

        ReplCommand::Users => {
            let users = client.online_users().await?;
            Ok(Some(format_users(&users)))
        }

        ReplCommand::Lookup { name } => {
            let user = client.lookup_user(&name).await?;
            Ok(Some(format!("{} (ID: {})", user.name.cyan(), user.id)))
        }

        ReplCommand::Whoami => {
            let identity = client.identity();
            if identity.is_authenticated() {
                Ok(Some(format!(
                    "{} (ID: {})",
                    identity.username.cyan(),
                    identity.user_id
                )))
            } else {
                Ok(Some("Not logged in".yellow().to_string()))
            }
        }

        ReplCommand::Ping => {
            let rtt = client.heartbeat().await?;
            Ok(Some(format!("{} ({:?})", "PONG".green(), rtt)))
        }

        ReplCommand::Usage(usage) => Ok(Some(format!("Usage: {}", usage))),

        ReplCommand::Unknown(cmd) => Ok(Some(format!(
            "Unknown command: {}. Type 'help' for help.",
            cmd
        ))),
    }
}
