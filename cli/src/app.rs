use anyhow::{anyhow, Context, Result};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use privacyai_cli::{ChatClient, ChatEvent, ChatMessage, ChatStore, Role, SendOutcome};
use std::collections::HashSet;
use std::io::{self, Write};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info};

use crate::output::{
    print_assistant_message, print_chat_help, print_message, print_sessions, print_status,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    New,
    Sessions,
    Switch(String),
    Delete(String),
    Status,
    Help,
    Quit,
    Unknown(String),
}

/// Returns `None` for plain chat input
fn parse_command(input: &str) -> Option<Command> {
    if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
        return Some(Command::Quit);
    }
    let rest = input.strip_prefix('/')?;
    let mut parts = rest.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default().to_lowercase();
    let arg = parts.next().map(str::trim).unwrap_or_default().to_string();

    let command = match name.as_str() {
        "new" => Command::New,
        "sessions" | "list" => Command::Sessions,
        "switch" if !arg.is_empty() => Command::Switch(arg),
        "delete" if !arg.is_empty() => Command::Delete(arg),
        "status" => Command::Status,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => Command::Unknown(input.to_string()),
    };
    Some(command)
}

/// Resolves a full session id or an unambiguous prefix of one
fn resolve_session(store: &ChatStore, needle: &str) -> Result<String> {
    let matches: Vec<String> = store
        .sessions()
        .into_iter()
        .map(|s| s.id)
        .filter(|id| id.starts_with(needle))
        .collect();
    match matches.as_slice() {
        [id] => Ok(id.clone()),
        [] => Err(anyhow!("No session matches '{}'", needle)),
        _ => Err(anyhow!("'{}' matches {} sessions, use a longer prefix", needle, matches.len())),
    }
}

fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

/// Waits for the assistant message answering `request_id` in `session_id`.
async fn wait_for_reply(
    events: &mut broadcast::Receiver<ChatEvent>,
    session_id: &str,
    request_id: &str,
    limit: Duration,
) -> Option<ChatMessage> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(ChatEvent::MessageAppended(message))
                    if message.role == Role::Assistant
                        && message.session_id == session_id
                        && message.in_reply_to.as_deref().map_or(true, |id| id == request_id) =>
                {
                    return Some(message);
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Chat event receiver lagged");
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    };
    tokio::time::timeout(limit, wait).await.ok().flatten()
}

/// Sends one message and blocks until its reply (real or simulated) is stored
async fn send_and_wait(client: &ChatClient, input: &str, limit: Duration) -> Result<Option<ChatMessage>> {
    let mut events = client.store().subscribe();
    let outcome = client.send_message(input).await?;
    let session_id = client
        .store()
        .current_session_id()
        .context("Session vanished while sending")?;

    let message = match &outcome {
        SendOutcome::Published { .. } => "Waiting for a response over Waku...",
        SendOutcome::Fallback { .. } => "Relay unavailable, preparing a simulated response...",
    };
    let spinner = spinner(message);
    let reply = wait_for_reply(&mut events, &session_id, outcome.request_id(), limit).await;
    spinner.finish_and_clear();
    Ok(reply)
}

/// Runs a single query mode, sending one prompt and displaying the reply
pub async fn run_single_query(prompt: String, client: &ChatClient, limit: Duration) -> Result<()> {
    info!("Running single query: {}", prompt);
    client.store().create_session();

    match send_and_wait(client, &prompt, limit).await {
        Ok(Some(reply)) => {
            print_assistant_message(&reply);
            Ok(())
        }
        Ok(None) => {
            error!("No reply within {:?}", limit);
            Err(anyhow!("No reply within {:?}", limit))
        }
        Err(e) => {
            error!("Failed to send message: {}", e);
            Err(e.context("Failed to send message"))
        }
    }
}

/// Runs an interactive chat session
pub async fn run_interactive_chat(client: &ChatClient, limit: Duration) -> Result<()> {
    println!("Starting interactive chat over the Waku relay.");
    println!("Type /help for commands, /quit to end the session.");
    println!();

    client.store().create_session();
    let mut late = client.store().subscribe();
    let mut shown: HashSet<String> = HashSet::new();

    loop {
        // Replies that arrived after we stopped waiting, e.g. a real answer after a simulated one
        while let Ok(event) = late.try_recv() {
            if let ChatEvent::MessageAppended(message) = event {
                let current = client.store().current_session_id();
                if message.role == Role::Assistant
                    && current.as_deref() == Some(message.session_id.as_str())
                    && shown.insert(message.id.clone())
                {
                    print_assistant_message(&message);
                }
            }
        }

        // Prompt for user input
        print!("{}: ", "You".green().bold());
        io::stdout().flush().context("Failed to flush stdout")?;

        let mut input = String::new();
        let read = io::stdin().read_line(&mut input).context("Failed to read input")?;
        if read == 0 {
            // EOF
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = parse_command(input) {
            match command {
                Command::Quit => {
                    println!("Exiting chat session.");
                    break;
                }
                Command::New => {
                    let session = client.store().create_session();
                    println!("Started session {}", session.id.blue());
                }
                Command::Sessions => {
                    let current = client.store().current_session_id();
                    print_sessions(&client.store().sessions(), current.as_deref());
                }
                Command::Switch(needle) => match resolve_session(client.store(), &needle) {
                    Ok(id) => {
                        client.store().select_session(&id)?;
                        println!("Switched to session {}", id.blue());
                        for message in client.store().messages(&id)? {
                            shown.insert(message.id.clone());
                            print_message(&message);
                        }
                    }
                    Err(e) => eprintln!("{}", e.to_string().red()),
                },
                Command::Delete(needle) => match resolve_session(client.store(), &needle) {
                    Ok(id) => {
                        client.delete_session(&id)?;
                        println!("Deleted session {}", id.blue());
                        if client.store().current_session_id().is_none() {
                            let session = client.store().create_session();
                            println!("Started session {}", session.id.blue());
                        }
                    }
                    Err(e) => eprintln!("{}", e.to_string().red()),
                },
                Command::Status => {
                    let connection = client.connection();
                    print_status(client.status(), connection.transport_name(), client.peer_count().await);
                    if let Some(reason) = connection.last_error() {
                        println!("Last error: {}", reason);
                    }
                }
                Command::Help => print_chat_help(),
                Command::Unknown(raw) => {
                    eprintln!("Unknown command: {}", raw);
                    print_chat_help();
                }
            }
            continue;
        }

        debug!("Sending message: {}", input);
        match send_and_wait(client, input, limit).await {
            Ok(Some(reply)) => {
                shown.insert(reply.id.clone());
                print_assistant_message(&reply);
            }
            Ok(None) => eprintln!("{}", "No reply arrived.".red()),
            Err(e) => {
                error!("Failed to send message: {}", e);
                eprintln!("Error: {}", e);
            }
        }

        println!(); // Add spacing between interactions
    }

    Ok(())
}
