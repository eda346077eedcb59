use colored::*;
use privacyai_cli::{ChatMessage, ChatSession, Role};
use privacyai_core::ConnectionStatus;

/// Print an assistant reply; simulated ones carry a visible marker
pub fn print_assistant_message(message: &ChatMessage) {
    if message.is_simulated() {
        println!(
            "{} {}: {}",
            "Assistant".blue().bold(),
            "[simulated]".yellow(),
            message.content.dimmed()
        );
    } else {
        println!("{}: {}", "Assistant".blue().bold(), message.content);
    }
}

pub fn print_message(message: &ChatMessage) {
    match message.role {
        Role::User => println!("{}: {}", "You".green().bold(), message.content),
        Role::Assistant => print_assistant_message(message),
    }
}

pub fn print_status(status: ConnectionStatus, transport: &str, peers: usize) {
    let label = match status {
        ConnectionStatus::Connected => status.to_string().green(),
        ConnectionStatus::Connecting | ConnectionStatus::Idle => status.to_string().yellow(),
        ConnectionStatus::Degraded | ConnectionStatus::Disconnected => status.to_string().red(),
    };
    println!("Status: {} ({} transport, {} peers)", label, transport, peers);
}

/// Warn that replies will be simulated
pub fn print_fallback_notice(status: ConnectionStatus) {
    println!(
        "{}",
        format!(
            "Relay {}. Running in demo mode: replies are simulated until a Waku peer is reachable.",
            status
        )
        .yellow()
    );
}

pub fn print_sessions(sessions: &[ChatSession], current: Option<&str>) {
    if sessions.is_empty() {
        println!("No chat sessions.");
        return;
    }
    println!("{}", "Sessions:".cyan());
    for session in sessions {
        let marker = if Some(session.id.as_str()) == current { "*" } else { " " };
        println!(
            " {} {}  {} ({} messages, updated {})",
            marker,
            session.id.blue(),
            session.title,
            session.message_count,
            session.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
}

pub fn print_chat_help() {
    println!("{}", "Commands:".cyan());
    println!("  /new            Start a new session");
    println!("  /sessions       List sessions");
    println!("  /switch <id>    Switch to a session (id prefix is enough)");
    println!("  /delete <id>    Delete a session");
    println!("  /status         Show relay connection status");
    println!("  /quit           Exit");
    println!();
}

/// Show usage instructions when no prompt or action is provided
pub fn print_usage_instructions() {
    println!("{}", "Usage:".yellow().bold());
    println!("  {}", "privacyai-chat \"your prompt\"".green().bold());
    println!("    Send a single message over the relay and print the reply");
    println!();
    println!("  {}", "privacyai-chat -i".green().bold());
    println!("    Start an interactive chat session");
    println!();
    println!("{}", "Options:".cyan());
    println!("  --demo                   Run without a Waku node (simulated replies)");
    println!("  --waku-rest-url <URL>    nwaku REST API base URL");
    println!("  --config <PATH>          Configuration file");
    println!("  --help                   Show this help message");
    println!();
}
