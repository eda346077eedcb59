use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use privacyai_cli::ChatClient;
use privacyai_core::{create_transport, ConnectPolicy, ConnectionManager, ConnectionStatus, RelayConfig, TransportKind};
use std::sync::Arc;
use std::time::Duration;

mod app;
mod cli;
mod logging;
mod output;

use crate::cli::Args;
use crate::logging::{init_logging, log_error};
use crate::output::{print_fallback_notice, print_usage_instructions};

/// Headroom over the response watchdog when waiting for a reply
const REPLY_GRACE: Duration = Duration::from_secs(5);

/// Main function - Connects to the relay and chats over it
#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Load unified configuration
    let mut config = RelayConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if args.demo {
        config.transport.kind = TransportKind::Memory;
    }
    if let Some(url) = &args.waku_rest_url {
        config.transport.waku_rest_url = url.clone();
    }
    if let Some(secs) = args.peer_timeout {
        config.client.peer_timeout_secs = secs;
    }

    let log_level = if args.verbose {
        "debug".to_string()
    } else {
        args.log_level.clone().unwrap_or_else(|| config.client.log_level.clone())
    };
    init_logging(&log_level);

    if args.prompt.is_none() && !args.interactive {
        print_usage_instructions();
        return Ok(());
    }

    let transport = match create_transport(&config.transport) {
        Ok(transport) => transport,
        Err(e) => {
            log_error(&format!("Failed to initialize transport: {}", e));
            return Err(e.into());
        }
    };
    let demo = config.transport.kind == TransportKind::Memory;
    let policy = ConnectPolicy::bounded(config.client.peer_timeout(demo));
    let connection = Arc::new(ConnectionManager::new(transport, policy));
    let client = ChatClient::new(connection, config.topics.clone(), &config.client);

    println!("{}", "Connecting to Waku network...".cyan());
    let status = client.start().await;
    if status != ConnectionStatus::Connected {
        print_fallback_notice(status);
    }

    let limit = config.client.response_timeout() + REPLY_GRACE;
    let result = if args.interactive {
        crate::app::run_interactive_chat(&client, limit).await
    } else if let Some(prompt) = args.prompt.clone() {
        crate::app::run_single_query(prompt, &client, limit).await
    } else {
        Ok(())
    };

    client.shutdown().await;
    if let Err(e) = &result {
        log_error(&format!("{:#}", e));
    }
    result
}
