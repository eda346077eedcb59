use clap::Parser;
use std::path::PathBuf;

/// Terminal chat client for the PrivacyAI relay
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// The prompt to send; waits for the reply and exits
    #[arg(index = 1)] // Positional argument
    pub prompt: Option<String>,

    /// Enter interactive chat mode
    #[arg(short, long, default_value_t = false)]
    pub interactive: bool,

    /// Path to the configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Run without a Waku node; every reply is simulated
    #[arg(long, default_value_t = false)]
    pub demo: bool,

    /// Base URL of the nwaku REST API
    #[arg(long)]
    pub waku_rest_url: Option<String>,

    /// Seconds to wait for a remote peer before going to fallback mode
    #[arg(long)]
    pub peer_timeout: Option<u64>,

    /// Log level for diagnostics on stderr (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Enable verbose output
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}
