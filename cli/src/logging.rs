use colored::*;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Diagnostics go to stderr so they never interleave with chat output on stdout.
/// `RUST_LOG` wins over the configured level.
pub fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

pub fn log_error(message: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), message);
}
