use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use privacyai_core::{create_transport, ConnectPolicy, ConnectionManager, ConnectionStatus, RelayConfig, TransportKind};
use privacyai_responder::{create_generator, InferenceResponder, ResponderState, RetryPolicy};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[clap(
    name = "responder-daemon",
    about = "Inference responder for the PrivacyAI relay",
    version
)]
struct Args {
    #[clap(short, long)]
    /// Path to the configuration file
    config: Option<PathBuf>,

    #[clap(long, env = "LOG_LEVEL")]
    /// Log level (trace, debug, info, warn, error)
    log_level: Option<String>,

    #[clap(long)]
    /// Ollama base URL
    ollama_host: Option<String>,

    #[clap(long)]
    /// Ollama model to query
    ollama_model: Option<String>,

    #[clap(long)]
    /// Answer with canned responses only
    no_ollama: bool,

    #[clap(long)]
    /// Base URL of the nwaku REST API
    waku_rest_url: Option<String>,

    #[clap(long)]
    /// Content topic to read requests from
    request_topic: Option<String>,

    #[clap(long)]
    /// Content topic to publish responses on
    response_topic: Option<String>,
}

impl Args {
    fn apply_to(&self, config: &mut RelayConfig) {
        if let Some(level) = &self.log_level {
            config.responder.log_level = level.clone();
        }
        if let Some(host) = &self.ollama_host {
            config.responder.ollama_host = host.clone();
        }
        if let Some(model) = &self.ollama_model {
            config.responder.ollama_model = model.clone();
        }
        if self.no_ollama {
            config.responder.use_ollama = false;
        }
        if let Some(url) = &self.waku_rest_url {
            config.transport.waku_rest_url = url.clone();
        }
        if let Some(topic) = &self.request_topic {
            config.topics.request_topic = topic.clone();
        }
        if let Some(topic) = &self.response_topic {
            config.topics.response_topic = topic.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = RelayConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply_to(&mut config);

    // Initialize tracing (logging)
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.responder.log_level)))
        .init();

    info!("Starting inference responder...");
    info!(
        request_topic = %config.topics.request_topic,
        response_topic = %config.topics.response_topic,
        "Configured content topics"
    );

    if config.transport.kind == TransportKind::Memory {
        bail!("The memory transport only links nodes inside one process; use the waku transport for the daemon");
    }

    let generator = create_generator(&config.responder).context("Failed to create response generator")?;
    info!(
        provider = generator.provider_name(),
        model = %generator.model_name(),
        "Response generator initialized"
    );

    let transport = create_transport(&config.transport).context("Failed to create transport")?;
    let connection = Arc::new(ConnectionManager::new(transport, ConnectPolicy::unbounded()));

    info!(transport = connection.transport_name(), "Connecting to relay network...");
    let status = connection.connect().await;
    if status != ConnectionStatus::Connected {
        let reason = connection.last_error().unwrap_or_else(|| status.to_string());
        error!(%status, "Failed to connect to relay network: {}", reason);
        return Err(anyhow!("Failed to connect to relay network: {}", reason));
    }
    info!(peers = connection.peer_count().await, "Connected to relay network");

    let retry = RetryPolicy {
        attempts: config.responder.subscribe_attempts,
        backoff: config.responder.subscribe_backoff(),
    };
    let responder = Arc::new(InferenceResponder::new(
        Arc::clone(&connection),
        generator,
        &config.topics,
        retry,
    ));

    if responder.start().await == ResponderState::NotListening {
        warn!("Responder is not listening for requests; status reports continue until shutdown");
    }
    let reporter = responder.spawn_status_reporter(config.responder.status_interval());

    wait_for_shutdown_signal().await?;
    info!("Shutting down inference responder...");

    reporter.abort();
    connection.shutdown().await;
    let stats = responder.stats();
    info!(
        received = stats.received(),
        published = stats.published(),
        "Inference responder stopped"
    );
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl-C")?,
        _ = terminate.recv() => info!("Received SIGTERM"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")
}
