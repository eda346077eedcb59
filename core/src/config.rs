use crate::errors::ConfigError;
use privacyai_ipc::TopicConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

pub const APP_NAME: &str = "privacyai";

/// Which transport implementation backs the relay
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// nwaku node reached over its REST API
    #[default]
    Waku,
    /// In-process network, no remote peers unless something else joins it
    Memory,
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "waku" => Ok(TransportKind::Waku),
            "memory" | "demo" => Ok(TransportKind::Memory),
            other => Err(ConfigError::InvalidValue {
                key: "transport.kind".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Waku => write!(f, "waku"),
            TransportKind::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    /// Base URL of the nwaku REST API
    pub waku_rest_url: String,
    /// How often subscribed topics are polled for new messages
    pub poll_interval_ms: u64,
    /// Per-request HTTP timeout against the node
    pub request_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Waku,
            waku_rest_url: "http://127.0.0.1:8645".to_string(),
            poll_interval_ms: 1000,
            request_timeout_secs: 30,
        }
    }
}

impl TransportConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Chat client settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub peer_timeout_secs: u64,
    /// Shorter readiness deadline used in demo mode
    pub demo_peer_timeout_secs: u64,
    pub fallback_min_delay_ms: u64,
    pub fallback_max_delay_ms: u64,
    /// How long to wait for a response after a successful publish
    pub response_timeout_secs: u64,
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            peer_timeout_secs: 30,
            demo_peer_timeout_secs: 5,
            fallback_min_delay_ms: 1000,
            fallback_max_delay_ms: 2500,
            response_timeout_secs: 120,
            log_level: "warn".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn peer_timeout(&self, demo: bool) -> Duration {
        if demo {
            Duration::from_secs(self.demo_peer_timeout_secs)
        } else {
            Duration::from_secs(self.peer_timeout_secs)
        }
    }

    pub fn fallback_window(&self) -> (Duration, Duration) {
        let min = self.fallback_min_delay_ms.min(self.fallback_max_delay_ms);
        let max = self.fallback_min_delay_ms.max(self.fallback_max_delay_ms);
        (Duration::from_millis(min), Duration::from_millis(max))
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }
}

/// Inference responder settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResponderConfig {
    pub ollama_host: String,
    pub ollama_model: String,
    /// When false only the canned generator answers
    pub use_ollama: bool,
    pub log_level: String,
    pub subscribe_attempts: u32,
    pub subscribe_backoff_ms: u64,
    pub status_interval_secs: u64,
    pub canned_min_delay_ms: u64,
    pub canned_max_delay_ms: u64,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            ollama_host: "http://localhost:11434".to_string(),
            ollama_model: "deepseek-r1:8b".to_string(),
            use_ollama: true,
            log_level: "info".to_string(),
            subscribe_attempts: 3,
            subscribe_backoff_ms: 2000,
            status_interval_secs: 30,
            canned_min_delay_ms: 1000,
            canned_max_delay_ms: 3000,
        }
    }
}

impl ResponderConfig {
    pub fn subscribe_backoff(&self) -> Duration {
        Duration::from_millis(self.subscribe_backoff_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }
}

/// Unified configuration shared by the chat client and the responder daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RelayConfig {
    pub topics: TopicConfig,
    pub transport: TransportConfig,
    pub client: ClientConfig,
    pub responder: ResponderConfig,
}

impl RelayConfig {
    /// Loads configuration from a file if it exists, otherwise returns the default config
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Full load: `.env`, then the TOML file (explicit or default location),
    /// then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => match get_default_config_file(APP_NAME) {
                Ok(default_path) => Self::load_from_file(&default_path)?,
                Err(_) => Self::default(),
            },
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from any key lookup, so tests need not touch the process env.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(topic) = lookup("WAKU_REQUEST_TOPIC") {
            self.topics.request_topic = topic;
        }
        if let Some(topic) = lookup("WAKU_RESPONSE_TOPIC") {
            self.topics.response_topic = topic;
        }
        if let Some(url) = lookup("WAKU_REST_URL") {
            self.transport.waku_rest_url = url;
        }
        if let Some(kind) = lookup("PRIVACYAI_TRANSPORT") {
            self.transport.kind = kind.parse()?;
        }
        if let Some(host) = lookup("OLLAMA_HOST") {
            self.responder.ollama_host = host;
        }
        if let Some(model) = lookup("OLLAMA_MODEL") {
            self.responder.ollama_model = model;
        }
        if let Some(flag) = lookup("USE_OLLAMA") {
            // Anything other than an explicit "false" keeps the real generator on
            self.responder.use_ollama = flag.trim() != "false";
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.responder.log_level = level;
        }
        Ok(())
    }
}

/// Helper function to get default config directory
pub fn get_default_config_dir(app_name: &str) -> Result<PathBuf, ConfigError> {
    let home_dir = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
    Ok(home_dir.join(".config").join(app_name))
}

/// Helper function to get default config file path
pub fn get_default_config_file(app_name: &str) -> Result<PathBuf, ConfigError> {
    let config_dir = get_default_config_dir(app_name)?;
    Ok(config_dir.join("config.toml"))
}
