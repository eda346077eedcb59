use std::time::Duration;
use thiserror::Error;

/// Failures reported by a transport implementation
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Bootstrap Error: {0}")]
    Bootstrap(String),

    #[error("No remote peers became ready within {0:?}")]
    PeerTimeout(Duration),

    #[error("Transport not started")]
    NotStarted,

    #[error("Subscription Error: {0}")]
    Subscription(String),

    #[error("Send rejected: {0}")]
    Rejected(String),

    #[error("HTTP Error: {status_code} - {message}")]
    HttpError { status_code: u16, message: String },

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    #[error(transparent)]
    SerdeError(#[from] serde_json::Error),
}

/// Relay protocol errors surfaced by the connection, publisher and subscriber
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Not connected (status: {0})")]
    NotConnected(crate::connection::ConnectionStatus),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] privacyai_ipc::CodecError),
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Could not determine home directory")]
    NoHomeDir,
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
