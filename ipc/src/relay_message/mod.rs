use thiserror::Error;

pub mod types;
pub use types::*;

/// Errors raised while turning bytes into envelopes and back.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Empty payload")]
    EmptyPayload,

    #[error("Payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Serializes an envelope into the JSON bytes published on a topic.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(envelope)?)
}

/// Parses inbound topic bytes into an envelope.
pub fn decode(payload: &[u8]) -> Result<Envelope, CodecError> {
    if payload.is_empty() {
        return Err(CodecError::EmptyPayload);
    }
    let text = std::str::from_utf8(payload)?;
    Ok(serde_json::from_str(text)?)
}
