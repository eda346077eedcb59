// Inference responder for the privacy relay:
// - Response generators (Ollama, canned fallback, chained)
// - Request loop answering each request envelope exactly once
// - Service counters for the periodic status log

pub mod generator;
pub use generator::{create_generator, CannedGenerator, FallbackChain, OllamaGenerator, ResponseGenerator};

pub mod responder;
pub use responder::{InferenceResponder, ResponderState, RetryPolicy, APOLOGY};

pub mod stats;
pub use stats::{ServiceStats, StatusReport};
