use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use privacyai_core::config::ResponderConfig;
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Common trait for everything that can answer a chat request
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Generate a reply for the user's message
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;

    /// Get the model name being used
    fn model_name(&self) -> String;
}

pub const SYSTEM_PROMPT: &str = "You are an AI assistant running on a decentralized network using the Waku protocol. \
This conversation is happening through peer-to-peer messaging, ensuring privacy and censorship resistance. \
Be helpful, informative, and acknowledge the decentralized nature of this interaction when relevant. \
Keep responses concise but informative.";

//------------------------------------------------------------------------------
// Ollama Generator
//------------------------------------------------------------------------------

/// Ollama chat API client for self-hosted models
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    base_url: String,
    model_name: String,
    http_client: Client,
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct OllamaMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
    #[serde(default)]
    total_duration: Option<u64>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Deserialize, Debug)]
struct OllamaResponseMessage {
    content: String,
}

#[derive(Deserialize, Debug)]
struct OllamaErrorResponse {
    error: String,
}

impl OllamaGenerator {
    /// Create a new Ollama generator
    pub fn new(base_url: &str, model_name: &str) -> Result<Self> {
        if base_url.trim().is_empty() {
            return Err(anyhow!("Ollama base URL cannot be empty"));
        }
        if model_name.trim().is_empty() {
            return Err(anyhow!("Ollama model name cannot be empty"));
        }

        // Local models can take a while to load and answer
        let http_client = Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model_name: model_name.to_string(),
            http_client,
        })
    }

    /// Build the Ollama API URL for chat
    fn api_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }
}

#[async_trait]
impl ResponseGenerator for OllamaGenerator {
    fn provider_name(&self) -> &'static str {
        "ollama"
    }

    fn model_name(&self) -> String {
        self.model_name.clone()
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        info!("Querying Ollama with model: {}", self.model_name);

        let request = OllamaChatRequest {
            model: &self.model_name,
            messages: vec![
                OllamaMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                OllamaMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            stream: false,
        };

        let response = self
            .http_client
            .post(self.api_url())
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send request to Ollama at {}", self.base_url))?;

        let status = response.status();
        let response_text = response.text().await.context("Failed to read Ollama response")?;

        if !status.is_success() {
            if let Ok(error_response) = serde_json::from_str::<OllamaErrorResponse>(&response_text) {
                return Err(anyhow!(
                    "Ollama API error for model {}: {}",
                    self.model_name,
                    error_response.error
                ));
            }
            return Err(anyhow!(
                "Ollama API request failed with status {}: {}",
                status,
                response_text
            ));
        }

        parse_chat_response(&response_text)
    }
}

fn parse_chat_response(body: &str) -> Result<String> {
    let response: OllamaChatResponse =
        serde_json::from_str(body).context("Failed to parse Ollama response")?;

    if let (Some(total), Some(eval_count)) = (response.total_duration, response.eval_count) {
        debug!(
            "Ollama performance: total_duration={}ns, eval_tokens={}",
            total, eval_count
        );
    }

    if response.message.content.trim().is_empty() {
        return Err(anyhow!("Ollama returned empty response"));
    }
    info!("Ollama response length: {} characters", response.message.content.len());
    Ok(response.message.content)
}

//------------------------------------------------------------------------------
// Canned Generator
//------------------------------------------------------------------------------

/// What a message appears to be about, for picking a canned reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTopic {
    Greeting,
    Technology,
    Waku,
    Privacy,
    Ai,
    General,
}

const GREETING_RESPONSES: &[&str] = &[
    "Service is unavailable. The AI service cannot connect to Ollama. Please check that Ollama is running and try again.",
    "Service is unavailable. Unable to process your request due to AI service connectivity issues.",
    "Service is unavailable. The local AI model is not accessible at this time.",
];

const TECHNOLOGY_RESPONSES: &[&str] = &[
    "Service is unavailable. Cannot provide information about technology topics as the AI service is offline.",
    "Service is unavailable. The AI inference system is currently not responding.",
    "Service is unavailable. Technical information cannot be provided without AI service connectivity.",
];

const WAKU_RESPONSES: &[&str] = &[
    "Service is unavailable. Cannot provide information about Waku protocol as the AI service is offline.",
    "Service is unavailable. The AI inference system cannot process questions about decentralized protocols at this time.",
    "Service is unavailable. Please ensure Ollama is running to get information about Waku.",
];

const PRIVACY_RESPONSES: &[&str] = &[
    "Service is unavailable. Cannot provide information about privacy features as the AI service is offline.",
    "Service is unavailable. Privacy-related questions cannot be answered without AI service connectivity.",
    "Service is unavailable. Please ensure the AI system is running to get information about security and privacy.",
];

const AI_RESPONSES: &[&str] = &[
    "Service is unavailable. Cannot provide information about AI as the Ollama service is not accessible.",
    "Service is unavailable. AI-related questions cannot be processed without local AI model connectivity.",
    "Service is unavailable. Please start Ollama service to get AI-powered responses.",
];

const GENERAL_RESPONSES: &[&str] = &[
    "Service is unavailable. Cannot process your request as the AI service is offline.",
    "Service is unavailable. The AI inference system is not responding.",
    "Service is unavailable. Please ensure Ollama is running and restart the service.",
    "Service is unavailable. Unable to provide intelligent responses without AI connectivity.",
    "Service is unavailable. The local AI model cannot be accessed at this time.",
];

impl MessageTopic {
    /// Keyword classification; earlier categories win.
    pub fn classify(message: &str) -> Self {
        let message = message.to_lowercase();
        let words: Vec<&str> = message
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let has_word = |w: &str| words.contains(&w);

        const GREETINGS: &[&str] = &["hello", "hi", "hey", "greetings"];
        const GREETING_PHRASES: &[&str] = &["good morning", "good afternoon", "good evening"];
        const TECH_KEYWORDS: &[&str] = &["how does", "what is", "explain", "technology", "protocol", "network"];

        if GREETINGS.iter().any(|g| has_word(g)) || GREETING_PHRASES.iter().any(|p| message.contains(p)) {
            MessageTopic::Greeting
        } else if TECH_KEYWORDS.iter().any(|k| message.contains(k)) {
            MessageTopic::Technology
        } else if message.contains("waku") || message.contains("decentralized") {
            MessageTopic::Waku
        } else if ["privacy", "security", "encryption"].iter().any(|k| message.contains(k)) {
            MessageTopic::Privacy
        } else if has_word("ai") || message.contains("artificial intelligence") || message.contains("machine learning") {
            MessageTopic::Ai
        } else {
            MessageTopic::General
        }
    }

    fn responses(self) -> &'static [&'static str] {
        match self {
            MessageTopic::Greeting => GREETING_RESPONSES,
            MessageTopic::Technology => TECHNOLOGY_RESPONSES,
            MessageTopic::Waku => WAKU_RESPONSES,
            MessageTopic::Privacy => PRIVACY_RESPONSES,
            MessageTopic::Ai => AI_RESPONSES,
            MessageTopic::General => GENERAL_RESPONSES,
        }
    }
}

/// Answers with a "service unavailable" text matching the message's topic,
/// after a short simulated processing delay.
#[derive(Debug, Clone)]
pub struct CannedGenerator {
    min_delay: Duration,
    max_delay: Duration,
}

impl CannedGenerator {
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay: min_delay.min(max_delay),
            max_delay: min_delay.max(max_delay),
        }
    }

    /// No simulated delay
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    fn pick_delay(&self) -> Duration {
        let min = self.min_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

#[async_trait]
impl ResponseGenerator for CannedGenerator {
    fn provider_name(&self) -> &'static str {
        "canned"
    }

    fn model_name(&self) -> String {
        "contextual-fallback".to_string()
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let delay = self.pick_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let topic = MessageTopic::classify(prompt);
        let response = topic
            .responses()
            .choose(&mut rand::thread_rng())
            .copied()
            .ok_or_else(|| anyhow!("No canned responses for {:?}", topic))?;
        debug!(?topic, "Selected canned response");
        Ok(response.to_string())
    }
}

//------------------------------------------------------------------------------
// Fallback Chain
//------------------------------------------------------------------------------

/// Tries `primary` first and answers from `fallback` when it fails
pub struct FallbackChain {
    primary: Arc<dyn ResponseGenerator>,
    fallback: Arc<dyn ResponseGenerator>,
}

impl FallbackChain {
    pub fn new(primary: Arc<dyn ResponseGenerator>, fallback: Arc<dyn ResponseGenerator>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl ResponseGenerator for FallbackChain {
    fn provider_name(&self) -> &'static str {
        self.primary.provider_name()
    }

    fn model_name(&self) -> String {
        self.primary.model_name()
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        match self.primary.generate(prompt).await {
            Ok(response) => {
                info!(provider = self.primary.provider_name(), "AI response generated");
                Ok(response)
            }
            Err(e) => {
                warn!(
                    provider = self.primary.provider_name(),
                    error = %e,
                    "Primary generator failed, using {} responses",
                    self.fallback.provider_name()
                );
                self.fallback.generate(prompt).await
            }
        }
    }
}

//------------------------------------------------------------------------------
// Factory Function
//------------------------------------------------------------------------------

/// Creates the generator selected by the configuration.
pub fn create_generator(config: &ResponderConfig) -> Result<Arc<dyn ResponseGenerator>> {
    let canned: Arc<dyn ResponseGenerator> = Arc::new(CannedGenerator::new(
        Duration::from_millis(config.canned_min_delay_ms),
        Duration::from_millis(config.canned_max_delay_ms),
    ));

    if !config.use_ollama {
        info!("Ollama disabled, answering with canned responses only");
        return Ok(canned);
    }

    info!(
        host = %config.ollama_host,
        model = %config.ollama_model,
        "Creating Ollama generator"
    );
    let ollama = OllamaGenerator::new(&config.ollama_host, &config.ollama_model)
        .context("Failed to initialize Ollama generator")?;
    Ok(Arc::new(FallbackChain::new(Arc::new(ollama), canned)))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    #[async_trait]
    impl ResponseGenerator for Failing {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Err(anyhow!("connection refused"))
        }
        fn provider_name(&self) -> &'static str {
            "failing"
        }
        fn model_name(&self) -> String {
            "none".to_string()
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(MessageTopic::classify("Hello, how does Waku work?"), MessageTopic::Greeting);
        assert_eq!(MessageTopic::classify("What is privacy in decentralized systems?"), MessageTopic::Technology);
        assert_eq!(MessageTopic::classify("Tell me about waku relays"), MessageTopic::Waku);
        assert_eq!(MessageTopic::classify("Is my ENCRYPTION safe?"), MessageTopic::Privacy);
        assert_eq!(MessageTopic::classify("Tell me about AI and machines"), MessageTopic::Ai);
        assert_eq!(MessageTopic::classify("Bake me a cake"), MessageTopic::General);
        // "hi" inside another word is not a greeting
        assert_eq!(MessageTopic::classify("this thing"), MessageTopic::General);
    }

    #[test]
    fn test_parse_chat_response() {
        let body = r#"{"model":"llama3","created_at":"2024-05-01T00:00:00Z","message":{"role":"assistant","content":"Hi there"},"done":true,"total_duration":12,"eval_count":3}"#;
        assert_eq!(parse_chat_response(body).unwrap(), "Hi there");

        let empty = r#"{"message":{"role":"assistant","content":"  "}}"#;
        assert!(parse_chat_response(empty).is_err());
        assert!(parse_chat_response("<html>").is_err());
    }

    #[test]
    fn test_chat_request_shape() {
        let request = OllamaChatRequest {
            model: "deepseek-r1:8b",
            messages: vec![
                OllamaMessage { role: "system", content: SYSTEM_PROMPT },
                OllamaMessage { role: "user", content: "Hello" },
            ],
            stream: false,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "deepseek-r1:8b");
        assert_eq!(value["stream"], false);
        assert_eq!(value["messages"][1]["role"], "user");
        assert_eq!(value["messages"][1]["content"], "Hello");
    }

    #[tokio::test]
    async fn test_canned_generator_answers_from_topic() {
        let generator = CannedGenerator::immediate();
        let response = generator.generate("hey there").await.unwrap();
        assert!(GREETING_RESPONSES.contains(&response.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_canned_generator_delay_within_window() {
        let generator = CannedGenerator::new(Duration::from_millis(1000), Duration::from_millis(3000));
        let started = tokio::time::Instant::now();
        generator.generate("anything").await.unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1000));
        assert!(elapsed <= Duration::from_millis(3001));
    }

    #[tokio::test]
    async fn test_chain_falls_back_on_error() {
        let chain = FallbackChain::new(Arc::new(Failing), Arc::new(CannedGenerator::immediate()));
        let response = chain.generate("Bake me a cake").await.unwrap();
        assert!(GENERAL_RESPONSES.contains(&response.as_str()));
        assert_eq!(chain.provider_name(), "failing");
    }

    #[test]
    fn test_factory_respects_toggle() {
        let mut config = ResponderConfig::default();
        config.use_ollama = false;
        assert_eq!(create_generator(&config).unwrap().provider_name(), "canned");

        config.use_ollama = true;
        let generator = create_generator(&config).unwrap();
        assert_eq!(generator.provider_name(), "ollama");
        assert_eq!(generator.model_name(), "deepseek-r1:8b");

        config.ollama_host = String::new();
        assert!(create_generator(&config).is_err());
    }
}
