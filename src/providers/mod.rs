/*!
 * LLM provider implementations used by the extraction pipeline.
 *
 * This module contains client implementations for:
 * - OpenAI: chat completions API (text and vision)
 * - Anthropic: messages API (text and vision)
 * - Mock: canned answers for tests
 */

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

use crate::app_config::{ExtractionConfig, LlmProvider};
use crate::errors::ProviderError;

/// Image handed to a vision-capable model
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInput {
    /// MIME type, e.g. `image/jpeg`
    pub media_type: String,
    /// Base64-encoded bytes (standard alphabet, padded)
    pub data_base64: String,
}

impl ImageInput {
    /// Encode raw bytes
    pub fn from_bytes(media_type: impl Into<String>, bytes: &[u8]) -> Self {
        use base64::Engine;
        Self {
            media_type: media_type.into(),
            data_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    /// `data:` URL form used by OpenAI
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data_base64)
    }
}

/// Provider-neutral completion request
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// System prompt
    pub system: Option<String>,
    /// User message
    pub prompt: String,
    /// Images attached to the user message
    pub images: Vec<ImageInput>,
    /// Sampling temperature
    pub temperature: f32,
    /// Answer token limit
    pub max_tokens: u32,
    /// Ask the provider for a JSON object answer where supported
    pub json_mode: bool,
}

impl CompletionRequest {
    /// Create a request with a user prompt and default sampling
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            images: Vec::new(),
            temperature: 0.1,
            max_tokens: 2048,
            json_mode: false,
        }
    }

    /// Set the system prompt
    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Attach images
    pub fn images(mut self, images: Vec<ImageInput>) -> Self {
        self.images = images;
        self
    }

    /// Set the temperature
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the answer token limit
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Request a JSON object answer
    pub fn json_mode(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

/// Provider-neutral completion response
#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    /// Generated text
    pub text: String,
    /// Input tokens, if reported
    pub prompt_tokens: Option<u64>,
    /// Output tokens, if reported
    pub completion_tokens: Option<u64>,
}

/// Common trait for all LLM providers
///
/// Implementations translate the provider-neutral request into their own
/// wire format, so the extraction code can hold any of them behind
/// `Arc<dyn Provider>`.
#[async_trait]
pub trait Provider: Send + Sync + Debug {
    /// Lowercase provider identifier (`openai`, `anthropic`, ...)
    fn name(&self) -> &str;

    /// Model used for completions
    fn model(&self) -> &str;

    /// Complete a request using this provider
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError>;

    /// Test the connection to the provider
    async fn test_connection(&self) -> Result<(), ProviderError> {
        self.complete(CompletionRequest::new("Hello").max_tokens(10))
            .await
            .map(|_| ())
    }
}

/// Map a non-success HTTP status to a provider error
pub(crate) fn status_error(status: u16, body: String) -> ProviderError {
    match status {
        401 | 403 => ProviderError::AuthenticationError(body),
        429 => ProviderError::RateLimitExceeded(body),
        _ => ProviderError::ApiError {
            status_code: status,
            message: body,
        },
    }
}

/// Build the configured provider
pub fn create_provider(config: &ExtractionConfig) -> Arc<dyn Provider> {
    let timeout = std::time::Duration::from_secs(config.get_timeout_secs());
    match config.provider {
        LlmProvider::OpenAI => Arc::new(openai::OpenAI::new(
            config.get_api_key(),
            config.get_endpoint(),
            config.get_model(),
            timeout,
        )),
        LlmProvider::Anthropic => Arc::new(anthropic::Anthropic::new(
            config.get_api_key(),
            config.get_endpoint(),
            config.get_model(),
            timeout,
        )),
    }
}

pub mod openai;
pub mod anthropic;
pub mod mock;
