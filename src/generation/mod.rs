//! Text-generation providers used for contextual chunk enrichment.
//!
//! Each backend issues HTTP requests directly to its runtime. Providers that can cache a long
//! prompt prefix report it through [`TextGenerationClient::supports_prompt_caching`]; the
//! contextualizer then sends the document once as a cacheable block.

mod anthropic;
mod ollama;
mod openai;

pub use anthropic::AnthropicClient;
pub use ollama::OllamaGenerateClient;
pub use openai::OpenAiChatClient;

use crate::config::{Config, GenerationProvider};
use crate::provider::FailedResponse;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced while generating text.
#[derive(Debug, Error)]
pub enum GenerationClientError {
    /// Provider asked the caller to slow down.
    #[error("Text generation provider rate limited the request")]
    RateLimited {
        /// Delay announced by the provider, if any.
        retry_after: Option<Duration>,
    },
    /// Provider was unreachable or not configured.
    #[error("Text generation provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate text: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

impl From<FailedResponse> for GenerationClientError {
    fn from(failure: FailedResponse) -> Self {
        match failure {
            FailedResponse::RateLimited(retry_after) => Self::RateLimited { retry_after },
            FailedResponse::Status { status, body } => {
                Self::GenerationFailed(format!("provider returned {status}: {body}"))
            }
        }
    }
}

impl From<reqwest::Error> for GenerationClientError {
    fn from(error: reqwest::Error) -> Self {
        Self::ProviderUnavailable(error.to_string())
    }
}

/// Request payload passed to a text-generation provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Instruction (or full prompt when no document is cached).
    pub prompt: String,
    /// Optional system message.
    pub system: Option<String>,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    /// Document sent as a separate, cacheable block ahead of the prompt.
    pub cached_document: Option<String>,
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationUsage {
    /// Prompt tokens billed for the request.
    pub input_tokens: u64,
    /// Generated tokens.
    pub output_tokens: u64,
    /// Prompt tokens served from the provider cache, when reported.
    pub cached_tokens: Option<u64>,
}

/// Generated text plus usage.
#[derive(Debug, Clone, Default)]
pub struct GenerationResponse {
    /// Generated text, trimmed.
    pub text: String,
    /// Token accounting.
    pub usage: GenerationUsage,
}

/// Interface implemented by text-generation providers.
#[async_trait]
pub trait TextGenerationClient: Send + Sync {
    /// Generate text for the request.
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, GenerationClientError>;

    /// Whether `cached_document` is sent as a cacheable block instead of being inlined.
    fn supports_prompt_caching(&self) -> bool {
        false
    }
}

/// Closed set of text-generation backends selected by configuration.
pub enum TextGenerator {
    /// OpenAI or OpenRouter chat completions.
    OpenAi(OpenAiChatClient),
    /// Anthropic messages API.
    Anthropic(AnthropicClient),
    /// Local Ollama runtime.
    Ollama(OllamaGenerateClient),
}

#[async_trait]
impl TextGenerationClient for TextGenerator {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, GenerationClientError> {
        match self {
            Self::OpenAi(client) => client.generate(request).await,
            Self::Anthropic(client) => client.generate(request).await,
            Self::Ollama(client) => client.generate(request).await,
        }
    }

    fn supports_prompt_caching(&self) -> bool {
        match self {
            Self::OpenAi(client) => client.supports_prompt_caching(),
            Self::Anthropic(client) => client.supports_prompt_caching(),
            Self::Ollama(client) => client.supports_prompt_caching(),
        }
    }
}

/// Build a text-generation client when contextual enrichment is enabled.
pub fn build_text_generator(
    config: &Config,
) -> Result<Option<TextGenerator>, GenerationClientError> {
    let settings = &config.generation;
    if !settings.contextual_enrichment {
        return Ok(None);
    }
    let (Some(provider), Some(model)) = (settings.provider, settings.model.clone()) else {
        return Err(GenerationClientError::ProviderUnavailable(
            "contextual enrichment requires TEXT_PROVIDER and TEXT_MODEL".into(),
        ));
    };
    let endpoints = &config.providers;
    let missing = |key: &str| GenerationClientError::ProviderUnavailable(format!("{key} is required"));

    let client = match provider {
        GenerationProvider::OpenAI => TextGenerator::OpenAi(OpenAiChatClient::openai(
            endpoints.openai_base_url.as_deref(),
            endpoints
                .openai_api_key
                .clone()
                .ok_or_else(|| missing("OPENAI_API_KEY"))?,
            model,
        )?),
        GenerationProvider::OpenRouter => TextGenerator::OpenAi(OpenAiChatClient::openrouter(
            endpoints
                .openrouter_api_key
                .clone()
                .ok_or_else(|| missing("OPENROUTER_API_KEY"))?,
            model,
        )?),
        GenerationProvider::Anthropic => TextGenerator::Anthropic(AnthropicClient::new(
            None,
            endpoints
                .anthropic_api_key
                .clone()
                .ok_or_else(|| missing("ANTHROPIC_API_KEY"))?,
            model,
        )?),
        GenerationProvider::Ollama => TextGenerator::Ollama(OllamaGenerateClient::new(
            endpoints.ollama_url.as_deref(),
            model,
        )?),
    };
    tracing::info!(provider = ?provider, caching = client.supports_prompt_caching(), "Text generation client initialized");
    Ok(Some(client))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_enrichment_builds_nothing() {
        let config = Config::local(8);
        assert!(build_text_generator(&config).expect("ok").is_none());
    }

    #[test]
    fn anthropic_reports_prompt_caching() {
        let mut config = Config::local(8);
        config.generation.contextual_enrichment = true;
        config.generation.provider = Some(GenerationProvider::Anthropic);
        config.generation.model = Some("claude-3-5-haiku-latest".into());
        config.providers.anthropic_api_key = Some("key".into());

        let client = build_text_generator(&config)
            .expect("client")
            .expect("enabled");
        assert!(client.supports_prompt_caching());
    }

    #[test]
    fn missing_key_is_reported() {
        let mut config = Config::local(8);
        config.generation.contextual_enrichment = true;
        config.generation.provider = Some(GenerationProvider::OpenAI);
        config.generation.model = Some("gpt-4o-mini".into());

        let error = build_text_generator(&config).err().expect("missing key");
        assert!(
            matches!(error, GenerationClientError::ProviderUnavailable(ref message) if message.contains("OPENAI_API_KEY"))
        );
    }
}
