//! Embedding providers.
//!
//! Every backend implements [`EmbeddingClient`]. The configured backend is one of the
//! variants of [`Embedder`], built once by [`build_embedder`] and owned by the service.

mod google;
mod local;
mod ollama;
mod openai;

pub use google::GoogleEmbedder;
pub use local::LocalEmbedder;
pub use ollama::OllamaEmbedder;
pub use openai::OpenAiEmbedder;

use crate::config::{Config, EmbeddingProvider};
use crate::provider::FailedResponse;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider asked the caller to slow down.
    #[error("Embedding provider rate limited the request")]
    RateLimited {
        /// Delay announced by the provider, if any.
        retry_after: Option<Duration>,
    },
    /// Transport failed before a response arrived.
    #[error("Embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider response could not be interpreted.
    #[error("Malformed embedding response: {0}")]
    InvalidResponse(String),
    /// Required credentials or settings are missing.
    #[error("Embedding provider misconfigured: {0}")]
    Misconfigured(String),
}

impl From<FailedResponse> for EmbeddingClientError {
    fn from(failure: FailedResponse) -> Self {
        match failure {
            FailedResponse::RateLimited(retry_after) => Self::RateLimited { retry_after },
            FailedResponse::Status { status, body } => {
                Self::GenerationFailed(format!("provider returned {status}: {body}"))
            }
        }
    }
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce one embedding vector for a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingClientError>;

    /// Produce one embedding vector per text, in input order.
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;

    /// Whether [`EmbeddingClient::embed_batch`] is backed by a single provider call.
    fn supports_batch(&self) -> bool;
}

/// Closed set of embedding backends selected by configuration.
pub enum Embedder {
    /// Hosted OpenAI (or compatible) embeddings.
    OpenAI(OpenAiEmbedder),
    /// Google Generative Language embeddings.
    Google(GoogleEmbedder),
    /// Local Ollama runtime.
    Ollama(OllamaEmbedder),
    /// Deterministic offline embedder.
    Local(LocalEmbedder),
}

#[async_trait]
impl EmbeddingClient for Embedder {
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingClientError> {
        match self {
            Self::OpenAI(client) => client.embed_one(text).await,
            Self::Google(client) => client.embed_one(text).await,
            Self::Ollama(client) => client.embed_one(text).await,
            Self::Local(client) => client.embed_one(text).await,
        }
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        match self {
            Self::OpenAI(client) => client.embed_batch(texts).await,
            Self::Google(client) => client.embed_batch(texts).await,
            Self::Ollama(client) => client.embed_batch(texts).await,
            Self::Local(client) => client.embed_batch(texts).await,
        }
    }

    fn supports_batch(&self) -> bool {
        match self {
            Self::OpenAI(client) => client.supports_batch(),
            Self::Google(client) => client.supports_batch(),
            Self::Ollama(client) => client.supports_batch(),
            Self::Local(client) => client.supports_batch(),
        }
    }
}

/// Build the embedding backend selected by the configuration.
pub fn build_embedder(config: &Config) -> Result<Embedder, EmbeddingClientError> {
    let model = config.embedding_model.clone();
    let dimension = config.embedding_dimension;
    tracing::debug!(
        provider = ?config.embedding_provider,
        model = %model,
        dimension,
        "Building embedding client"
    );

    let embedder = match config.embedding_provider {
        EmbeddingProvider::OpenAI => {
            let api_key = config.providers.openai_api_key.clone().ok_or_else(|| {
                EmbeddingClientError::Misconfigured("OPENAI_API_KEY is required".into())
            })?;
            Embedder::OpenAI(OpenAiEmbedder::new(
                config.providers.openai_base_url.as_deref(),
                api_key,
                model,
                Some(dimension),
            )?)
        }
        EmbeddingProvider::Google => {
            let api_key = config.providers.google_api_key.clone().ok_or_else(|| {
                EmbeddingClientError::Misconfigured("GOOGLE_API_KEY is required".into())
            })?;
            Embedder::Google(GoogleEmbedder::new(None, api_key, model)?)
        }
        EmbeddingProvider::Ollama => Embedder::Ollama(OllamaEmbedder::new(
            config.providers.ollama_url.as_deref(),
            model,
        )?),
        EmbeddingProvider::Local => Embedder::Local(LocalEmbedder::new(dimension)?),
    };
    Ok(embedder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_without_key_is_misconfigured() {
        let mut config = Config::local(8);
        config.embedding_provider = EmbeddingProvider::OpenAI;
        let error = build_embedder(&config).err().expect("missing key");
        assert!(matches!(error, EmbeddingClientError::Misconfigured(_)));
    }

    #[tokio::test]
    async fn local_variant_dispatches_to_hashing_embedder() {
        let embedder = build_embedder(&Config::local(8)).expect("local embedder");
        assert!(embedder.supports_batch());
        let vectors = embedder
            .embed_batch(vec!["alpha".into(), "beta".into()])
            .await
            .expect("vectors");
        assert_eq!(vectors.len(), 2);
        assert!(vectors.iter().all(|vector| vector.len() == 8));
    }
}
