use super::{EmbeddingClient, EmbeddingClientError};
use crate::provider::{DEFAULT_OLLAMA_URL, check_response, http_client, trim_base_url};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

/// Ollama `/api/embed` client; the endpoint accepts a list of inputs.
pub struct OllamaEmbedder {
    http: Client,
    base_url: String,
    model: String,
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    /// Construct a client for the given runtime URL and model.
    pub fn new(base_url: Option<&str>, model: String) -> Result<Self, EmbeddingClientError> {
        Ok(Self {
            http: http_client("rusty-knowledge/embeddings")?,
            base_url: trim_base_url(base_url.unwrap_or(DEFAULT_OLLAMA_URL)),
            model,
        })
    }

    async fn request(&self, input: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let expected = input.len();
        let response = self
            .http
            .post(format!("{}/api/embed", self.base_url))
            .json(&json!({ "model": self.model, "input": input }))
            .send()
            .await
            .map_err(|error| {
                EmbeddingClientError::GenerationFailed(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;
        let response = check_response(response).await?;
        let payload: EmbedResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;
        if payload.embeddings.len() != expected {
            return Err(EmbeddingClientError::InvalidResponse(format!(
                "expected {expected} embeddings, received {}",
                payload.embeddings.len()
            )));
        }
        Ok(payload.embeddings)
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbedder {
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingClientError> {
        self.request(vec![text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| EmbeddingClientError::InvalidResponse("no embedding returned".into()))
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        self.request(texts).await
    }

    fn supports_batch(&self) -> bool {
        true
    }
}
