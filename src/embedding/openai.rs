use super::{EmbeddingClient, EmbeddingClientError};
use crate::provider::{check_response, http_client, trim_base_url};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// OpenAI (or OpenAI-compatible) `/embeddings` client.
pub struct OpenAiEmbedder {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    /// Construct a client for the given endpoint, key, and model.
    ///
    /// `dimensions` is forwarded only for `text-embedding-3*` models, which accept it.
    pub fn new(
        base_url: Option<&str>,
        api_key: String,
        model: String,
        dimensions: Option<usize>,
    ) -> Result<Self, EmbeddingClientError> {
        Ok(Self {
            http: http_client("rusty-knowledge/embeddings")?,
            base_url: trim_base_url(base_url.unwrap_or(DEFAULT_OPENAI_URL)),
            api_key,
            dimensions: dimensions.filter(|_| model.starts_with("text-embedding-3")),
            model,
        })
    }

    async fn request(&self, input: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let expected = input.len();
        let mut body = json!({
            "model": self.model,
            "input": input,
        });
        if let Some(dimensions) = self.dimensions {
            body["dimensions"] = json!(dimensions);
        }

        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = check_response(response).await?;

        let mut payload: EmbeddingsResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::InvalidResponse(format!("failed to decode OpenAI response: {error}"))
        })?;
        if payload.data.len() != expected {
            return Err(EmbeddingClientError::InvalidResponse(format!(
                "expected {expected} embeddings, received {}",
                payload.data.len()
            )));
        }
        payload.data.sort_by_key(|item| item.index);
        Ok(payload.data.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbedder {
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
