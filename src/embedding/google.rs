use super::{EmbeddingClient, EmbeddingClientError};
use crate::provider::{check_response, http_client, trim_base_url};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

const DEFAULT_GOOGLE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Generative Language embeddings client (`embedContent` / `batchEmbedContents`).
pub struct GoogleEmbedder {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct EmbedContentResponse {
    embedding: ContentEmbedding,
}

#[derive(Deserialize)]
struct BatchEmbedContentsResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Deserialize)]
struct ContentEmbedding {
    #[serde(default)]
    values: Vec<f32>,
}

impl GoogleEmbedder {
    /// Construct a client; `base_url` defaults to the public v1beta endpoint.
    pub fn new(
        base_url: Option<&str>,
        api_key: String,
        model: String,
    ) -> Result<Self, EmbeddingClientError> {
        let model = model
            .strip_prefix("models/")
            .map(str::to_string)
            .unwrap_or(model);
        Ok(Self {
            http: http_client("rusty-knowledge/embeddings")?,
            base_url: trim_base_url(base_url.unwrap_or(DEFAULT_GOOGLE_URL)),
            api_key,
            model,
        })
    }

    fn content(text: &str) -> Value {
        json!({ "parts": [{ "text": text }] })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/models/{}:{method}", self.base_url, self.model)
    }
}

#[async_trait]
impl EmbeddingClient for GoogleEmbedder {
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingClientError> {
        let response = self
            .http
            .post(self.endpoint("embedContent"))
            .query(&[("key", self.api_key.as_str())])
            .json(&json!({ "content": Self::content(text) }))
            .send()
            .await?;
        let response = check_response(response).await?;
        let payload: EmbedContentResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::InvalidResponse(format!("failed to decode Google response: {error}"))
        })?;
        Ok(payload.embedding.values)
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let expected = texts.len();
        let model_path = format!("models/{}", self.model);
        let requests: Vec<Value> = texts
            .iter()
            .map(|text| json!({ "model": model_path, "content": Self::content(text) }))
            .collect();

        let response = self
            .http
            .post(self.endpoint("batchEmbedContents"))
            .query(&[("key", self.api_key.as_str())])
            .json(&json!({ "requests": requests }))
            .send()
            .await?;
        let response = check_response(response).await?;
        let payload: BatchEmbedContentsResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::InvalidResponse(format!("failed to decode Google response: {error}"))
        })?;
        if payload.embeddings.len() != expected {
            return Err(EmbeddingClientError::InvalidResponse(format!(
                "expected {expected} embeddings, received {}",
                payload.embeddings.len()
            )));
        }
        Ok(payload
            .embeddings
            .into_iter()
            .map(|embedding| embedding.values)
            .collect())
    }

    fn supports_batch(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    #[tokio::test]
    async fn batch_call_targets_batch_endpoint_with_key() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/models/text-embedding-004:batchEmbedContents")
                    .query_param("key", "g-key");
                then.status(200).json_body(json!({
                    "embeddings": [{ "values": [0.5, 0.5] }, { "values": [0.25, 0.75] }]
                }));
            })
            .await;

        let client = GoogleEmbedder::new(
            Some(&server.base_url()),
            "g-key".into(),
            "models/text-embedding-004".into(),
        )
        .expect("client");
        let vectors = client
            .embed_batch(vec!["a".into(), "b".into()])
            .await
            .expect("vectors");

        mock.assert_async().await;
        assert_eq!(vectors[1], vec![0.25, 0.75]);
    }

    #[tokio::test]
    async fn resource_exhausted_body_is_rate_limited() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/models/text-embedding-004:embedContent");
                then.status(400)
                    .body(r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#);
            })
            .await;

        let client = GoogleEmbedder::new(
            Some(&server.base_url()),
            "g-key".into(),
            "text-embedding-004".into(),
        )
        .expect("client");
        let error = client.embed_one("a").await.unwrap_err();
        assert!(matches!(error, EmbeddingClientError::RateLimited { .. }));
    }
}
