use super::{
    GenerationClientError, GenerationRequest, GenerationResponse, GenerationUsage,
    TextGenerationClient,
};
use crate::provider::{DEFAULT_OLLAMA_URL, check_response, http_client, trim_base_url};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

/// Ollama `/api/generate` client. Ollama has no prompt cache, so a cached document is inlined.
pub struct OllamaGenerateClient {
    http: Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

impl OllamaGenerateClient {
    /// Construct a client for the given runtime URL and model.
    pub fn new(base_url: Option<&str>, model: String) -> Result<Self, GenerationClientError> {
        Ok(Self {
            http: http_client("rusty-knowledge/generation")?,
            base_url: trim_base_url(base_url.unwrap_or(DEFAULT_OLLAMA_URL)),
            model,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }
}

#[async_trait]
impl TextGenerationClient for OllamaGenerateClient {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, GenerationClientError> {
        let prompt = match request.cached_document.as_deref() {
            Some(document) => format!("{document}\n\n{}", request.prompt),
            None => request.prompt.clone(),
        };
        let mut payload = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": 0.1,
                "num_predict": request.max_tokens,
            }
        });
        if let Some(system) = request.system.as_deref() {
            payload["system"] = json!(system);
        }

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                GenerationClientError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(GenerationClientError::ProviderUnavailable(format!(
                "Ollama endpoint {} returned 404",
                self.endpoint()
            )));
        }
        let response = check_response(response).await?;

        let body: OllamaResponse = response.json().await.map_err(|error| {
            GenerationClientError::InvalidResponse(format!(
                "failed to decode Ollama response: {error}"
            ))
        })?;

        if !body.done {
            return Err(GenerationClientError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(GenerationResponse {
            text: body.response.trim().to_string(),
            usage: GenerationUsage {
                input_tokens: body.prompt_eval_count,
                output_tokens: body.eval_count,
                cached_tokens: None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    #[tokio::test]
    async fn ollama_client_handles_successful_response() {
        let server = MockServer::start_async().await;
        let client = OllamaGenerateClient::new(Some(&server.base_url()), "llama3".into())
            .expect("client");

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .body_contains("The document");
                then.status(200).json_body(json!({
                    "response": " Context text ",
                    "done": true,
                    "prompt_eval_count": 40,
                    "eval_count": 5
                }));
            })
            .await;

        let response = client
            .generate(GenerationRequest {
                prompt: "Situate".into(),
                system: None,
                max_tokens: 100,
                cached_document: Some("The document".into()),
            })
            .await
            .expect("response");

        mock.assert_async().await;
        assert_eq!(response.text, "Context text");
        assert_eq!(response.usage.output_tokens, 5);
    }

    #[tokio::test]
    async fn ollama_client_handles_error_status() {
        let server = MockServer::start_async().await;
        let client = OllamaGenerateClient::new(Some(&server.base_url()), "llama3".into())
            .expect("client");

        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(500).body("boom");
            })
            .await;

        let error = client
            .generate(GenerationRequest {
                prompt: "Situate".into(),
                max_tokens: 100,
                ..Default::default()
            })
            .await
            .expect_err("error response");

        assert!(
            matches!(error, GenerationClientError::GenerationFailed(ref message) if message.contains("500"))
        );
    }
}
