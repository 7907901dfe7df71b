use super::{
    GenerationClientError, GenerationRequest, GenerationResponse, GenerationUsage,
    TextGenerationClient,
};
use crate::provider::{check_response, http_client, trim_base_url};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic messages client; the cached document is sent with `cache_control`.
pub struct AnthropicClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
}

impl AnthropicClient {
    /// Construct a client; `base_url` defaults to the public API.
    pub fn new(
        base_url: Option<&str>,
        api_key: String,
        model: String,
    ) -> Result<Self, GenerationClientError> {
        Ok(Self {
            http: http_client("rusty-knowledge/generation")?,
            base_url: trim_base_url(base_url.unwrap_or(DEFAULT_ANTHROPIC_URL)),
            api_key,
            model,
        })
    }

    fn content_blocks(request: &GenerationRequest) -> Value {
        let mut blocks = Vec::with_capacity(2);
        if let Some(document) = request.cached_document.as_deref() {
            blocks.push(json!({
                "type": "text",
                "text": document,
                "cache_control": { "type": "ephemeral" }
            }));
        }
        blocks.push(json!({ "type": "text", "text": request.prompt }));
        Value::Array(blocks)
    }
}

#[async_trait]
impl TextGenerationClient for AnthropicClient {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, GenerationClientError> {
        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "messages": [{ "role": "user", "content": Self::content_blocks(&request) }],
        });
        if let Some(system) = request.system.as_deref() {
            body["system"] = Value::String(system.to_string());
        }

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;
        let response = check_response(response).await?;

        let payload: MessagesResponse = response.json().await.map_err(|error| {
            GenerationClientError::InvalidResponse(format!(
                "failed to decode Anthropic response: {error}"
            ))
        })?;
        let text: String = payload
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        let usage = payload
            .usage
            .map(|usage| GenerationUsage {
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                cached_tokens: usage.cache_read_input_tokens,
            })
            .unwrap_or_default();

        Ok(GenerationResponse {
            text: text.trim().to_string(),
            usage,
        })
    }

    fn supports_prompt_caching(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    #[tokio::test]
    async fn messages_request_marks_document_cacheable() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/messages")
                    .header("x-api-key", "a-key")
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .body_contains("\"cache_control\"");
                then.status(200).json_body(json!({
                    "content": [{ "type": "text", "text": "Part of the pricing section." }],
                    "usage": { "input_tokens": 900, "output_tokens": 12, "cache_read_input_tokens": 850 }
                }));
            })
            .await;

        let client = AnthropicClient::new(
            Some(&server.base_url()),
            "a-key".into(),
            "claude-3-5-haiku-latest".into(),
        )
        .expect("client");
        let response = client
            .generate(GenerationRequest {
                prompt: "Situate this chunk".into(),
                system: None,
                max_tokens: 128,
                cached_document: Some("The whole document".into()),
            })
            .await
            .expect("response");

        mock.assert_async().await;
        assert_eq!(response.text, "Part of the pricing section.");
        assert_eq!(response.usage.cached_tokens, Some(850));
    }

    #[tokio::test]
    async fn overloaded_rate_limit_is_classified() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/messages");
                then.status(429).header("retry-after", "3");
            })
            .await;

        let client = AnthropicClient::new(Some(&server.base_url()), "k".into(), "m".into())
            .expect("client");
        let error = client
            .generate(GenerationRequest {
                prompt: "p".into(),
                max_tokens: 8,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            GenerationClientError::RateLimited { retry_after: Some(delay) } if delay.as_secs() == 3
        ));
    }
}
