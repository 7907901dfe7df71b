use super::{
    GenerationClientError, GenerationRequest, GenerationResponse, GenerationUsage,
    TextGenerationClient,
};
use crate::provider::{check_response, http_client, trim_base_url};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1";

/// Chat-completions client for OpenAI and OpenRouter.
pub struct OpenAiChatClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    cache_blocks: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: Option<u64>,
}

impl OpenAiChatClient {
    /// Client for the OpenAI API (or an OpenAI-compatible base URL).
    pub fn openai(
        base_url: Option<&str>,
        api_key: String,
        model: String,
    ) -> Result<Self, GenerationClientError> {
        Self::new(base_url.unwrap_or(DEFAULT_OPENAI_URL), api_key, model, false)
    }

    /// Client for OpenRouter. Claude and Gemini models routed through OpenRouter accept
    /// `cache_control` content blocks.
    pub fn openrouter(api_key: String, model: String) -> Result<Self, GenerationClientError> {
        let lowered = model.to_lowercase();
        let cache_blocks = lowered.contains("claude") || lowered.contains("gemini");
        Self::new(OPENROUTER_URL, api_key, model, cache_blocks)
    }

    fn new(
        base_url: &str,
        api_key: String,
        model: String,
        cache_blocks: bool,
    ) -> Result<Self, GenerationClientError> {
        Ok(Self {
            http: http_client("rusty-knowledge/generation")?,
            base_url: trim_base_url(base_url),
            api_key,
            model,
            cache_blocks,
        })
    }

    fn user_content(&self, request: &GenerationRequest) -> Value {
        match request.cached_document.as_deref() {
            Some(document) if self.cache_blocks => json!([
                {
                    "type": "text",
                    "text": document,
                    "cache_control": { "type": "ephemeral" }
                },
                { "type": "text", "text": request.prompt }
            ]),
            Some(document) => Value::String(format!("{document}\n\n{}", request.prompt)),
            None => Value::String(request.prompt.clone()),
        }
    }
}

#[async_trait]
impl TextGenerationClient for OpenAiChatClient {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, GenerationClientError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system.as_deref() {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": self.user_content(&request) }));

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": messages,
                "max_tokens": request.max_tokens,
                "temperature": 0.1,
            }))
            .send()
            .await?;
        let response = check_response(response).await?;

        let body: ChatResponse = response.json().await.map_err(|error| {
            GenerationClientError::InvalidResponse(format!("failed to decode chat response: {error}"))
        })?;
        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| GenerationClientError::InvalidResponse("no choices returned".into()))?;
        let usage = body
            .usage
            .map(|usage| GenerationUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                cached_tokens: usage
                    .prompt_tokens_details
                    .and_then(|details| details.cached_tokens),
            })
            .unwrap_or_default();

        Ok(GenerationResponse {
            text: text.trim().to_string(),
            usage,
        })
    }

    fn supports_prompt_caching(&self) -> bool {
        self.cache_blocks
    }
}
