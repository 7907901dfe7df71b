use serde::Deserialize;
use std::env;
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_COLLECTION: &str = "knowledge";
pub(crate) const DEFAULT_AGENT_ID: &str = "default-agent";
pub(crate) const DEFAULT_CHUNK_SIZE_TOKENS: usize = 500;
pub(crate) const DEFAULT_CHUNK_OVERLAP_TOKENS: usize = 100;
const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 30;
const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;
const DEFAULT_TOKENS_PER_MINUTE: u64 = 150_000;
const DEFAULT_BATCH_DELAY_MS: u64 = 100;
pub(crate) const DEFAULT_MAX_CONCURRENT_DOCUMENTS: usize = 10;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the Rusty Knowledge service.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Backend that persists documents and fragments.
    pub store_backend: StoreBackend,
    /// Base URL of the Qdrant instance that stores embeddings.
    pub qdrant_url: Option<String>,
    /// Name of the Qdrant collection used for fragment storage.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Whether grouped embedding requests are allowed when the provider supports them.
    pub embedding_batch_enabled: bool,
    /// Text-generation settings used for contextual enrichment.
    pub generation: GenerationSettings,
    /// Credentials and endpoints for hosted providers.
    pub providers: ProviderEndpoints,
    /// Chunk size expressed in tokens.
    pub chunk_size_tokens: usize,
    /// Overlap between adjacent chunks expressed in tokens.
    pub chunk_overlap_tokens: usize,
    /// Rate limits applied to provider calls during one ingestion run.
    pub limits: RateLimitSettings,
    /// Capacity of the document admission gate.
    pub max_concurrent_documents: usize,
    /// Agent identity that owns ingested documents.
    pub agent_id: String,
    /// Optional directory of documents loaded by the `ingest-dir` binary.
    pub knowledge_path: Option<String>,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Contextual enrichment settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerationSettings {
    /// Whether chunks are enriched with document context before embedding.
    pub contextual_enrichment: bool,
    /// Provider used for text generation.
    pub provider: Option<GenerationProvider>,
    /// Model identifier passed to the text-generation provider.
    pub model: Option<String>,
}

/// API keys and base URLs for hosted providers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderEndpoints {
    /// OpenAI API key.
    pub openai_api_key: Option<String>,
    /// OpenAI-compatible base URL.
    pub openai_base_url: Option<String>,
    /// Google Generative Language API key.
    pub google_api_key: Option<String>,
    /// Anthropic API key.
    pub anthropic_api_key: Option<String>,
    /// OpenRouter API key.
    pub openrouter_api_key: Option<String>,
    /// Local Ollama runtime URL.
    pub ollama_url: Option<String>,
}

/// Provider rate limits as configured by the operator.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    /// Maximum requests admitted per rolling minute.
    pub requests_per_minute: u32,
    /// Optional maximum tokens admitted per rolling minute.
    pub tokens_per_minute: Option<u64>,
    /// Ceiling on in-flight chunk requests within one batch.
    pub max_concurrent_requests: usize,
    /// Whether the sliding-window limiter is active.
    pub rate_limit_enabled: bool,
    /// Pause between batches of one document, in milliseconds.
    pub batch_delay_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            tokens_per_minute: Some(DEFAULT_TOKENS_PER_MINUTE),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            rate_limit_enabled: true,
            batch_delay_ms: DEFAULT_BATCH_DELAY_MS,
        }
    }
}

/// Storage backends available to the service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Qdrant over HTTP.
    Qdrant,
    /// Process-local store, lost on restart.
    Memory,
}

/// Supported embedding backends for the processing pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Hosted OpenAI embeddings API.
    OpenAI,
    /// Google Generative Language embeddings API.
    Google,
    /// Local Ollama runtime.
    Ollama,
    /// Deterministic hashing embedder that needs no network.
    Local,
}

/// Supported text-generation backends for contextual enrichment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationProvider {
    /// OpenAI chat completions.
    OpenAI,
    /// OpenRouter (OpenAI-compatible) chat completions.
    OpenRouter,
    /// Anthropic messages API.
    Anthropic,
    /// Local Ollama runtime.
    Ollama,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let store_backend = match load_env_optional("STORE_BACKEND") {
            Some(value) => parse_value("STORE_BACKEND", &value)?,
            None => StoreBackend::Qdrant,
        };
        let qdrant_url = load_env_optional("QDRANT_URL");
        if store_backend == StoreBackend::Qdrant && qdrant_url.is_none() {
            return Err(ConfigError::MissingVariable("QDRANT_URL".to_string()));
        }

        let generation = GenerationSettings {
            contextual_enrichment: parse_optional("CTX_KNOWLEDGE_ENABLED")?.unwrap_or(false),
            provider: load_env_optional("TEXT_PROVIDER")
                .map(|value| parse_value("TEXT_PROVIDER", &value))
                .transpose()?,
            model: load_env_optional("TEXT_MODEL"),
        };
        if generation.contextual_enrichment {
            if generation.provider.is_none() {
                return Err(ConfigError::MissingVariable("TEXT_PROVIDER".to_string()));
            }
            if generation.model.is_none() {
                return Err(ConfigError::MissingVariable("TEXT_MODEL".to_string()));
            }
        }

        Ok(Self {
            store_backend,
            qdrant_url,
            qdrant_collection_name: load_env_optional("QDRANT_COLLECTION_NAME")
                .unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            embedding_provider: parse_value("EMBEDDING_PROVIDER", &load_env("EMBEDDING_PROVIDER")?)?,
            embedding_model: load_env("EMBEDDING_MODEL")?,
            embedding_dimension: parse_value("EMBEDDING_DIMENSION", &load_env("EMBEDDING_DIMENSION")?)?,
            embedding_batch_enabled: parse_optional("EMBEDDING_BATCH_ENABLED")?.unwrap_or(true),
            generation,
            providers: ProviderEndpoints {
                openai_api_key: load_env_optional("OPENAI_API_KEY"),
                openai_base_url: load_env_optional("OPENAI_BASE_URL"),
                google_api_key: load_env_optional("GOOGLE_API_KEY"),
                anthropic_api_key: load_env_optional("ANTHROPIC_API_KEY"),
                openrouter_api_key: load_env_optional("OPENROUTER_API_KEY"),
                ollama_url: load_env_optional("OLLAMA_URL"),
            },
            chunk_size_tokens: parse_optional("CHUNK_SIZE_TOKENS")?
                .unwrap_or(DEFAULT_CHUNK_SIZE_TOKENS),
            chunk_overlap_tokens: parse_optional("CHUNK_OVERLAP_TOKENS")?
                .unwrap_or(DEFAULT_CHUNK_OVERLAP_TOKENS),
            limits: RateLimitSettings {
                requests_per_minute: parse_optional("REQUESTS_PER_MINUTE")?
                    .unwrap_or(DEFAULT_REQUESTS_PER_MINUTE),
                tokens_per_minute: parse_optional("TOKENS_PER_MINUTE")?
                    .or(Some(DEFAULT_TOKENS_PER_MINUTE))
                    .filter(|value| *value > 0),
                max_concurrent_requests: parse_optional("MAX_CONCURRENT_REQUESTS")?
                    .unwrap_or(DEFAULT_MAX_CONCURRENT_REQUESTS),
                rate_limit_enabled: parse_optional("RATE_LIMIT_ENABLED")?.unwrap_or(true),
                batch_delay_ms: parse_optional("BATCH_DELAY_MS")?
                    .unwrap_or(DEFAULT_BATCH_DELAY_MS),
            },
            max_concurrent_documents: parse_optional("MAX_CONCURRENT_DOCUMENTS")?
                .unwrap_or(DEFAULT_MAX_CONCURRENT_DOCUMENTS)
                .max(1),
            agent_id: load_env_optional("KNOWLEDGE_AGENT_ID")
                .unwrap_or_else(|| DEFAULT_AGENT_ID.to_string()),
            knowledge_path: load_env_optional("KNOWLEDGE_PATH"),
            server_port: parse_optional("SERVER_PORT")?,
        })
    }

    /// Build a configuration suitable for local experiments and tests: in-memory storage,
    /// the deterministic local embedder, and no contextual enrichment.
    pub fn local(embedding_dimension: usize) -> Self {
        Self {
            store_backend: StoreBackend::Memory,
            qdrant_url: None,
            qdrant_collection_name: DEFAULT_COLLECTION.to_string(),
            qdrant_api_key: None,
            embedding_provider: EmbeddingProvider::Local,
            embedding_model: "local-hash".to_string(),
            embedding_dimension,
            embedding_batch_enabled: true,
            generation: GenerationSettings::default(),
            providers: ProviderEndpoints::default(),
            chunk_size_tokens: DEFAULT_CHUNK_SIZE_TOKENS,
            chunk_overlap_tokens: DEFAULT_CHUNK_OVERLAP_TOKENS,
            limits: RateLimitSettings::default(),
            max_concurrent_documents: DEFAULT_MAX_CONCURRENT_DOCUMENTS,
            agent_id: DEFAULT_AGENT_ID.to_string(),
            knowledge_path: None,
            server_port: None,
        }
    }
}

/// Load `.env` (when present) and parse the configuration from the environment.
pub fn load_config() -> Result<Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        store = ?config.store_backend,
        collection = %config.qdrant_collection_name,
        embedding_provider = ?config.embedding_provider,
        embedding_model = %config.embedding_model,
        contextual_enrichment = config.generation.contextual_enrichment,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    Ok(config)
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    load_env_optional(key).ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

fn parse_optional<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| parse_value(key, &value))
        .transpose()
}

impl FromStr for StoreBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "qdrant" => Ok(Self::Qdrant),
            "memory" | "in-memory" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

impl FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "google" | "gemini" => Ok(Self::Google),
            "ollama" => Ok(Self::Ollama),
            "local" => Ok(Self::Local),
            _ => Err(()),
        }
    }
}

impl FromStr for GenerationProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "openrouter" => Ok(Self::OpenRouter),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            _ => Err(()),
        }
    }
}
