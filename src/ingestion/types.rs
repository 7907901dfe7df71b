//! Core data types shared by the ingestion stages and the store.

use crate::config::{Config, RateLimitSettings};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

const MAX_CONCURRENCY_CEILING: usize = 30;

/// Errors produced while configuring the chunk splitter.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Ingestion configured an impossible token budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
}

/// Ownership scope attached to documents and fragments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnowledgeScope {
    /// Agent that owns the knowledge.
    pub agent_id: String,
    /// Optional world the document belongs to.
    pub world_id: Option<String>,
    /// Optional room the document belongs to.
    pub room_id: Option<String>,
    /// Optional entity (user) that submitted the document.
    pub entity_id: Option<String>,
}

/// A document submitted for ingestion.
#[derive(Debug, Clone, Default)]
pub struct DocumentSpec {
    /// Raw document bytes.
    pub content: Vec<u8>,
    /// MIME type declared by the caller.
    pub content_type: String,
    /// Original filename.
    pub filename: String,
    /// Optional human-readable title (defaults to the filename).
    pub title: Option<String>,
    /// Optional world scope.
    pub world_id: Option<String>,
    /// Optional room scope.
    pub room_id: Option<String>,
    /// Optional entity scope.
    pub entity_id: Option<String>,
    /// Arbitrary caller metadata stored with the document.
    pub metadata: Map<String, Value>,
}

impl DocumentSpec {
    /// Convenience constructor for UTF-8 text documents.
    pub fn text(filename: impl Into<String>, content_type: impl Into<String>, text: &str) -> Self {
        Self {
            content: text.as_bytes().to_vec(),
            content_type: content_type.into(),
            filename: filename.into(),
            ..Default::default()
        }
    }
}

/// A stored document. Only its metadata may change after creation.
#[derive(Debug, Clone)]
pub struct Document {
    /// Content-derived identifier.
    pub id: Uuid,
    /// Ownership scope.
    pub scope: KnowledgeScope,
    /// MIME type.
    pub content_type: String,
    /// Original filename.
    pub filename: String,
    /// Display title.
    pub title: String,
    /// Extracted text.
    pub text: String,
    /// Caller metadata.
    pub metadata: Map<String, Value>,
    /// RFC3339 creation timestamp.
    pub created_at: String,
}

/// A contiguous text window of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the document's chunk sequence.
    pub index: usize,
    /// Window text.
    pub text: String,
}

/// Output of the contextualization stage for one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextualizedChunk {
    /// Original chunk index.
    pub index: usize,
    /// Enriched text, or the original chunk text when enrichment was skipped or failed.
    pub text: String,
    /// `false` tells the embedding stage to record a failure instead of embedding.
    pub success: bool,
}

impl ContextualizedChunk {
    /// Pass a chunk through without enrichment.
    pub fn passthrough(chunk: &Chunk, success: bool) -> Self {
        Self {
            index: chunk.index,
            text: chunk.text.clone(),
            success,
        }
    }
}

/// Why a chunk produced no usable embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingFailure {
    /// Contextualization failed, so the chunk was not embedded.
    ContextualizationFailed,
    /// The provider returned an empty vector or one with a zero leading component.
    InvalidVector,
    /// The provider call failed.
    Transport(String),
}

impl fmt::Display for EmbeddingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContextualizationFailed => f.write_str("contextualization failed"),
            Self::InvalidVector => f.write_str("provider returned an empty or zero vector"),
            Self::Transport(message) => write!(f, "embedding call failed: {message}"),
        }
    }
}

/// Output of the embedding stage for one chunk.
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// Original chunk index.
    pub index: usize,
    /// Vector, when embedding succeeded.
    pub embedding: Option<Vec<f32>>,
    /// Whether a usable vector was produced.
    pub success: bool,
    /// Text that was (or would have been) embedded.
    pub text: String,
    /// Failure detail when `success` is false.
    pub error: Option<EmbeddingFailure>,
}

impl EmbeddingResult {
    pub(crate) fn succeeded(index: usize, text: String, embedding: Vec<f32>) -> Self {
        Self {
            index,
            embedding: Some(embedding),
            success: true,
            text,
            error: None,
        }
    }

    pub(crate) fn failed(index: usize, text: String, error: EmbeddingFailure) -> Self {
        Self {
            index,
            embedding: None,
            success: false,
            text,
            error: Some(error),
        }
    }
}

/// Persisted, embedded representation of one chunk.
#[derive(Debug, Clone)]
pub struct Fragment {
    /// Identifier derived from the document id and position.
    pub id: Uuid,
    /// Parent document.
    pub document_id: Uuid,
    /// Original chunk index.
    pub position: usize,
    /// Embedded text (contextualized when enrichment was active).
    pub text: String,
    /// Embedding vector.
    pub embedding: Vec<f32>,
    /// Scope inherited from the document.
    pub scope: KnowledgeScope,
    /// RFC3339 creation timestamp.
    pub created_at: String,
}

/// Rate and concurrency limits for one provider, read once per ingestion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderLimits {
    /// Requests admitted per rolling minute.
    pub requests_per_minute: u32,
    /// Tokens admitted per rolling minute, when limited.
    pub tokens_per_minute: Option<u64>,
    /// Ceiling on chunk requests in flight within a batch.
    pub max_concurrent_requests: usize,
    /// Whether the rate limiter is active.
    pub rate_limit_enabled: bool,
    /// Pause between batches in milliseconds (0 disables pacing).
    pub batch_delay_ms: u64,
    /// Provider these limits apply to.
    pub provider: String,
}

impl ProviderLimits {
    /// Build limits from operator settings for the named provider.
    pub fn new(settings: &RateLimitSettings, provider: impl Into<String>) -> Self {
        Self {
            requests_per_minute: settings.requests_per_minute,
            tokens_per_minute: settings.tokens_per_minute,
            max_concurrent_requests: settings.max_concurrent_requests,
            rate_limit_enabled: settings.rate_limit_enabled,
            batch_delay_ms: settings.batch_delay_ms,
            provider: provider.into(),
        }
    }

    /// Limits for the provider chunk calls go to: the text-generation provider when
    /// enrichment is on, the embedding provider otherwise.
    pub fn from_config(config: &Config) -> Self {
        let provider = match (config.generation.contextual_enrichment, config.generation.provider) {
            (true, Some(provider)) => format!("{provider:?}"),
            _ => format!("{:?}", config.embedding_provider),
        };
        Self::new(&config.limits, provider.to_lowercase())
    }

    /// Number of chunks processed per batch.
    pub fn concurrency_limit(&self) -> usize {
        self.max_concurrent_requests.clamp(1, MAX_CONCURRENCY_CEILING)
    }
}

impl Default for ProviderLimits {
    fn default() -> Self {
        Self::new(&RateLimitSettings::default(), "default")
    }
}

/// Outcome of one pipeline run over a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Chunks produced by the splitter.
    pub chunk_count: usize,
    /// Fragments persisted.
    pub saved_count: usize,
    /// Chunks that failed at any stage.
    pub failed_count: usize,
    /// Indices of the failed chunks, ascending.
    pub failed_chunks: Vec<usize>,
    /// Whether contextual enrichment was active for the run.
    pub contextual_enrichment: bool,
}

/// Content-derived document identifier; identical submissions map to the same id.
pub fn content_document_id(
    agent_id: &str,
    content_type: &str,
    filename: &str,
    content: &[u8],
) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(content_type.as_bytes());
    hasher.update([0]);
    hasher.update(filename.as_bytes());
    hasher.update([0]);
    hasher.update(content);
    let digest = hex::encode(hasher.finalize());
    let namespace = Uuid::new_v5(&Uuid::NAMESPACE_OID, agent_id.as_bytes());
    Uuid::new_v5(&namespace, digest.as_bytes())
}

/// Fragment identifier; re-processing a chunk overwrites instead of duplicating.
pub fn fragment_id(document_id: Uuid, position: usize) -> Uuid {
    Uuid::new_v5(&document_id, position.to_string().as_bytes())
}

/// Current timestamp formatted for storage.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_id_is_stable_and_content_sensitive() {
        let first = content_document_id("agent", "text/plain", "a.txt", b"hello");
        let again = content_document_id("agent", "text/plain", "a.txt", b"hello");
        let renamed = content_document_id("agent", "text/plain", "b.txt", b"hello");
        let other_agent = content_document_id("other", "text/plain", "a.txt", b"hello");
        assert_eq!(first, again);
        assert_ne!(first, renamed);
        assert_ne!(first, other_agent);
    }

    #[test]
    fn fragment_ids_differ_by_position() {
        let document = content_document_id("agent", "text/plain", "a.txt", b"hello");
        assert_eq!(fragment_id(document, 3), fragment_id(document, 3));
        assert_ne!(fragment_id(document, 3), fragment_id(document, 4));
    }

    #[test]
    fn concurrency_limit_is_clamped() {
        let mut limits = ProviderLimits::default();
        limits.max_concurrent_requests = 0;
        assert_eq!(limits.concurrency_limit(), 1);
        limits.max_concurrent_requests = 500;
        assert_eq!(limits.concurrency_limit(), 30);
    }

    #[test]
    fn limits_follow_generation_provider_when_enriching() {
        let mut config = Config::local(8);
        assert_eq!(ProviderLimits::from_config(&config).provider, "local");
        config.generation.contextual_enrichment = true;
        config.generation.provider = Some(crate::config::GenerationProvider::Anthropic);
        assert_eq!(ProviderLimits::from_config(&config).provider, "anthropic");
    }

    #[test]
    fn timestamp_is_rfc3339_like() {
        let ts = current_timestamp_rfc3339();
        assert!(ts.contains('T') && ts.ends_with('Z'));
    }
}
