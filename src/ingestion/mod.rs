//! Document ingestion: chunking, contextual enrichment, embedding and persistence.

pub mod contextualizer;
pub mod embedder;
pub mod extract;
pub mod persister;
pub mod pipeline;
pub mod prompts;
pub mod rate_limiter;
pub mod retry;
pub mod splitter;
mod types;

pub use contextualizer::Contextualizer;
pub use embedder::{EMBEDDING_GROUP_SIZE, EmbeddingGenerator};
pub use extract::{ExtractionError, PlainTextExtractor, TextExtractor};
pub use persister::{PersistSummary, persist_fragments};
pub use pipeline::{IngestionPipeline, ProgressCallback};
pub use prompts::PromptStrategy;
pub use rate_limiter::RateLimiter;
pub use retry::{DEFAULT_RETRY_DELAY, RetryHint, with_rate_limit_retry};
pub use splitter::{ChunkSplitter, TokenEstimator, split_into_chunks};
pub use types::{
    Chunk, ChunkingError, ContextualizedChunk, Document, DocumentSpec, EmbeddingFailure,
    EmbeddingResult, Fragment, IngestReport, KnowledgeScope, ProviderLimits, content_document_id,
    fragment_id,
};
pub(crate) use types::current_timestamp_rfc3339;
