//! Knowledge service coordinating admission, deduplication, ingestion and retrieval.

use crate::config::{
    Config, DEFAULT_AGENT_ID, DEFAULT_CHUNK_OVERLAP_TOKENS, DEFAULT_CHUNK_SIZE_TOKENS,
    DEFAULT_MAX_CONCURRENT_DOCUMENTS,
};
use crate::embedding::{EmbeddingClient, EmbeddingClientError, build_embedder};
use crate::generation::{GenerationClientError, TextGenerationClient, build_text_generator};
use crate::ingestion::{
    ChunkSplitter, ChunkingError, Contextualizer, Document, DocumentSpec, EmbeddingGenerator,
    ExtractionError, IngestionPipeline, KnowledgeScope, PlainTextExtractor, ProgressCallback,
    ProviderLimits, TextExtractor, TokenEstimator, content_document_id,
    current_timestamp_rfc3339, with_rate_limit_retry,
};
use crate::metrics::{IngestionMetrics, MetricsSnapshot};
use crate::store::{
    DEFAULT_SCORE_THRESHOLD, FragmentQuery, KnowledgeHit, KnowledgeStore, ScopeFilter, StoreError,
    build_store,
};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Hits returned by [`KnowledgeApi::get_knowledge`] when no limit is given.
pub const DEFAULT_SEARCH_LIMIT: usize = 5;
/// Upper bound on hits returned by one search.
pub const MAX_SEARCH_LIMIT: usize = 50;

/// Errors surfaced by the knowledge service.
#[derive(Debug, Error)]
pub enum KnowledgeError {
    /// Submitted document is missing required fields.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// Search query was empty.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    /// Document text could not be extracted.
    #[error("Failed to extract document text: {0}")]
    Extraction(#[from] ExtractionError),
    /// Store operation failed.
    #[error("Knowledge store failed: {0}")]
    Store(#[from] StoreError),
    /// Query embedding failed.
    #[error("Failed to embed query: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Text-generation client could not be built.
    #[error("Text generation unavailable: {0}")]
    Generation(#[from] GenerationClientError),
    /// Chunking settings are invalid.
    #[error("Invalid chunking settings: {0}")]
    Chunking(#[from] ChunkingError),
    /// The admission gate was shut down.
    #[error("Document admission is closed")]
    AdmissionClosed,
}

/// Result of submitting a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddKnowledgeOutcome {
    /// Content-derived document id.
    pub document_id: Uuid,
    /// Chunks the document splits into.
    pub chunk_count: usize,
    /// Fragments stored for the document.
    pub fragment_count: usize,
    /// Chunk indices that failed during this submission.
    pub failed_chunks: Vec<usize>,
    /// Whether the document already existed and was not processed again.
    pub deduplicated: bool,
    /// Whether chunks were enriched with document context.
    pub contextual_enrichment: bool,
}

/// Operations exposed to the HTTP surface and the loader binary.
#[async_trait]
pub trait KnowledgeApi: Send + Sync {
    /// Ingest a document, or return the stored one when identical content was seen before.
    async fn add_knowledge(&self, spec: DocumentSpec)
    -> Result<AddKnowledgeOutcome, KnowledgeError>;

    /// Fragments most similar to `query`, constrained by `filter`.
    async fn get_knowledge(
        &self,
        query: &str,
        filter: ScopeFilter,
        limit: Option<usize>,
    ) -> Result<Vec<KnowledgeHit>, KnowledgeError>;

    /// Current ingestion counters.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// Owns the ingestion pipeline and the handles it shares with retrieval.
///
/// Build it once at startup and share it behind an `Arc`. At most `max_concurrent_documents`
/// documents are processed at a time; further submissions wait for a slot.
pub struct KnowledgeService {
    agent_id: String,
    extractor: Arc<dyn TextExtractor>,
    embedding_client: Arc<dyn EmbeddingClient>,
    store: Arc<dyn KnowledgeStore>,
    pipeline: IngestionPipeline,
    splitter: ChunkSplitter,
    admission: Semaphore,
    admission_capacity: usize,
    metrics: Arc<IngestionMetrics>,
}

/// Step-by-step construction of a [`KnowledgeService`].
pub struct KnowledgeServiceBuilder {
    store: Arc<dyn KnowledgeStore>,
    embedding_client: Arc<dyn EmbeddingClient>,
    generator: Option<Arc<dyn TextGenerationClient>>,
    extractor: Arc<dyn TextExtractor>,
    chunk_size_tokens: usize,
    chunk_overlap_tokens: usize,
    limits: ProviderLimits,
    batch_embeddings: bool,
    max_concurrent_documents: usize,
    agent_id: String,
    estimator: TokenEstimator,
    metrics: Arc<IngestionMetrics>,
}

impl KnowledgeServiceBuilder {
    /// Enable contextual enrichment through `generator`.
    pub fn generator(mut self, generator: Arc<dyn TextGenerationClient>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Replace the text extractor.
    pub fn extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Chunk size and overlap in tokens.
    pub fn chunking(mut self, chunk_size_tokens: usize, chunk_overlap_tokens: usize) -> Self {
        self.chunk_size_tokens = chunk_size_tokens;
        self.chunk_overlap_tokens = chunk_overlap_tokens;
        self
    }

    /// Provider limits applied to every ingestion run.
    pub fn limits(mut self, limits: ProviderLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Allow grouped embedding requests when the provider supports them.
    pub fn batch_embeddings(mut self, enabled: bool) -> Self {
        self.batch_embeddings = enabled;
        self
    }

    /// Capacity of the document admission gate (at least one).
    pub fn max_concurrent_documents(mut self, capacity: usize) -> Self {
        self.max_concurrent_documents = capacity.max(1);
        self
    }

    /// Agent that owns ingested documents.
    pub fn agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    /// Token estimator used for rate-limiter accounting.
    pub fn estimator(mut self, estimator: TokenEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    /// Share an existing metrics registry.
    pub fn metrics(mut self, metrics: Arc<IngestionMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Assemble the service.
    pub fn build(self) -> Result<KnowledgeService, KnowledgeError> {
        let splitter = ChunkSplitter::new(self.chunk_size_tokens, self.chunk_overlap_tokens)?;
        let contextualizer = match self.generator {
            Some(generator) => Contextualizer::new(generator, self.estimator.clone()),
            None => Contextualizer::disabled(),
        };
        let embedder = EmbeddingGenerator::new(
            Arc::clone(&self.embedding_client),
            self.batch_embeddings,
            self.estimator,
        );
        let pipeline = IngestionPipeline::new(
            splitter,
            self.limits,
            contextualizer,
            embedder,
            Arc::clone(&self.store),
        );

        Ok(KnowledgeService {
            agent_id: self.agent_id,
            extractor: self.extractor,
            embedding_client: self.embedding_client,
            store: self.store,
            pipeline,
            splitter,
            admission: Semaphore::new(self.max_concurrent_documents),
            admission_capacity: self.max_concurrent_documents,
            metrics: self.metrics,
        })
    }
}

impl KnowledgeService {
    /// Start building a service around a store and an embedding client.
    pub fn builder(
        store: Arc<dyn KnowledgeStore>,
        embedding_client: Arc<dyn EmbeddingClient>,
    ) -> KnowledgeServiceBuilder {
        KnowledgeServiceBuilder {
            store,
            embedding_client,
            generator: None,
            extractor: Arc::new(PlainTextExtractor),
            chunk_size_tokens: DEFAULT_CHUNK_SIZE_TOKENS,
            chunk_overlap_tokens: DEFAULT_CHUNK_OVERLAP_TOKENS,
            limits: ProviderLimits::default(),
            batch_embeddings: true,
            max_concurrent_documents: DEFAULT_MAX_CONCURRENT_DOCUMENTS,
            agent_id: DEFAULT_AGENT_ID.to_string(),
            estimator: TokenEstimator::heuristic(),
            metrics: Arc::new(IngestionMetrics::new()),
        }
    }

    /// Build every component selected by the configuration.
    pub async fn from_config(config: &Config) -> Result<Self, KnowledgeError> {
        tracing::info!("Initializing embedding client");
        let embedding_client: Arc<dyn EmbeddingClient> = Arc::new(build_embedder(config)?);
        let generator = build_text_generator(config)?;
        let store = build_store(config).await?;
        let tokenizer_model = config
            .generation
            .model
            .as_deref()
            .filter(|_| config.generation.contextual_enrichment)
            .unwrap_or(&config.embedding_model);

        let mut builder = Self::builder(store, embedding_client)
            .chunking(config.chunk_size_tokens, config.chunk_overlap_tokens)
            .limits(ProviderLimits::from_config(config))
            .batch_embeddings(config.embedding_batch_enabled)
            .max_concurrent_documents(config.max_concurrent_documents)
            .agent_id(config.agent_id.clone())
            .estimator(TokenEstimator::for_model(tokenizer_model));
        if let Some(generator) = generator {
            builder = builder.generator(Arc::new(generator));
        }
        let service = builder.build()?;
        tracing::info!(
            agent_id = %service.agent_id,
            admission_capacity = service.admission_capacity,
            contextual_enrichment = service.pipeline.contextual_enrichment(),
            "Knowledge service ready"
        );
        Ok(service)
    }

    /// Agent that owns documents ingested through this service.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Backing store.
    pub fn store(&self) -> &Arc<dyn KnowledgeStore> {
        &self.store
    }

    /// Shared metrics registry.
    pub fn metrics(&self) -> Arc<IngestionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Admission slots currently free.
    pub fn available_admissions(&self) -> usize {
        self.admission.available_permits()
    }

    /// Total admission slots.
    pub fn admission_capacity(&self) -> usize {
        self.admission_capacity
    }

    /// Ingest a document, reporting chunk progress to `on_progress`.
    pub async fn add_knowledge_with_progress(
        &self,
        spec: DocumentSpec,
        on_progress: Option<ProgressCallback>,
    ) -> Result<AddKnowledgeOutcome, KnowledgeError> {
        validate_spec(&spec)?;
        let document_id = content_document_id(
            &self.agent_id,
            &spec.content_type,
            &spec.filename,
            &spec.content,
        );

        if let Some(existing) = self.store.get_document(document_id).await? {
            return self.resubmitted(existing, spec).await;
        }

        let _permit = self
            .admission
            .acquire()
            .await
            .map_err(|_| KnowledgeError::AdmissionClosed)?;
        tracing::info!(
            document_id = %document_id,
            filename = %spec.filename,
            content_type = %spec.content_type,
            bytes = spec.content.len(),
            "Document admitted"
        );

        let text = self
            .extractor
            .extract(&spec.content, &spec.content_type, &spec.filename)
            .await?;
        let document = Document {
            id: document_id,
            scope: KnowledgeScope {
                agent_id: self.agent_id.clone(),
                world_id: spec.world_id,
                room_id: spec.room_id,
                entity_id: spec.entity_id,
            },
            title: spec.title.unwrap_or_else(|| spec.filename.clone()),
            content_type: spec.content_type,
            filename: spec.filename,
            text,
            metadata: spec.metadata,
            created_at: current_timestamp_rfc3339(),
        };
        self.store.create_document(&document).await?;

        let report = self.pipeline.run(&document, on_progress.as_ref()).await;
        self.metrics
            .record_document(report.saved_count as u64, report.failed_count as u64);

        Ok(AddKnowledgeOutcome {
            document_id,
            chunk_count: report.chunk_count,
            fragment_count: report.saved_count,
            failed_chunks: report.failed_chunks,
            deduplicated: false,
            contextual_enrichment: report.contextual_enrichment,
        })
    }

    async fn resubmitted(
        &self,
        existing: Document,
        spec: DocumentSpec,
    ) -> Result<AddKnowledgeOutcome, KnowledgeError> {
        if !spec.metadata.is_empty() {
            self.store
                .merge_document_metadata(existing.id, spec.metadata)
                .await?;
        }
        let fragment_count = self.store.count_fragments(existing.id).await?;
        self.metrics.record_duplicate();
        tracing::info!(
            document_id = %existing.id,
            fragment_count,
            "Document already stored; skipping ingestion"
        );
        Ok(AddKnowledgeOutcome {
            document_id: existing.id,
            chunk_count: self.splitter.split(&existing.text).len(),
            fragment_count,
            failed_chunks: Vec::new(),
            deduplicated: true,
            contextual_enrichment: self.pipeline.contextual_enrichment(),
        })
    }
}

fn validate_spec(spec: &DocumentSpec) -> Result<(), KnowledgeError> {
    if spec.filename.trim().is_empty() {
        return Err(KnowledgeError::InvalidDocument("filename is required".into()));
    }
    if spec.content_type.trim().is_empty() {
        return Err(KnowledgeError::InvalidDocument(
            "content type is required".into(),
        ));
    }
    Ok(())
}

#[async_trait]
impl KnowledgeApi for KnowledgeService {
    async fn add_knowledge(
        &self,
        spec: DocumentSpec,
    ) -> Result<AddKnowledgeOutcome, KnowledgeError> {
        self.add_knowledge_with_progress(spec, None).await
    }

    async fn get_knowledge(
        &self,
        query: &str,
        mut filter: ScopeFilter,
        limit: Option<usize>,
    ) -> Result<Vec<KnowledgeHit>, KnowledgeError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(KnowledgeError::InvalidQuery("query text is empty".into()));
        }
        if filter.agent_id.is_none() {
            filter.agent_id = Some(self.agent_id.clone());
        }
        let limit = limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT);

        let vector =
            with_rate_limit_retry("embed_query", || self.embedding_client.embed_one(query))
                .await?;
        let hits = self
            .store
            .search_fragments(FragmentQuery {
                vector,
                filter,
                limit,
                score_threshold: Some(DEFAULT_SCORE_THRESHOLD),
            })
            .await?;
        tracing::debug!(hits = hits.len(), limit, "Knowledge search completed");
        Ok(hits)
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
