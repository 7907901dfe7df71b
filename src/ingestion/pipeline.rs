//! Per-document ingestion orchestration.
//!
//! A run splits the document, then walks the chunks in batches sized by the provider's
//! concurrency limit. Every batch is contextualized, embedded and persisted before the next
//! one starts, with an optional pause between batches. Chunk failures are counted in the
//! report and never abort the run.

use super::contextualizer::Contextualizer;
use super::embedder::EmbeddingGenerator;
use super::persister::persist_fragments;
use super::rate_limiter::RateLimiter;
use super::splitter::ChunkSplitter;
use super::types::{Document, IngestReport, ProviderLimits};
use crate::store::KnowledgeStore;
use std::sync::Arc;
use std::time::Duration;

/// Progress observer invoked after each batch with `(processed_chunks, total_chunks)`.
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Runs the split → contextualize → embed → persist stages for one document at a time.
#[derive(Clone)]
pub struct IngestionPipeline {
    splitter: ChunkSplitter,
    limits: ProviderLimits,
    contextualizer: Contextualizer,
    embedder: EmbeddingGenerator,
    store: Arc<dyn KnowledgeStore>,
}

impl IngestionPipeline {
    /// Assemble a pipeline from its stages.
    pub fn new(
        splitter: ChunkSplitter,
        limits: ProviderLimits,
        contextualizer: Contextualizer,
        embedder: EmbeddingGenerator,
        store: Arc<dyn KnowledgeStore>,
    ) -> Self {
        Self {
            splitter,
            limits,
            contextualizer,
            embedder,
            store,
        }
    }

    /// Provider limits applied to each run.
    pub fn limits(&self) -> &ProviderLimits {
        &self.limits
    }

    /// Whether runs enrich chunks with document context.
    pub fn contextual_enrichment(&self) -> bool {
        self.contextualizer.is_enabled()
    }

    /// Process a stored document into fragments.
    pub async fn run(&self, document: &Document, on_progress: Option<&ProgressCallback>) -> IngestReport {
        let chunks = self.splitter.split(&document.text);
        let mut report = IngestReport {
            chunk_count: chunks.len(),
            contextual_enrichment: self.contextualizer.is_enabled(),
            ..Default::default()
        };
        if chunks.is_empty() {
            tracing::warn!(document_id = %document.id, "Document produced no chunks");
            return report;
        }

        let limits = self.limits.clone();
        let limiter = RateLimiter::from_limits(&limits);
        let batch_size = limits.concurrency_limit();
        let batch_count = chunks.len().div_ceil(batch_size);
        tracing::debug!(
            document_id = %document.id,
            chunks = chunks.len(),
            batch_size,
            provider = %limits.provider,
            enrichment = report.contextual_enrichment,
            "Ingesting document"
        );

        let mut processed = 0;
        for (batch_number, batch) in chunks.chunks(batch_size).enumerate() {
            let contextualized = self
                .contextualizer
                .contextualize_batch(document, batch, &limiter)
                .await;
            let embedded = self.embedder.embed_chunks(contextualized, &limiter).await;

            for failure in embedded.iter().filter(|result| !result.success) {
                tracing::debug!(
                    document_id = %document.id,
                    chunk = failure.index,
                    reason = ?failure.error,
                    "Chunk not embedded"
                );
                report.failed_chunks.push(failure.index);
            }

            let persisted = persist_fragments(self.store.as_ref(), document, &embedded).await;
            report.saved_count += persisted.saved;
            report.failed_chunks.extend(persisted.failed);

            processed += batch.len();
            if let Some(callback) = on_progress {
                callback(processed, chunks.len());
            }

            if batch_number + 1 < batch_count && limits.batch_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(limits.batch_delay_ms)).await;
            }
        }

        report.failed_chunks.sort_unstable();
        report.failed_count = report.failed_chunks.len();
        let success_rate = report.saved_count as f64 / report.chunk_count as f64 * 100.0;
        tracing::info!(
            document_id = %document.id,
            chunks = report.chunk_count,
            saved = report.saved_count,
            failed = report.failed_count,
            success_rate = format_args!("{success_rate:.1}%"),
            enrichment = report.contextual_enrichment,
            "Document ingestion finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::LocalEmbedder;
    use crate::ingestion::splitter::TokenEstimator;
    use crate::ingestion::types::KnowledgeScope;
    use crate::store::InMemoryStore;
    use serde_json::Map;
    use std::sync::Mutex;
    use uuid::Uuid;

    fn document(text: &str) -> Document {
        Document {
            id: Uuid::from_u128(1),
            scope: KnowledgeScope {
                agent_id: "agent".into(),
                ..Default::default()
            },
            content_type: "text/plain".into(),
            filename: "a.txt".into(),
            title: "a".into(),
            text: text.into(),
            metadata: Map::new(),
            created_at: "2025-01-01T00:00:00Z".into(),
        }
    }

    fn pipeline(store: Arc<InMemoryStore>, max_concurrent: usize) -> IngestionPipeline {
        let mut limits = ProviderLimits::default();
        limits.max_concurrent_requests = max_concurrent;
        limits.rate_limit_enabled = false;
        limits.batch_delay_ms = 0;
        IngestionPipeline::new(
            ChunkSplitter::new(4, 1).unwrap(),
            limits,
            Contextualizer::disabled(),
            EmbeddingGenerator::new(
                Arc::new(LocalEmbedder::new(16).unwrap()),
                true,
                TokenEstimator::heuristic(),
            ),
            store,
        )
    }

    #[tokio::test]
    async fn empty_document_reports_zero_chunks() {
        let store = Arc::new(InMemoryStore::new());
        let report = pipeline(store.clone(), 4).run(&document("   "), None).await;
        assert_eq!(report, IngestReport::default());
        assert_eq!(store.count_fragments(Uuid::from_u128(1)).await.unwrap(), 0);
    }

    #[derive(Clone, Default)]
    struct WarningCounter(Arc<std::sync::atomic::AtomicUsize>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for WarningCounter {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            if *event.metadata().level() == tracing::Level::WARN {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }
    }

    #[tokio::test]
    async fn empty_document_logs_a_warning() {
        use tracing_subscriber::prelude::*;

        let warnings = WarningCounter::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(warnings.clone()));
        let store = Arc::new(InMemoryStore::new());

        let report = pipeline(store, 4).run(&document("\n\t "), None).await;

        assert_eq!(report.chunk_count, 0);
        assert_eq!(warnings.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn progress_is_reported_per_batch() {
        let store = Arc::new(InMemoryStore::new());
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(6);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let observer = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |done, total| {
            observer.lock().unwrap().push((done, total));
        });

        let report = pipeline(store.clone(), 3)
            .run(&document(&text), Some(&callback))
            .await;

        let progress = seen.lock().unwrap().clone();
        let total = report.chunk_count;
        assert!(total > 3);
        assert_eq!(progress.last(), Some(&(total, total)));
        assert_eq!(progress.len(), total.div_ceil(3));
        assert_eq!(report.saved_count, total);
        assert_eq!(report.failed_count, 0);
        assert_eq!(store.count_fragments(Uuid::from_u128(1)).await.unwrap(), total);
    }
}
