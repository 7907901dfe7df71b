use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion activity.
#[derive(Default)]
pub struct IngestionMetrics {
    documents_ingested: AtomicU64,
    documents_deduplicated: AtomicU64,
    fragments_saved: AtomicU64,
    fragments_failed: AtomicU64,
}

impl IngestionMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a processed document with its saved and failed fragment counts.
    pub fn record_document(&self, saved: u64, failed: u64) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        self.fragments_saved.fetch_add(saved, Ordering::Relaxed);
        self.fragments_failed.fetch_add(failed, Ordering::Relaxed);
    }

    /// Record a submission that matched an already stored document.
    pub fn record_duplicate(&self) {
        self.documents_deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            documents_deduplicated: self.documents_deduplicated.load(Ordering::Relaxed),
            fragments_saved: self.fragments_saved.load(Ordering::Relaxed),
            fragments_failed: self.fragments_failed.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of ingestion counters used for reporting.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents that went through the pipeline since startup.
    pub documents_ingested: u64,
    /// Submissions answered from an existing document.
    pub documents_deduplicated: u64,
    /// Fragments persisted across all documents.
    pub fragments_saved: u64,
    /// Chunks that failed contextualization, embedding, or persistence.
    pub fragments_failed: u64,
}
