//! Fragment persistence.

use super::types::{Document, EmbeddingResult, Fragment, current_timestamp_rfc3339, fragment_id};
use crate::store::KnowledgeStore;

/// Outcome of persisting one batch of embedding results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistSummary {
    /// Fragments written to the store.
    pub saved: usize,
    /// Indices of chunks whose fragment could not be written.
    pub failed: Vec<usize>,
}

/// Write one fragment per successful embedding result.
///
/// Results without a vector are skipped; the caller already counts them as failures. A store
/// error only fails the fragment it was raised for.
pub async fn persist_fragments(
    store: &dyn KnowledgeStore,
    document: &Document,
    results: &[EmbeddingResult],
) -> PersistSummary {
    let mut summary = PersistSummary::default();
    let created_at = current_timestamp_rfc3339();

    for result in results {
        let Some(embedding) = result.embedding.as_ref().filter(|_| result.success) else {
            continue;
        };
        let fragment = Fragment {
            id: fragment_id(document.id, result.index),
            document_id: document.id,
            position: result.index,
            text: result.text.clone(),
            embedding: embedding.clone(),
            scope: document.scope.clone(),
            created_at: created_at.clone(),
        };
        match store.create_fragment(&fragment).await {
            Ok(()) => summary.saved += 1,
            Err(error) => {
                tracing::warn!(
                    document_id = %document.id,
                    chunk = result.index,
                    error = %error,
                    "Failed to persist fragment"
                );
                summary.failed.push(result.index);
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::types::{EmbeddingFailure, KnowledgeScope};
    use crate::store::InMemoryStore;
    use serde_json::Map;
    use uuid::Uuid;

    #[tokio::test]
    async fn only_successful_results_become_fragments() {
        let store = InMemoryStore::new();
        let document = Document {
            id: Uuid::from_u128(77),
            scope: KnowledgeScope {
                agent_id: "agent".into(),
                room_id: Some("room".into()),
                ..Default::default()
            },
            content_type: "text/plain".into(),
            filename: "a.txt".into(),
            title: "a".into(),
            text: "alpha beta".into(),
            metadata: Map::new(),
            created_at: "2025-01-01T00:00:00Z".into(),
        };
        let results = vec![
            EmbeddingResult::succeeded(0, "alpha".into(), vec![1.0, 0.0]),
            EmbeddingResult::failed(1, "beta".into(), EmbeddingFailure::InvalidVector),
            EmbeddingResult::succeeded(2, "gamma".into(), vec![0.5, 0.5]),
        ];

        let summary = persist_fragments(&store, &document, &results).await;
        assert_eq!(summary.saved, 2);
        assert!(summary.failed.is_empty());

        let fragments = store.fragments_for(document.id).await;
        let positions: Vec<usize> = fragments.iter().map(|fragment| fragment.position).collect();
        assert_eq!(positions, vec![0, 2]);
        assert_eq!(fragments[1].id, fragment_id(document.id, 2));
        assert_eq!(fragments[0].scope.room_id.as_deref(), Some("room"));
    }
}
