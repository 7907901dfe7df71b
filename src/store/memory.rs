use super::{FragmentQuery, KnowledgeHit, KnowledgeStore, StoreError, merge_metadata};
use crate::ingestion::{Document, Fragment};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Process-local store with brute-force cosine search.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    documents: RwLock<HashMap<Uuid, Document>>,
    fragments: RwLock<HashMap<Uuid, Fragment>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fragments stored for a document, ordered by position.
    pub async fn fragments_for(&self, document_id: Uuid) -> Vec<Fragment> {
        let fragments = self.fragments.read().await;
        let mut matching: Vec<Fragment> = fragments
            .values()
            .filter(|fragment| fragment.document_id == document_id)
            .cloned()
            .collect();
        matching.sort_by_key(|fragment| fragment.position);
        matching
    }

    /// Number of stored documents.
    pub async fn document_count(&self) -> usize {
        self.documents.read().await.len()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl KnowledgeStore for InMemoryStore {
    async fn create_document(&self, document: &Document) -> Result<Uuid, StoreError> {
        self.documents
            .write()
            .await
            .insert(document.id, document.clone());
        Ok(document.id)
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>, StoreError> {
        Ok(self.documents.read().await.get(&id).cloned())
    }

    async fn merge_document_metadata(
        &self,
        id: Uuid,
        metadata: Map<String, Value>,
    ) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        let document = documents
            .get_mut(&id)
            .ok_or(StoreError::DocumentNotFound(id))?;
        merge_metadata(&mut document.metadata, metadata);
        Ok(())
    }

    async fn create_fragment(&self, fragment: &Fragment) -> Result<(), StoreError> {
        self.fragments
            .write()
            .await
            .insert(fragment.id, fragment.clone());
        Ok(())
    }

    async fn count_fragments(&self, document_id: Uuid) -> Result<usize, StoreError> {
        Ok(self
            .fragments
            .read()
            .await
            .values()
            .filter(|fragment| fragment.document_id == document_id)
            .count())
    }

    async fn search_fragments(&self, query: FragmentQuery) -> Result<Vec<KnowledgeHit>, StoreError> {
        let fragments = self.fragments.read().await;
        let threshold = query.score_threshold.unwrap_or(f32::MIN);
        let mut hits: Vec<KnowledgeHit> = fragments
            .values()
            .filter(|fragment| query.filter.matches(&fragment.scope, fragment.document_id))
            .map(|fragment| (fragment, cosine_similarity(&query.vector, &fragment.embedding)))
            .filter(|(_, score)| *score >= threshold)
            .map(|(fragment, score)| KnowledgeHit {
                fragment_id: fragment.id,
                document_id: fragment.document_id,
                position: fragment.position,
                text: fragment.text.clone(),
                score,
                scope: fragment.scope.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(query.limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::{KnowledgeScope, fragment_id};
    use crate::store::ScopeFilter;
    use serde_json::json;

    fn document(id: u128) -> Document {
        Document {
            id: Uuid::from_u128(id),
            scope: KnowledgeScope {
                agent_id: "agent".into(),
                ..Default::default()
            },
            content_type: "text/plain".into(),
            filename: "a.txt".into(),
            title: "a".into(),
            text: "text".into(),
            metadata: json!({ "source": "upload" }).as_object().cloned().unwrap(),
            created_at: "2025-01-01T00:00:00Z".into(),
        }
    }

    fn fragment(document_id: Uuid, position: usize, embedding: Vec<f32>, room: &str) -> Fragment {
        Fragment {
            id: fragment_id(document_id, position),
            document_id,
            position,
            text: format!("fragment {position}"),
            embedding,
            scope: KnowledgeScope {
                agent_id: "agent".into(),
                room_id: Some(room.into()),
                ..Default::default()
            },
            created_at: "2025-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn cosine_similarity_handles_edge_cases() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn metadata_merge_requires_document() {
        let store = InMemoryStore::new();
        let missing = store
            .merge_document_metadata(Uuid::from_u128(1), Map::new())
            .await;
        assert!(matches!(missing, Err(StoreError::DocumentNotFound(_))));

        store.create_document(&document(1)).await.unwrap();
        let update = json!({ "tag": "faq" }).as_object().cloned().unwrap();
        store
            .merge_document_metadata(Uuid::from_u128(1), update)
            .await
            .unwrap();
        let stored = store.get_document(Uuid::from_u128(1)).await.unwrap().unwrap();
        assert_eq!(stored.metadata["source"], "upload");
        assert_eq!(stored.metadata["tag"], "faq");
    }

    #[tokio::test]
    async fn fragments_with_same_id_are_replaced() {
        let store = InMemoryStore::new();
        let document_id = Uuid::from_u128(9);
        store
            .create_fragment(&fragment(document_id, 0, vec![1.0, 0.0], "r"))
            .await
            .unwrap();
        store
            .create_fragment(&fragment(document_id, 0, vec![0.5, 0.5], "r"))
            .await
            .unwrap();
        assert_eq!(store.count_fragments(document_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn search_ranks_and_filters() {
        let store = InMemoryStore::new();
        let document_id = Uuid::from_u128(3);
        store
            .create_fragment(&fragment(document_id, 0, vec![1.0, 0.0], "a"))
            .await
            .unwrap();
        store
            .create_fragment(&fragment(document_id, 1, vec![0.8, 0.2], "a"))
            .await
            .unwrap();
        store
            .create_fragment(&fragment(document_id, 2, vec![1.0, 0.0], "b"))
            .await
            .unwrap();

        let hits = store
            .search_fragments(FragmentQuery {
                vector: vec![1.0, 0.0],
                filter: ScopeFilter {
                    room_id: Some("a".into()),
                    ..Default::default()
                },
                limit: 5,
                score_threshold: Some(0.1),
            })
            .await
            .unwrap();

        let positions: Vec<usize> = hits.iter().map(|hit| hit.position).collect();
        assert_eq!(positions, vec![0, 1]);
        assert!(hits[0].score >= hits[1].score);
    }
}
