//! Persistence for documents and fragments.
//!
//! [`KnowledgeStore`] is the seam between the ingestion pipeline and storage. Two backends
//! ship with the crate: [`InMemoryStore`] for tests and local experiments, and
//! [`QdrantStore`], which keeps fragments and documents in two Qdrant collections.

mod memory;
pub mod qdrant;

pub use memory::InMemoryStore;
pub use qdrant::QdrantStore;

use crate::config::{Config, StoreBackend};
use crate::ingestion::{Document, Fragment, KnowledgeScope};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Score below which search hits are dropped by default.
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.1;

/// Errors returned by store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid store URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Backend responded with an unexpected status code.
    #[error("Unexpected store response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the backend.
        status: StatusCode,
        /// Body of the failing response.
        body: String,
    },
    /// Stored payload could not be mapped back into a domain type.
    #[error("Invalid stored payload: {0}")]
    InvalidPayload(String),
    /// Referenced document does not exist.
    #[error("Document {0} not found")]
    DocumentNotFound(Uuid),
    /// Backend refused the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Scope constraints applied to fragment searches. Empty fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeFilter {
    /// Owning agent.
    pub agent_id: Option<String>,
    /// World scope.
    pub world_id: Option<String>,
    /// Room scope.
    pub room_id: Option<String>,
    /// Entity scope.
    pub entity_id: Option<String>,
    /// Restrict hits to one document.
    pub document_id: Option<Uuid>,
}

impl ScopeFilter {
    /// Filter matching everything owned by `agent_id`.
    pub fn for_agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            ..Default::default()
        }
    }

    /// Whether a fragment with the given scope and document passes this filter.
    pub fn matches(&self, scope: &KnowledgeScope, document_id: Uuid) -> bool {
        fn field_matches(expected: &Option<String>, actual: Option<&str>) -> bool {
            match expected.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
                Some(expected) => actual == Some(expected),
                None => true,
            }
        }

        field_matches(&self.agent_id, Some(scope.agent_id.as_str()))
            && field_matches(&self.world_id, scope.world_id.as_deref())
            && field_matches(&self.room_id, scope.room_id.as_deref())
            && field_matches(&self.entity_id, scope.entity_id.as_deref())
            && self.document_id.is_none_or(|expected| expected == document_id)
    }
}

/// Similarity query against stored fragments.
#[derive(Debug, Clone)]
pub struct FragmentQuery {
    /// Query embedding.
    pub vector: Vec<f32>,
    /// Scope constraints.
    pub filter: ScopeFilter,
    /// Maximum number of hits.
    pub limit: usize,
    /// Minimum similarity score.
    pub score_threshold: Option<f32>,
}

/// A fragment returned by a similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeHit {
    /// Fragment identifier.
    pub fragment_id: Uuid,
    /// Parent document.
    pub document_id: Uuid,
    /// Chunk position within the document.
    pub position: usize,
    /// Stored fragment text.
    pub text: String,
    /// Similarity score.
    pub score: f32,
    /// Fragment scope.
    pub scope: KnowledgeScope,
}

/// Storage operations used by ingestion and retrieval.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Store a new document and return its id.
    async fn create_document(&self, document: &Document) -> Result<Uuid, StoreError>;

    /// Look up a document by id.
    async fn get_document(&self, id: Uuid) -> Result<Option<Document>, StoreError>;

    /// Merge `metadata` into a stored document's metadata; incoming keys win.
    async fn merge_document_metadata(
        &self,
        id: Uuid,
        metadata: Map<String, Value>,
    ) -> Result<(), StoreError>;

    /// Store a fragment, replacing any fragment with the same id.
    async fn create_fragment(&self, fragment: &Fragment) -> Result<(), StoreError>;

    /// Number of fragments stored for a document.
    async fn count_fragments(&self, document_id: Uuid) -> Result<usize, StoreError>;

    /// Fragments most similar to the query vector, best first.
    async fn search_fragments(&self, query: FragmentQuery) -> Result<Vec<KnowledgeHit>, StoreError>;
}

/// Build the store selected by configuration, creating Qdrant collections when needed.
pub async fn build_store(config: &Config) -> Result<Arc<dyn KnowledgeStore>, StoreError> {
    match config.store_backend {
        StoreBackend::Memory => {
            tracing::info!("Using in-memory knowledge store");
            Ok(Arc::new(InMemoryStore::new()))
        }
        StoreBackend::Qdrant => {
            let url = config
                .qdrant_url
                .as_deref()
                .ok_or_else(|| StoreError::InvalidUrl("QDRANT_URL is not set".into()))?;
            let store = QdrantStore::new(
                url,
                config.qdrant_api_key.clone(),
                &config.qdrant_collection_name,
            )?;
            store
                .ensure_collections(config.embedding_dimension as u64)
                .await?;
            Ok(Arc::new(store))
        }
    }
}

/// Merge `incoming` into `existing`, overwriting shared keys.
pub(crate) fn merge_metadata(existing: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        existing.insert(key, value);
    }
}
