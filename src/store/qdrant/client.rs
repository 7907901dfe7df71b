//! HTTP client implementing [`KnowledgeStore`] on top of Qdrant.

use super::filters::{build_scope_filter, match_value};
use super::payload::{document_from_payload, document_payload, fragment_payload, hit_from_payload};
use super::types::{CountResponse, GetPointResponse, QueryResponse, QueryResponseResult};
use crate::ingestion::{Document, Fragment};
use crate::store::{
    FragmentQuery, KnowledgeHit, KnowledgeStore, StoreError, merge_metadata,
};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Map, Value, json};
use uuid::Uuid;

const DOCUMENTS_SUFFIX: &str = "_documents";
/// Documents are looked up by id only, so their points carry a one-dimensional placeholder.
const DOCUMENT_PLACEHOLDER_VECTOR: [f32; 1] = [1.0];

/// Qdrant store holding fragments and documents in two collections.
pub struct QdrantStore {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) fragments: String,
    pub(crate) documents: String,
}

impl QdrantStore {
    /// Build a client for `url`; fragments go to `collection`, documents to
    /// `<collection>_documents`.
    pub fn new(url: &str, api_key: Option<String>, collection: &str) -> Result<Self, StoreError> {
        let client = Client::builder().user_agent("rusty-knowledge/0.1").build()?;
        let base_url = normalize_base_url(url).map_err(StoreError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            collection,
            has_api_key = api_key.as_deref().is_some_and(|value| !value.is_empty()),
            "Initialized Qdrant HTTP client"
        );
        Ok(Self {
            client,
            base_url,
            api_key,
            fragments: collection.to_string(),
            documents: format!("{collection}{DOCUMENTS_SUFFIX}"),
        })
    }

    /// Create both collections when missing and index the filterable payload fields.
    pub async fn ensure_collections(&self, vector_size: u64) -> Result<(), StoreError> {
        self.create_collection_if_not_exists(&self.fragments, vector_size, "Cosine")
            .await?;
        self.create_collection_if_not_exists(
            &self.documents,
            DOCUMENT_PLACEHOLDER_VECTOR.len() as u64,
            "Dot",
        )
        .await?;
        self.ensure_payload_indexes(&self.fragments).await
    }

    async fn create_collection_if_not_exists(
        &self,
        collection: &str,
        vector_size: u64,
        distance: &str,
    ) -> Result<(), StoreError> {
        if self.collection_exists(collection).await? {
            return Ok(());
        }

        tracing::debug!(collection, vector_size, "Creating collection");
        let body = json!({
            "vectors": {
                "size": vector_size,
                "distance": distance
            }
        });
        let response = self
            .request(Method::PUT, &format!("collections/{collection}"))
            .json(&body)
            .send()
            .await?;
        ensure_success(response, "create collection").await
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool, StoreError> {
        let response = self
            .request(Method::GET, &format!("collections/{collection}"))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = StoreError::UnexpectedStatus { status, body };
                tracing::error!(collection, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    async fn ensure_payload_indexes(&self, collection: &str) -> Result<(), StoreError> {
        for field in ["agent_id", "world_id", "room_id", "entity_id", "document_id"] {
            let body = json!({
                "field_name": field,
                "field_schema": "keyword",
            });
            let response = self
                .request(Method::PUT, &format!("collections/{collection}/index"))
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if status.is_success() || status == StatusCode::CONFLICT {
                tracing::debug!(collection, field, "Payload index ensured");
            } else {
                let body = response.text().await.unwrap_or_default();
                let error = StoreError::UnexpectedStatus { status, body };
                tracing::warn!(collection, field, error = %error, "Failed to ensure payload index");
            }
        }
        Ok(())
    }

    async fn upsert_point(
        &self,
        collection: &str,
        id: Uuid,
        vector: &[f32],
        payload: Value,
    ) -> Result<(), StoreError> {
        let response = self
            .request(Method::PUT, &format!("collections/{collection}/points"))
            .query(&[("wait", true)])
            .json(&json!({
                "points": [{ "id": id.to_string(), "vector": vector, "payload": payload }]
            }))
            .send()
            .await?;
        ensure_success(response, "upsert point").await
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut request = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            request = request.header("api-key", api_key);
        }
        request
    }
}

#[async_trait]
impl KnowledgeStore for QdrantStore {
    async fn create_document(&self, document: &Document) -> Result<Uuid, StoreError> {
        self.upsert_point(
            &self.documents,
            document.id,
            &DOCUMENT_PLACEHOLDER_VECTOR,
            document_payload(document),
        )
        .await?;
        tracing::debug!(document_id = %document.id, "Document stored");
        Ok(document.id)
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>, StoreError> {
        let response = self
            .request(
                Method::GET,
                &format!("collections/{}/points/{id}", self.documents),
            )
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::UnexpectedStatus { status, body });
        }

        let GetPointResponse { result } = response.json().await?;
        match result.and_then(|point| point.payload) {
            Some(payload) => document_from_payload(&payload).map(Some),
            None => Ok(None),
        }
    }

    async fn merge_document_metadata(
        &self,
        id: Uuid,
        metadata: Map<String, Value>,
    ) -> Result<(), StoreError> {
        let mut document = self
            .get_document(id)
            .await?
            .ok_or(StoreError::DocumentNotFound(id))?;
        merge_metadata(&mut document.metadata, metadata);

        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/payload", self.documents),
            )
            .query(&[("wait", true)])
            .json(&json!({
                "payload": { "metadata": Value::Object(document.metadata) },
                "points": [id.to_string()]
            }))
            .send()
            .await?;
        ensure_success(response, "set document metadata").await
    }

    async fn create_fragment(&self, fragment: &Fragment) -> Result<(), StoreError> {
        self.upsert_point(
            &self.fragments,
            fragment.id,
            &fragment.embedding,
            fragment_payload(fragment),
        )
        .await
    }

    async fn count_fragments(&self, document_id: Uuid) -> Result<usize, StoreError> {
        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/count", self.fragments),
            )
            .json(&json!({
                "filter": { "must": [match_value("document_id", &document_id.to_string())] },
                "exact": true
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::UnexpectedStatus { status, body });
        }
        let CountResponse { result } = response.json().await?;
        Ok(result.count)
    }

    async fn search_fragments(&self, query: FragmentQuery) -> Result<Vec<KnowledgeHit>, StoreError> {
        let mut body = Map::new();
        body.insert("query".into(), json!(query.vector));
        body.insert("limit".into(), json!(query.limit));
        body.insert("with_payload".into(), Value::Bool(true));
        if let Some(threshold) = query.score_threshold {
            body.insert("score_threshold".into(), Value::from(threshold));
        }
        if let Some(filter) = build_scope_filter(&query.filter) {
            body.insert("filter".into(), filter);
        }

        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/query", self.fragments),
            )
            .json(&Value::Object(body))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = StoreError::UnexpectedStatus { status, body };
            tracing::error!(collection = %self.fragments, error = %error, "Qdrant search failed");
            return Err(error);
        }

        let payload: QueryResponse = response.json().await?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };

        let mut hits = Vec::with_capacity(points.len());
        for point in points {
            let Some(payload) = point.payload else {
                tracing::warn!(id = %point.id, "Search hit without payload skipped");
                continue;
            };
            match hit_from_payload(&payload, point.score) {
                Ok(hit) => hits.push(hit),
                Err(error) => tracing::warn!(id = %point.id, error = %error, "Search hit skipped"),
            }
        }
        Ok(hits)
    }
}

async fn ensure_success(response: reqwest::Response, operation: &str) -> Result<(), StoreError> {
    if response.status().is_success() {
        return Ok(());
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let error = StoreError::UnexpectedStatus { status, body };
    tracing::error!(operation, error = %error, "Qdrant request failed");
    Err(error)
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}
