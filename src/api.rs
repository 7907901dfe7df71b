//! HTTP surface for Rusty Knowledge.
//!
//! - `POST /knowledge` – Submit a document as UTF-8 `content` or `content_base64`, with its
//!   filename, content type, optional title, scope and metadata. Returns the document id and
//!   fragment counters; identical resubmissions return the stored document.
//! - `POST /knowledge/search` – Embed a query and return the closest fragments within a scope.
//! - `GET /metrics` – Ingestion counters.
//! - `GET /commands` – Machine-readable command catalog for discovery by tools and hosts.

use crate::ingestion::{DocumentSpec, ExtractionError};
use crate::service::{KnowledgeApi, KnowledgeError};
use crate::store::ScopeFilter;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use uuid::Uuid;

/// Build the HTTP router exposing the knowledge API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: KnowledgeApi + 'static,
{
    Router::new()
        .route("/knowledge", post(add_knowledge::<S>))
        .route("/knowledge/search", post(search_knowledge::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .with_state(service)
}

/// Request body for `POST /knowledge`.
#[derive(Deserialize)]
struct AddKnowledgeRequest {
    /// Document text, for textual uploads.
    #[serde(default)]
    content: Option<String>,
    /// Base64-encoded document bytes; takes precedence over `content`.
    #[serde(default)]
    content_base64: Option<String>,
    filename: String,
    content_type: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    world_id: Option<String>,
    #[serde(default)]
    room_id: Option<String>,
    #[serde(default)]
    entity_id: Option<String>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

/// Success response for `POST /knowledge`.
#[derive(Serialize)]
struct AddKnowledgeResponse {
    document_id: Uuid,
    chunk_count: usize,
    fragment_count: usize,
    failed_chunks: Vec<usize>,
    deduplicated: bool,
    contextual_enrichment: bool,
}

/// Ingest one document.
async fn add_knowledge<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<AddKnowledgeRequest>,
) -> Result<Json<AddKnowledgeResponse>, AppError>
where
    S: KnowledgeApi,
{
    let content = match (request.content_base64, request.content) {
        (Some(encoded), _) => STANDARD
            .decode(encoded.trim())
            .map_err(|err| AppError::BadRequest(format!("content_base64 is not valid: {err}")))?,
        (None, Some(text)) => text.into_bytes(),
        (None, None) => {
            return Err(AppError::BadRequest(
                "either content or content_base64 is required".into(),
            ));
        }
    };

    let spec = DocumentSpec {
        content,
        content_type: request.content_type,
        filename: request.filename,
        title: request.title,
        world_id: request.world_id,
        room_id: request.room_id,
        entity_id: request.entity_id,
        metadata: request.metadata,
    };
    let outcome = service.add_knowledge(spec).await?;
    tracing::info!(
        document_id = %outcome.document_id,
        chunks = outcome.chunk_count,
        fragments = outcome.fragment_count,
        failed = outcome.failed_chunks.len(),
        deduplicated = outcome.deduplicated,
        "Knowledge request completed"
    );
    Ok(Json(AddKnowledgeResponse {
        document_id: outcome.document_id,
        chunk_count: outcome.chunk_count,
        fragment_count: outcome.fragment_count,
        failed_chunks: outcome.failed_chunks,
        deduplicated: outcome.deduplicated,
        contextual_enrichment: outcome.contextual_enrichment,
    }))
}

/// Request body for `POST /knowledge/search`.
#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    world_id: Option<String>,
    #[serde(default)]
    room_id: Option<String>,
    #[serde(default)]
    entity_id: Option<String>,
    #[serde(default)]
    document_id: Option<Uuid>,
}

#[derive(Serialize)]
struct SearchHit {
    fragment_id: Uuid,
    document_id: Uuid,
    position: usize,
    text: String,
    score: f32,
    agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    world_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    room_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entity_id: Option<String>,
}

#[derive(Serialize)]
struct SearchResponse {
    hits: Vec<SearchHit>,
}

async fn search_knowledge<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError>
where
    S: KnowledgeApi,
{
    let filter = ScopeFilter {
        agent_id: request.agent_id,
        world_id: request.world_id,
        room_id: request.room_id,
        entity_id: request.entity_id,
        document_id: request.document_id,
    };
    let hits = service
        .get_knowledge(&request.query, filter, request.limit)
        .await?;
    let hits = hits
        .into_iter()
        .map(|hit| SearchHit {
            fragment_id: hit.fragment_id,
            document_id: hit.document_id,
            position: hit.position,
            text: hit.text,
            score: hit.score,
            agent_id: hit.scope.agent_id,
            world_id: hit.scope.world_id,
            room_id: hit.scope.room_id,
            entity_id: hit.scope.entity_id,
        })
        .collect();
    Ok(Json(SearchResponse { hits }))
}

/// Return the ingestion counters.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<crate::metrics::MetricsSnapshot>
where
    S: KnowledgeApi,
{
    Json(service.metrics_snapshot())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<Value>,
}

#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery in hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "add_knowledge",
                method: "POST",
                path: "/knowledge",
                description: "Split a document into chunks, enrich them with document context when enabled, embed and store them. Identical content returns the stored document.",
                request_example: Some(json!({
                    "content": "Document contents",
                    "filename": "notes.md",
                    "content_type": "text/markdown",
                    "title": "Team notes",
                    "room_id": "optional-room",
                    "metadata": { "source": "upload" }
                })),
            },
            CommandDescriptor {
                name: "search_knowledge",
                method: "POST",
                path: "/knowledge/search",
                description: "Return the fragments most similar to a query within the agent's scope.",
                request_example: Some(json!({
                    "query": "How are refunds processed?",
                    "limit": 5,
                    "room_id": "optional-room"
                })),
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return ingestion counters useful for observability dashboards.",
                request_example: None,
            },
        ],
    })
}

enum AppError {
    BadRequest(String),
    Knowledge(KnowledgeError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Knowledge(error) => {
                let status = match &error {
                    KnowledgeError::InvalidDocument(_) | KnowledgeError::InvalidQuery(_) => {
                        StatusCode::BAD_REQUEST
                    }
                    KnowledgeError::Extraction(ExtractionError::UnsupportedContentType {
                        ..
                    }) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                    KnowledgeError::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    tracing::error!(error = %error, "Knowledge request failed");
                }
                (status, error.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<KnowledgeError> for AppError {
    fn from(inner: KnowledgeError) -> Self {
        Self::Knowledge(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::{create_router, get_commands};
    use crate::ingestion::{DocumentSpec, KnowledgeScope};
    use crate::metrics::MetricsSnapshot;
    use crate::service::{AddKnowledgeOutcome, KnowledgeApi, KnowledgeError};
    use crate::store::{KnowledgeHit, ScopeFilter};
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
        response::Response,
    };
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tower::ServiceExt;
    use uuid::Uuid;

    #[tokio::test]
    async fn commands_catalog_exposes_knowledge_endpoints() {
        let commands = get_commands().await.0.commands;
        let add = commands
            .iter()
            .find(|cmd| cmd.name == "add_knowledge")
            .expect("add command present");
        assert_eq!(add.method, "POST");
        assert_eq!(add.path, "/knowledge");
        assert!(commands.iter().any(|cmd| cmd.path == "/knowledge/search"));
    }

    #[tokio::test]
    async fn add_route_decodes_base64_and_forwards_scope() {
        let service = Arc::new(StubKnowledgeService::default());
        let app = create_router(service.clone());
        let payload = json!({
            "content_base64": STANDARD.encode("Hello knowledge"),
            "filename": "hello.txt",
            "content_type": "text/plain",
            "room_id": "room-1",
            "metadata": { "source": "upload" }
        });

        let response = app.oneshot(post("/knowledge", payload)).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["fragment_count"], 3);
        assert_eq!(body["deduplicated"], false);

        let specs = service.specs.lock().await;
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].content, b"Hello knowledge");
        assert_eq!(specs[0].room_id.as_deref(), Some("room-1"));
        assert_eq!(specs[0].metadata["source"], "upload");
    }

    #[tokio::test]
    async fn add_route_requires_content() {
        let app = create_router(Arc::new(StubKnowledgeService::default()));
        let payload = json!({ "filename": "a.txt", "content_type": "text/plain" });
        let response = app.oneshot(post("/knowledge", payload)).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_query_maps_to_bad_request() {
        let app = create_router(Arc::new(StubKnowledgeService::default()));
        let response = app
            .oneshot(post("/knowledge/search", json!({ "query": "" })))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("query"));
    }

    #[tokio::test]
    async fn search_route_returns_hits_with_scope() {
        let service = Arc::new(StubKnowledgeService::default());
        let app = create_router(service.clone());
        let response = app
            .oneshot(post(
                "/knowledge/search",
                json!({ "query": "refunds", "limit": 2, "world_id": "w-1" }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["hits"][0]["text"], "Refunds take five days.");
        assert_eq!(body["hits"][0]["agent_id"], "agent");
        let filters = service.filters.lock().await;
        assert_eq!(filters[0].world_id.as_deref(), Some("w-1"));
    }

    fn post(uri: &str, payload: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .expect("request")
    }

    async fn json_body(response: Response) -> Value {
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        serde_json::from_slice(&body).expect("json body")
    }

    #[derive(Default)]
    struct StubKnowledgeService {
        specs: Mutex<Vec<DocumentSpec>>,
        filters: Mutex<Vec<ScopeFilter>>,
    }

    #[async_trait]
    impl KnowledgeApi for StubKnowledgeService {
        async fn add_knowledge(
            &self,
            spec: DocumentSpec,
        ) -> Result<AddKnowledgeOutcome, KnowledgeError> {
            self.specs.lock().await.push(spec);
            Ok(AddKnowledgeOutcome {
                document_id: Uuid::nil(),
                chunk_count: 3,
                fragment_count: 3,
                failed_chunks: Vec::new(),
                deduplicated: false,
                contextual_enrichment: false,
            })
        }

        async fn get_knowledge(
            &self,
            query: &str,
            filter: ScopeFilter,
            _limit: Option<usize>,
        ) -> Result<Vec<KnowledgeHit>, KnowledgeError> {
            if query.trim().is_empty() {
                return Err(KnowledgeError::InvalidQuery("query text is empty".into()));
            }
            self.filters.lock().await.push(filter);
            Ok(vec![KnowledgeHit {
                fragment_id: Uuid::nil(),
                document_id: Uuid::nil(),
                position: 0,
                text: "Refunds take five days.".into(),
                score: 0.9,
                scope: KnowledgeScope {
                    agent_id: "agent".into(),
                    ..KnowledgeScope::default()
                },
            }])
        }

        fn metrics_snapshot(&self) -> MetricsSnapshot {
            MetricsSnapshot::default()
        }
    }
}
