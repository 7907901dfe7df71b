use std::env;

use rustyknowledge::{
    config::Config,
    embedding::{EmbeddingClient, build_embedder},
    ingestion::DocumentSpec,
    service::{KnowledgeApi, KnowledgeService},
    store::ScopeFilter,
};

fn set_default_env(key: &str, value: &str) {
    let needs_value = env::var(key).map(|v| v.trim().is_empty()).unwrap_or(true);
    if needs_value {
        // SAFETY: live tests are run one at a time with `--ignored --test-threads=1`.
        unsafe {
            env::set_var(key, value);
        }
    }
}

fn live_config() -> Config {
    set_default_env("QDRANT_URL", "http://127.0.0.1:6333");
    set_default_env("QDRANT_COLLECTION_NAME", "rusty-knowledge-live");
    set_default_env("EMBEDDING_PROVIDER", "ollama");
    set_default_env("EMBEDDING_MODEL", "nomic-embed-text");
    set_default_env("EMBEDDING_DIMENSION", "768");
    set_default_env("OLLAMA_URL", "http://127.0.0.1:11434");
    Config::from_env().expect("live configuration")
}

#[tokio::test]
#[ignore = "Requires live Ollama embeddings"]
async fn live_ollama_embedding_roundtrip() {
    let config = live_config();
    let client = build_embedder(&config).expect("embedder");
    let vectors = client
        .embed_batch(vec!["rusty-knowledge live embedding".to_string()])
        .await
        .expect("failed to request embeddings from provider");
    assert_eq!(vectors.len(), 1, "expected embedding per input text");
    assert_eq!(
        vectors[0].len(),
        config.embedding_dimension,
        "embedding dimension mismatch"
    );
}

#[tokio::test]
#[ignore = "Requires live Qdrant and Ollama"]
async fn live_ingest_and_search() {
    let config = live_config();
    let service = KnowledgeService::from_config(&config)
        .await
        .expect("service initialization");
    let text = "Rusty Knowledge stores contextual fragments in Qdrant for retrieval.";

    let outcome = service
        .add_knowledge(DocumentSpec::text("live.txt", "text/plain", text))
        .await
        .expect("ingestion");
    assert!(outcome.fragment_count >= 1, "outcome: {outcome:?}");

    let hits = service
        .get_knowledge(text, ScopeFilter::default(), Some(3))
        .await
        .expect("search");
    assert!(
        hits.iter().any(|hit| hit.document_id == outcome.document_id),
        "ingested document should be retrievable"
    );
}
