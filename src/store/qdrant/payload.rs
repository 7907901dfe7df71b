//! Conversions between domain types and Qdrant payloads.

use crate::ingestion::{Document, Fragment, KnowledgeScope};
use crate::store::{KnowledgeHit, StoreError};
use serde_json::{Map, Value};
use uuid::Uuid;

fn insert_scope(payload: &mut Map<String, Value>, scope: &KnowledgeScope) {
    payload.insert("agent_id".into(), Value::String(scope.agent_id.clone()));
    let optional = [
        ("world_id", &scope.world_id),
        ("room_id", &scope.room_id),
        ("entity_id", &scope.entity_id),
    ];
    for (key, value) in optional {
        if let Some(value) = value.as_ref().filter(|value| !value.is_empty()) {
            payload.insert(key.into(), Value::String(value.clone()));
        }
    }
}

fn read_scope(payload: &Map<String, Value>) -> KnowledgeScope {
    KnowledgeScope {
        agent_id: string_field(payload, "agent_id").unwrap_or_default(),
        world_id: string_field(payload, "world_id"),
        room_id: string_field(payload, "room_id"),
        entity_id: string_field(payload, "entity_id"),
    }
}

fn string_field(payload: &Map<String, Value>, key: &str) -> Option<String> {
    match payload.get(key) {
        Some(Value::String(value)) => Some(value.clone()),
        _ => None,
    }
}

fn uuid_field(payload: &Map<String, Value>, key: &str) -> Result<Uuid, StoreError> {
    string_field(payload, key)
        .and_then(|value| Uuid::parse_str(&value).ok())
        .ok_or_else(|| StoreError::InvalidPayload(format!("missing or malformed `{key}`")))
}

/// Payload stored with a fragment point.
pub(crate) fn fragment_payload(fragment: &Fragment) -> Value {
    let mut payload = Map::new();
    payload.insert("fragment_id".into(), Value::String(fragment.id.to_string()));
    payload.insert(
        "document_id".into(),
        Value::String(fragment.document_id.to_string()),
    );
    payload.insert("position".into(), Value::from(fragment.position as u64));
    payload.insert("text".into(), Value::String(fragment.text.clone()));
    payload.insert(
        "created_at".into(),
        Value::String(fragment.created_at.clone()),
    );
    insert_scope(&mut payload, &fragment.scope);
    Value::Object(payload)
}

/// Payload stored with a document point.
pub(crate) fn document_payload(document: &Document) -> Value {
    let mut payload = Map::new();
    payload.insert("document_id".into(), Value::String(document.id.to_string()));
    payload.insert(
        "content_type".into(),
        Value::String(document.content_type.clone()),
    );
    payload.insert("filename".into(), Value::String(document.filename.clone()));
    payload.insert("title".into(), Value::String(document.title.clone()));
    payload.insert("text".into(), Value::String(document.text.clone()));
    payload.insert(
        "metadata".into(),
        Value::Object(document.metadata.clone()),
    );
    payload.insert(
        "created_at".into(),
        Value::String(document.created_at.clone()),
    );
    insert_scope(&mut payload, &document.scope);
    Value::Object(payload)
}

/// Rebuild a document from its stored payload.
pub(crate) fn document_from_payload(payload: &Map<String, Value>) -> Result<Document, StoreError> {
    let metadata = match payload.get("metadata") {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    Ok(Document {
        id: uuid_field(payload, "document_id")?,
        scope: read_scope(payload),
        content_type: string_field(payload, "content_type").unwrap_or_default(),
        filename: string_field(payload, "filename").unwrap_or_default(),
        title: string_field(payload, "title").unwrap_or_default(),
        text: string_field(payload, "text").unwrap_or_default(),
        metadata,
        created_at: string_field(payload, "created_at").unwrap_or_default(),
    })
}

/// Rebuild a search hit from a scored fragment payload.
pub(crate) fn hit_from_payload(
    payload: &Map<String, Value>,
    score: f32,
) -> Result<KnowledgeHit, StoreError> {
    Ok(KnowledgeHit {
        fragment_id: uuid_field(payload, "fragment_id")?,
        document_id: uuid_field(payload, "document_id")?,
        position: payload
            .get("position")
            .and_then(Value::as_u64)
            .unwrap_or_default() as usize,
        text: string_field(payload, "text").unwrap_or_default(),
        score,
        scope: read_scope(payload),
    })
}
