//! Translate scope filters into Qdrant filter payloads.

use crate::store::ScopeFilter;
use serde_json::{Value, json};

/// Compose a Qdrant `must` filter from a scope filter; `None` when nothing constrains.
pub fn build_scope_filter(filter: &ScopeFilter) -> Option<Value> {
    let mut must: Vec<Value> = Vec::new();

    let keyed = [
        ("agent_id", filter.agent_id.as_deref()),
        ("world_id", filter.world_id.as_deref()),
        ("room_id", filter.room_id.as_deref()),
        ("entity_id", filter.entity_id.as_deref()),
    ];
    for (key, value) in keyed {
        if let Some(value) = value.and_then(non_empty) {
            must.push(match_value(key, value));
        }
    }

    if let Some(document_id) = filter.document_id {
        must.push(match_value("document_id", &document_id.to_string()));
    }

    if must.is_empty() {
        None
    } else {
        Some(json!({ "must": must }))
    }
}

pub(crate) fn match_value(key: &str, value: &str) -> Value {
    json!({
        "key": key,
        "match": { "value": value }
    })
}

fn non_empty(input: &str) -> Option<&str> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn scope_fields_become_match_conditions() {
        let filter = build_scope_filter(&ScopeFilter {
            agent_id: Some("agent-1".into()),
            room_id: Some("  ".into()),
            entity_id: Some("user-7".into()),
            ..Default::default()
        })
        .expect("filter");

        assert_eq!(
            filter,
            json!({
                "must": [
                    { "key": "agent_id", "match": { "value": "agent-1" } },
                    { "key": "entity_id", "match": { "value": "user-7" } }
                ]
            })
        );
    }

    #[test]
    fn document_id_is_matched_as_string() {
        let id = Uuid::from_u128(42);
        let filter = build_scope_filter(&ScopeFilter {
            document_id: Some(id),
            ..Default::default()
        })
        .expect("filter");
        assert_eq!(filter["must"][0]["match"]["value"], json!(id.to_string()));
    }

    #[test]
    fn empty_filter_is_none() {
        assert!(build_scope_filter(&ScopeFilter::default()).is_none());
    }
}
