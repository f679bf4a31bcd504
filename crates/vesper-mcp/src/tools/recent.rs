//! list_recent
//!
//! Newest-first listing of working-memory conversations.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use vesper_core::{validate_max_results, validate_memory_type, validate_namespace};

use crate::engine::Engine;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RecentInput {
    limit: Option<u64>,
    memory_type: Option<String>,
    namespace: Option<String>,
}

/// Input schema for list_recent
pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "limit": {"type": "integer", "minimum": 1, "maximum": 100},
            "memoryType": {"type": "string", "enum": ["episodic", "semantic", "procedural", "decision"]},
            "namespace": {"type": "string"}
        }
    })
}

pub async fn execute(engine: &Arc<Engine>, args: Value) -> Result<Value, String> {
    let input: RecentInput = serde_json::from_value(args).map_err(|e| e.to_string())?;

    let namespace = validate_namespace(input.namespace.as_deref()).map_err(|e| e.to_string())?;
    let limit = validate_max_results(input.limit.unwrap_or(10)).map_err(|e| e.to_string())?;
    let type_filter = input
        .memory_type
        .as_deref()
        .map(validate_memory_type)
        .transpose()
        .map_err(|e| e.to_string())?;

    let conversations = engine
        .working
        .list_recent(&namespace, limit)
        .map_err(|e| e.to_string())?;

    let items: Vec<Value> = conversations
        .into_iter()
        .filter(|c| type_filter.map(|t| c.memory_type == t).unwrap_or(true))
        .map(|c| {
            serde_json::json!({
                "memoryId": c.conversation_id,
                "timestamp": c.timestamp.to_rfc3339(),
                "content": c.full_text,
                "memoryType": c.memory_type.as_str(),
                "keyEntities": c.key_entities,
                "topics": c.topics,
            })
        })
        .collect();

    Ok(serde_json::json!({
        "success": true,
        "count": items.len(),
        "conversations": items,
    }))
}
