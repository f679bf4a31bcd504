//! delete_memory
//!
//! Cascading delete: the conversation leaves working memory and every fact
//! extracted from it leaves the semantic graph. Unlike plain lookups, a miss
//! here is a distinct signal.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use vesper_core::validate_namespace;

use crate::engine::Engine;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DeleteInput {
    memory_id: String,
    namespace: Option<String>,
}

/// Input schema for delete_memory
pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "memoryId": {"type": "string"},
            "namespace": {"type": "string"}
        },
        "required": ["memoryId"]
    })
}

pub async fn execute(engine: &Arc<Engine>, args: Value) -> Result<Value, String> {
    let input: DeleteInput = serde_json::from_value(args).map_err(|e| e.to_string())?;
    let namespace = validate_namespace(input.namespace.as_deref()).map_err(|e| e.to_string())?;

    let removed_from_cache = engine
        .working
        .delete(&namespace, &input.memory_id)
        .map_err(|e| e.to_string())?;
    let facts_purged = engine
        .graph
        .purge_conversation_facts(&input.memory_id)
        .map_err(|e| e.to_string())?;

    if !removed_from_cache && facts_purged == 0 {
        return Ok(serde_json::json!({
            "success": false,
            "error": "not_found",
            "memoryId": input.memory_id,
        }));
    }

    Ok(serde_json::json!({
        "success": true,
        "memoryId": input.memory_id,
        "factsPurged": facts_purged,
    }))
}
