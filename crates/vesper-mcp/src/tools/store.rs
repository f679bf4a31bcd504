//! store_memory / store_decision
//!
//! Writes a conversation into working memory and queues it for the next
//! consolidation cycle. Decisions are the same write with
//! `memory_type = decision` (quarter decay) and optional supersede handling.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use vesper_core::{
    validate_content, validate_memory_type, validate_metadata, validate_namespace, Conversation,
    MemoryType,
};

use crate::engine::Engine;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StoreInput {
    content: String,
    memory_type: Option<String>,
    metadata: Option<serde_json::Map<String, Value>>,
    namespace: Option<String>,
    agent_id: Option<String>,
    agent_role: Option<String>,
    task_id: Option<String>,
    /// Fact superseded by this decision (store_decision only)
    supersedes: Option<String>,
}

/// Input schema for store_memory
pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "content": {"type": "string", "description": "Text to remember (1-100000 chars)"},
            "memoryType": {"type": "string", "enum": ["episodic", "semantic", "procedural", "decision"]},
            "metadata": {"type": "object", "description": "Open metadata record (max 50 keys)"},
            "namespace": {"type": "string"},
            "agentId": {"type": "string"},
            "agentRole": {"type": "string"},
            "taskId": {"type": "string"}
        },
        "required": ["content"]
    })
}

/// Input schema for store_decision
pub fn decision_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "content": {"type": "string", "description": "Decision text"},
            "supersedes": {"type": "string", "description": "Fact id this decision supersedes"},
            "metadata": {"type": "object"},
            "namespace": {"type": "string"},
            "agentId": {"type": "string"},
            "agentRole": {"type": "string"},
            "taskId": {"type": "string"}
        },
        "required": ["content"]
    })
}

pub async fn execute(engine: &Arc<Engine>, args: Value, decision: bool) -> Result<Value, String> {
    let input: StoreInput = serde_json::from_value(args).map_err(|e| e.to_string())?;

    validate_content(&input.content).map_err(|e| e.to_string())?;
    let namespace = validate_namespace(input.namespace.as_deref()).map_err(|e| e.to_string())?;
    let metadata = input.metadata.unwrap_or_default();
    validate_metadata(&metadata).map_err(|e| e.to_string())?;

    let memory_type = if decision {
        MemoryType::Decision
    } else {
        match input.memory_type.as_deref() {
            Some(raw) => validate_memory_type(raw).map_err(|e| e.to_string())?,
            None => MemoryType::Episodic,
        }
    };

    let mut conversation = Conversation::new(&input.content, memory_type);
    conversation.namespace = namespace.clone();
    conversation.agent_id = input.agent_id;
    conversation.task_id = input.task_id;
    conversation.key_entities = extract_entities(&input.content, &metadata);
    conversation.topics = string_set(&metadata, "topics");
    conversation.user_intent = metadata
        .get("intent")
        .and_then(Value::as_str)
        .unwrap_or(if decision { "decide" } else { "store" })
        .to_string();
    conversation.metadata = metadata;
    if let Some(role) = input.agent_role {
        conversation
            .metadata
            .insert("agentRole".to_string(), Value::String(role));
    }

    // Best-effort embedding; retrieval still works without one
    match engine.embedder.embed(&input.content) {
        Ok(vector) => conversation.embedding = Some(vector),
        Err(e) => tracing::debug!(error = %e, "Skipping conversation embedding"),
    }

    let id = conversation.conversation_id.clone();
    engine.working.put(&conversation).map_err(|e| e.to_string())?;
    engine
        .working
        .push_pending(&namespace, &id)
        .map_err(|e| e.to_string())?;

    if decision {
        if let Some(superseded) = input.supersedes.as_deref() {
            match engine.graph.close_fact(superseded, Utc::now()) {
                Ok(true) => tracing::info!(fact = superseded, "Decision superseded fact"),
                Ok(false) => tracing::debug!(fact = superseded, "Supersede target not open"),
                Err(e) => tracing::warn!(error = %e, "Supersede lookup failed"),
            }
        }
    }

    Ok(serde_json::json!({
        "success": true,
        "memoryId": id,
    }))
}

/// Shallow keyword extraction: capitalized words plus an explicit
/// `metadata.entities` list, lowercased and deduplicated.
fn extract_entities(
    content: &str,
    metadata: &serde_json::Map<String, Value>,
) -> BTreeSet<String> {
    let mut entities = string_set(metadata, "entities");
    for word in content.split_whitespace() {
        let trimmed: String = word
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        if trimmed.len() >= 3 && word.chars().next().is_some_and(|c| c.is_uppercase()) {
            // Sentence starters slip through; consolidation upserts are
            // idempotent so the noise stays bounded.
            entities.insert(trimmed.to_lowercase());
        }
    }
    entities
}

fn string_set(metadata: &serde_json::Map<String, Value>, key: &str) -> BTreeSet<String> {
    metadata
        .get(key)
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.to_lowercase())
                .collect()
        })
        .unwrap_or_default()
}
