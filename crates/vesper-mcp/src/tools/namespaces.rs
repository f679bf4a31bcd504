//! Namespace tools: list_namespaces, namespace_stats, share_context
//!
//! Namespaces isolate tenants; cross-namespace reads only happen through an
//! explicit share_context copy.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use vesper_core::{validate_max_results, validate_namespace, validate_query};

use crate::engine::Engine;

/// Input schema for list_namespaces
pub fn list_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {}
    })
}

/// Input schema for namespace_stats
pub fn stats_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "namespace": {"type": "string"}
        },
        "required": ["namespace"]
    })
}

/// Input schema for share_context
pub fn share_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "sourceNs": {"type": "string"},
            "targetNs": {"type": "string"},
            "taskId": {"type": "string"},
            "query": {"type": "string", "description": "Only copy conversations matching this query"},
            "maxItems": {"type": "integer", "minimum": 1, "maximum": 100},
            "includeSkills": {"type": "boolean"},
            "includeEntities": {"type": "boolean"}
        },
        "required": ["sourceNs", "targetNs"]
    })
}

pub async fn execute_list(engine: &Arc<Engine>, _args: Value) -> Result<Value, String> {
    let mut namespaces = engine.working.namespaces().map_err(|e| e.to_string())?;
    for ns in engine.graph.namespaces().map_err(|e| e.to_string())? {
        if !namespaces.contains(&ns) {
            namespaces.push(ns);
        }
    }
    namespaces.sort();

    Ok(serde_json::json!({
        "success": true,
        "namespaces": namespaces,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct NamespaceStatsInput {
    namespace: String,
}

pub async fn execute_stats(engine: &Arc<Engine>, args: Value) -> Result<Value, String> {
    let input: NamespaceStatsInput = serde_json::from_value(args).map_err(|e| e.to_string())?;
    let namespace = validate_namespace(Some(&input.namespace)).map_err(|e| e.to_string())?;

    let cache = engine.working.stats(&namespace).map_err(|e| e.to_string())?;
    let graph = engine.graph.counts(&namespace).map_err(|e| e.to_string())?;
    let skills = engine.skills.count(&namespace).map_err(|e| e.to_string())?;

    Ok(serde_json::json!({
        "success": true,
        "namespace": namespace,
        "conversations": cache.count,
        "entities": graph.entities,
        "relationships": graph.relationships,
        "facts": graph.facts,
        "conflicts": graph.conflicts,
        "skills": skills,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ShareContextInput {
    source_ns: String,
    target_ns: String,
    #[allow(dead_code)]
    task_id: Option<String>,
    query: Option<String>,
    max_items: Option<u64>,
    include_skills: Option<bool>,
    include_entities: Option<bool>,
}

pub async fn execute_share(engine: &Arc<Engine>, args: Value) -> Result<Value, String> {
    let input: ShareContextInput = serde_json::from_value(args).map_err(|e| e.to_string())?;
    let source = validate_namespace(Some(&input.source_ns)).map_err(|e| e.to_string())?;
    let target = validate_namespace(Some(&input.target_ns)).map_err(|e| e.to_string())?;
    if source == target {
        return Err("Validation failed for 'targetNs': must differ from sourceNs".to_string());
    }
    let max_items =
        validate_max_results(input.max_items.unwrap_or(10)).map_err(|e| e.to_string())?;
    if let Some(query) = input.query.as_deref() {
        validate_query(query).map_err(|e| e.to_string())?;
    }

    // Conversations, optionally filtered by the query
    let mut conversations_copied = 0u64;
    let candidates = match input.query.as_deref() {
        Some(query) => engine
            .working
            .search_text(&source, query, max_items)
            .map_err(|e| e.to_string())?
            .into_iter()
            .map(|(conv, _)| conv)
            .collect(),
        None => engine
            .working
            .list_recent(&source, max_items)
            .map_err(|e| e.to_string())?,
    };
    for mut conversation in candidates {
        conversation.namespace = target.clone();
        engine.working.put(&conversation).map_err(|e| e.to_string())?;
        engine
            .working
            .push_pending(&target, &conversation.conversation_id)
            .map_err(|e| e.to_string())?;
        conversations_copied += 1;
    }

    // Entities
    let mut entities_copied = 0u64;
    if input.include_entities.unwrap_or(true) {
        let entities = engine
            .graph
            .list_entities(&source, max_items)
            .map_err(|e| e.to_string())?;
        for entity in entities {
            engine
                .graph
                .upsert_entity(
                    &target,
                    &entity.name,
                    entity.entity_type,
                    entity.description.as_deref(),
                    Some(entity.confidence),
                )
                .map_err(|e| e.to_string())?;
            entities_copied += 1;
        }
    }

    // Skills, via their summaries
    let mut skills_copied = 0u64;
    if input.include_skills.unwrap_or(false) {
        let summaries = engine
            .skills
            .get_summaries(&source, max_items, None)
            .map_err(|e| e.to_string())?;
        for summary in summaries {
            let Some(skill) = engine
                .skills
                .get_skill(&source, &summary.id)
                .map_err(|e| e.to_string())?
            else {
                continue;
            };
            let spec = vesper_core::SkillSpec {
                name: skill.name,
                summary: skill.summary,
                description: skill.description,
                category: skill.category,
                triggers: skill.triggers,
                code: skill.code,
                code_type: skill.code_type,
                prerequisites: skill.prerequisites,
                namespace: Some(target.clone()),
            };
            engine
                .skills
                .add_skill_with_embedding(&target, &spec)
                .map_err(|e| e.to_string())?;
            skills_copied += 1;
        }
    }

    tracing::info!(
        source = %source,
        target = %target,
        conversations_copied,
        entities_copied,
        skills_copied,
        "Context shared across namespaces"
    );

    Ok(serde_json::json!({
        "success": true,
        "sourceNs": source,
        "targetNs": target,
        "conversationsCopied": conversations_copied,
        "entitiesCopied": entities_copied,
        "skillsCopied": skills_copied,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_share_and_namespace_accounting() {
        let (_dir, engine) = crate::engine::tests::test_engine();
        crate::tools::store::execute(
            &engine,
            serde_json::json!({"content": "alpha team context", "namespace": "alpha"}),
            false,
        )
        .await
        .unwrap();

        let shared = execute_share(
            &engine,
            serde_json::json!({"sourceNs": "alpha", "targetNs": "beta"}),
        )
        .await
        .unwrap();
        assert_eq!(shared["conversationsCopied"], 1);

        let listed = execute_list(&engine, serde_json::json!({})).await.unwrap();
        let namespaces = listed["namespaces"].as_array().unwrap();
        assert!(namespaces.iter().any(|n| n == "alpha"));
        assert!(namespaces.iter().any(|n| n == "beta"));

        let stats = execute_stats(&engine, serde_json::json!({"namespace": "beta"}))
            .await
            .unwrap();
        assert_eq!(stats["conversations"], 1);
    }

    #[tokio::test]
    async fn test_share_rejects_same_namespace() {
        let (_dir, engine) = crate::engine::tests::test_engine();
        let result = execute_share(
            &engine,
            serde_json::json!({"sourceNs": "alpha", "targetNs": "alpha"}),
        )
        .await;
        assert!(result.is_err());
    }
}
