//! retrieve_memory
//!
//! Smart-routed retrieval: the router classifies the query and dispatches it
//! to the cheapest tier that can answer.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use vesper_core::{validate_max_results, validate_namespace, validate_query};

use crate::engine::Engine;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RetrieveInput {
    query: String,
    #[allow(dead_code)]
    memory_types: Option<Vec<String>>,
    max_results: Option<u64>,
    /// Reserved; the router picks the strategy from classification
    #[allow(dead_code)]
    routing_strategy: Option<String>,
    namespace: Option<String>,
    #[allow(dead_code)]
    agent_id: Option<String>,
    #[allow(dead_code)]
    task_id: Option<String>,
    #[allow(dead_code)]
    exclude_agent: Option<String>,
}

/// Input schema for retrieve_memory
pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "query": {"type": "string", "description": "Search query (1-10000 chars)"},
            "memoryTypes": {"type": "array", "items": {"type": "string"}},
            "maxResults": {"type": "integer", "minimum": 1, "maximum": 100},
            "routingStrategy": {"type": "string"},
            "namespace": {"type": "string"},
            "agentId": {"type": "string"},
            "taskId": {"type": "string"},
            "excludeAgent": {"type": "string"}
        },
        "required": ["query"]
    })
}

pub async fn execute(engine: &Arc<Engine>, args: Value) -> Result<Value, String> {
    let input: RetrieveInput = serde_json::from_value(args).map_err(|e| e.to_string())?;

    validate_query(&input.query).map_err(|e| e.to_string())?;
    let namespace = validate_namespace(input.namespace.as_deref()).map_err(|e| e.to_string())?;
    let max_results =
        validate_max_results(input.max_results.unwrap_or(10)).map_err(|e| e.to_string())?;

    let response = engine
        .router
        .retrieve(&namespace, &input.query, max_results)
        .map_err(|e| e.to_string())?;

    Ok(serde_json::json!({
        "success": true,
        "queryClass": response.query_class.as_str(),
        "confidence": response.confidence,
        "results": response.results.iter().map(|r| serde_json::json!({
            "content": r.content,
            "similarityScore": r.similarity_score,
            "source": r.source,
        })).collect::<Vec<_>>(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_retrieve_round_trip() {
        let (_dir, engine) = crate::engine::tests::test_engine();
        crate::tools::store::execute(
            &engine,
            serde_json::json!({"content": "the deploy pipeline broke on tuesday"}),
            false,
        )
        .await
        .unwrap();

        let result = execute(
            &engine,
            serde_json::json!({"query": "deploy pipeline broke tuesday"}),
        )
        .await
        .unwrap();
        assert_eq!(result["success"], true);
        let results = result["results"].as_array().unwrap();
        assert!(!results.is_empty());
        assert!(
            results[0]["content"]
                .as_str()
                .unwrap()
                .contains("deploy pipeline")
        );
    }

    #[tokio::test]
    async fn test_boundary_validation() {
        let (_dir, engine) = crate::engine::tests::test_engine();

        assert!(execute(&engine, serde_json::json!({"query": ""})).await.is_err());
        assert!(
            execute(&engine, serde_json::json!({"query": "q", "maxResults": 0}))
                .await
                .is_err()
        );
        assert!(
            execute(&engine, serde_json::json!({"query": "q", "maxResults": 101}))
                .await
                .is_err()
        );
        assert!(
            execute(&engine, serde_json::json!({"query": "q", "maxResults": 100}))
                .await
                .is_ok()
        );
    }
}
