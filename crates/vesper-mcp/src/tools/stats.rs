//! get_stats
//!
//! Aggregate counters per memory layer, with scheduler and consolidation
//! detail behind the `detailed` flag.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use vesper_core::validate_namespace;

use crate::engine::Engine;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StatsInput {
    detailed: Option<bool>,
    namespace: Option<String>,
}

/// Input schema for get_stats
pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "detailed": {"type": "boolean"},
            "namespace": {"type": "string"}
        }
    })
}

pub async fn execute(engine: &Arc<Engine>, args: Value) -> Result<Value, String> {
    let input: StatsInput = serde_json::from_value(args).map_err(|e| e.to_string())?;
    let namespace = validate_namespace(input.namespace.as_deref()).map_err(|e| e.to_string())?;

    let cache = engine.working.stats(&namespace).map_err(|e| e.to_string())?;
    let graph = engine.graph.counts(&namespace).map_err(|e| e.to_string())?;
    let skill_count = engine.skills.count(&namespace).map_err(|e| e.to_string())?;

    let mut result = serde_json::json!({
        "success": true,
        "namespace": namespace,
        "workingMemory": {
            "count": cache.count,
            "oldest": cache.oldest.map(|t| t.to_rfc3339()),
            "newest": cache.newest.map(|t| t.to_rfc3339()),
            "totalBytes": cache.total_bytes,
        },
        "semanticGraph": {
            "entities": graph.entities,
            "relationships": graph.relationships,
            "facts": graph.facts,
            "conflicts": graph.conflicts,
        },
        "skillLibrary": {
            "skills": skill_count,
        },
    });

    if input.detailed.unwrap_or(false) {
        let status = engine.scheduler.status();
        let last_run = engine.pipeline.last_run().map_err(|e| e.to_string())?;
        result["scheduler"] = serde_json::to_value(&status).map_err(|e| e.to_string())?;
        result["lastConsolidation"] =
            serde_json::to_value(&last_run).map_err(|e| e.to_string())?;
        result["consolidationRuns"] = serde_json::json!(
            engine.pipeline.run_count().map_err(|e| e.to_string())?
        );
    }

    Ok(result)
}
