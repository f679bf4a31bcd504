//! Skill tools: load_skill, record_skill_outcome
//!
//! Full skill payloads are loaded lazily and cached in the working-memory
//! skill sub-tier. Outcome recording enforces the satisfaction invariant:
//! required on success, forbidden on failure.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use vesper_core::{validate_namespace, validate_skill_id, SkillOutcome, VesperError};

use crate::engine::Engine;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct LoadSkillInput {
    skill_id: String,
    namespace: Option<String>,
}

/// Input schema for load_skill
pub fn load_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "skillId": {"type": "string", "pattern": "^skill_[a-z0-9_]+$"},
            "namespace": {"type": "string"}
        },
        "required": ["skillId"]
    })
}

/// Input schema for record_skill_outcome
pub fn outcome_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "skillId": {"type": "string", "pattern": "^skill_[a-z0-9_]+$"},
            "outcome": {"type": "string", "enum": ["success", "failure"]},
            "satisfaction": {"type": "number", "minimum": 0.0, "maximum": 1.0},
            "namespace": {"type": "string"}
        },
        "required": ["skillId", "outcome"]
    })
}

pub async fn execute_load(engine: &Arc<Engine>, args: Value) -> Result<Value, String> {
    let input: LoadSkillInput = serde_json::from_value(args).map_err(|e| e.to_string())?;
    validate_skill_id(&input.skill_id).map_err(|e| e.to_string())?;
    let namespace = validate_namespace(input.namespace.as_deref()).map_err(|e| e.to_string())?;

    // Skill sub-tier first; a hit skips the library entirely
    if let Ok(Some(skill)) = engine.working.get_cached_skill(&namespace, &input.skill_id) {
        return Ok(serde_json::json!({
            "success": true,
            "cached": true,
            "skill": serde_json::to_value(&skill).map_err(|e| e.to_string())?,
        }));
    }

    match engine.skills.load_full(&namespace, &input.skill_id) {
        Ok(skill) => {
            if let Err(e) = engine.working.cache_skill(&namespace, &skill) {
                tracing::debug!(error = %e, "Skill cache write failed");
            }
            Ok(serde_json::json!({
                "success": true,
                "cached": false,
                "skill": serde_json::to_value(&skill).map_err(|e| e.to_string())?,
            }))
        }
        Err(VesperError::NotFound(_)) => Ok(serde_json::json!({
            "success": false,
            "error": "not_found",
            "skillId": input.skill_id,
        })),
        Err(e) => Err(e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct OutcomeInput {
    skill_id: String,
    outcome: SkillOutcome,
    satisfaction: Option<f64>,
    #[allow(dead_code)]
    namespace: Option<String>,
}

pub async fn execute_outcome(engine: &Arc<Engine>, args: Value) -> Result<Value, String> {
    let input: OutcomeInput = serde_json::from_value(args).map_err(|e| e.to_string())?;
    validate_skill_id(&input.skill_id).map_err(|e| e.to_string())?;

    match input.outcome {
        SkillOutcome::Success => {
            let satisfaction = input.satisfaction.ok_or_else(|| {
                "Validation failed for 'satisfaction': required when outcome is success"
                    .to_string()
            })?;
            if !(0.0..=1.0).contains(&satisfaction) {
                return Err(
                    "Validation failed for 'satisfaction': must be in [0, 1]".to_string()
                );
            }
            engine
                .skills
                .record_success(&input.skill_id, satisfaction)
                .map_err(|e| e.to_string())?;
        }
        SkillOutcome::Failure => {
            if input.satisfaction.is_some() {
                return Err(
                    "Validation failed for 'satisfaction': only valid when outcome is success"
                        .to_string(),
                );
            }
            engine
                .skills
                .record_failure(&input.skill_id)
                .map_err(|e| e.to_string())?;
        }
    }

    Ok(serde_json::json!({"success": true}))
}
