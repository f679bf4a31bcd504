//! vesper_enable / vesper_disable / vesper_status
//!
//! The toggle tools bypass the enabled check; every other operation no-ops
//! while the engine is disabled.

use std::sync::Arc;

use serde_json::Value;

use crate::engine::Engine;

/// Input schema shared by the toggle tools
pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {}
    })
}

pub async fn execute_enable(engine: &Arc<Engine>, _args: Value) -> Result<Value, String> {
    let was = engine.set_enabled(true);
    if !was {
        tracing::info!("Vesper enabled");
    }
    Ok(status_body(engine))
}

pub async fn execute_disable(engine: &Arc<Engine>, _args: Value) -> Result<Value, String> {
    let was = engine.set_enabled(false);
    if was {
        tracing::info!("Vesper disabled; operations will no-op");
    }
    Ok(status_body(engine))
}

pub async fn execute_status(engine: &Arc<Engine>, _args: Value) -> Result<Value, String> {
    Ok(status_body(engine))
}

fn status_body(engine: &Arc<Engine>) -> Value {
    let enabled = engine.is_enabled();
    serde_json::json!({
        "enabled": enabled,
        "mode": if enabled { "active" } else { "disabled" },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_toggle_cycle() {
        let (_dir, engine) = crate::engine::tests::test_engine();

        let status = execute_status(&engine, serde_json::json!({})).await.unwrap();
        assert_eq!(status["enabled"], true);
        assert_eq!(status["mode"], "active");

        let disabled = execute_disable(&engine, serde_json::json!({})).await.unwrap();
        assert_eq!(disabled["enabled"], false);
        assert_eq!(disabled["mode"], "disabled");

        let enabled = execute_enable(&engine, serde_json::json!({})).await.unwrap();
        assert_eq!(enabled["enabled"], true);
    }
}
