//! Tool server
//!
//! Routes JSON-RPC requests to tool handlers. Every tool call passes the
//! boundary contracts in order: enabled check (toggles bypass it), then
//! rate limiting keyed by `(agent, operation)`, then schema validation
//! inside the handler itself.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::protocol::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION};
use crate::tools;

// ============================================================================
// PROTOCOL MESSAGES
// ============================================================================

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct InitializeRequest {
    #[serde(default)]
    protocol_version: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResult {
    protocol_version: String,
    server_info: ServerInfo,
    capabilities: Value,
    instructions: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfo {
    name: String,
    version: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDescription {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallToolRequest {
    name: String,
    #[serde(default)]
    arguments: Value,
}

// ============================================================================
// SERVER
// ============================================================================

/// The tool server
pub struct VesperServer {
    engine: Arc<Engine>,
    initialized: bool,
}

impl VesperServer {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            initialized: false,
        }
    }

    /// Handle one JSON-RPC request; notifications yield no response
    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!("Handling request: {}", request.method);

        if !self.initialized
            && request.method != "initialize"
            && request.method != "notifications/initialized"
        {
            warn!("Rejecting '{}': server not initialized", request.method);
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::server_not_initialized(),
            ));
        }

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params),
            "notifications/initialized" => return None,
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(request.params).await,
            "ping" => Ok(serde_json::json!({})),
            method => Err(JsonRpcError::method_not_found(method)),
        };

        Some(match result {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(error) => JsonRpcResponse::error(request.id, error),
        })
    }

    fn handle_initialize(&mut self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let request: InitializeRequest = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => InitializeRequest::default(),
        };

        // Older clients keep their version; never advertise newer than ours
        let negotiated = if !request.protocol_version.is_empty()
            && request.protocol_version.as_str() < PROTOCOL_VERSION
        {
            request.protocol_version
        } else {
            PROTOCOL_VERSION.to_string()
        };

        self.initialized = true;
        info!("Session initialized with protocol version {}", negotiated);

        let result = InitializeResult {
            protocol_version: negotiated,
            server_info: ServerInfo {
                name: "vesper".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            capabilities: serde_json::json!({
                "tools": {"listChanged": false}
            }),
            instructions: "Vesper is a multi-tier memory system. Recent context lives in \
                           working memory, durable knowledge in the semantic graph, and \
                           reusable procedures in the skill library. Store conversations \
                           with store_memory, recall with retrieve_memory, and record \
                           decisions with store_decision so they decay slowly."
                .to_string(),
        };

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    fn handle_tools_list(&self) -> Result<Value, JsonRpcError> {
        let tools = vec![
            ToolDescription {
                name: "store_memory".to_string(),
                description: "Store a conversation fragment in working memory and queue it \
                              for nightly consolidation into the semantic graph."
                    .to_string(),
                input_schema: tools::store::schema(),
            },
            ToolDescription {
                name: "retrieve_memory".to_string(),
                description: "Smart-routed retrieval: classifies the query and dispatches it \
                              to the cheapest memory tier that can answer."
                    .to_string(),
                input_schema: tools::retrieve::schema(),
            },
            ToolDescription {
                name: "list_recent".to_string(),
                description: "List recent working-memory conversations, newest first.".to_string(),
                input_schema: tools::recent::schema(),
            },
            ToolDescription {
                name: "get_stats".to_string(),
                description: "Aggregate counters per memory layer; detailed=true adds \
                              scheduler and consolidation status."
                    .to_string(),
                input_schema: tools::stats::schema(),
            },
            ToolDescription {
                name: "delete_memory".to_string(),
                description: "Delete a memory across tiers: working memory plus facts \
                              extracted from it."
                    .to_string(),
                input_schema: tools::delete::schema(),
            },
            ToolDescription {
                name: "store_decision".to_string(),
                description: "Store a decision (quarter decay rate); optionally supersede an \
                              earlier fact."
                    .to_string(),
                input_schema: tools::store::decision_schema(),
            },
            ToolDescription {
                name: "share_context".to_string(),
                description: "Copy conversations (and optionally entities and skills) from \
                              one namespace into another."
                    .to_string(),
                input_schema: tools::namespaces::share_schema(),
            },
            ToolDescription {
                name: "list_namespaces".to_string(),
                description: "List namespaces known to any memory tier.".to_string(),
                input_schema: tools::namespaces::list_schema(),
            },
            ToolDescription {
                name: "namespace_stats".to_string(),
                description: "Per-namespace counters across all tiers.".to_string(),
                input_schema: tools::namespaces::stats_schema(),
            },
            ToolDescription {
                name: "load_skill".to_string(),
                description: "Load a full skill payload (updates last_used; cached in the \
                              working-memory skill sub-tier)."
                    .to_string(),
                input_schema: tools::skills::load_schema(),
            },
            ToolDescription {
                name: "record_skill_outcome".to_string(),
                description: "Record a skill application outcome; satisfaction is required \
                              exactly when the outcome is success."
                    .to_string(),
                input_schema: tools::skills::outcome_schema(),
            },
            ToolDescription {
                name: "vesper_enable".to_string(),
                description: "Enable the memory engine.".to_string(),
                input_schema: tools::toggle::schema(),
            },
            ToolDescription {
                name: "vesper_disable".to_string(),
                description: "Disable the memory engine; non-toggle tools no-op.".to_string(),
                input_schema: tools::toggle::schema(),
            },
            ToolDescription {
                name: "vesper_status".to_string(),
                description: "Report whether the engine is enabled.".to_string(),
                input_schema: tools::toggle::schema(),
            },
        ];

        serde_json::to_value(serde_json::json!({ "tools": tools }))
            .map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    async fn handle_tools_call(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let request: CallToolRequest = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => return Err(JsonRpcError::invalid_params("missing tool call params")),
        };

        let args = if request.arguments.is_null() {
            serde_json::json!({})
        } else {
            request.arguments
        };

        // Toggle tools bypass the enabled check
        let outcome = match request.name.as_str() {
            "vesper_enable" => tools::toggle::execute_enable(&self.engine, args).await,
            "vesper_disable" => tools::toggle::execute_disable(&self.engine, args).await,
            "vesper_status" => tools::toggle::execute_status(&self.engine, args).await,
            name => self.dispatch_guarded(name, args).await,
        };

        Ok(wrap_tool_outcome(outcome))
    }

    /// Enabled check, then rate limiting, then the tool itself
    async fn dispatch_guarded(&self, name: &str, args: Value) -> Result<Value, String> {
        if !self.engine.is_enabled() {
            return Ok(serde_json::json!({
                "success": true,
                "noop": true,
                "enabled": false,
            }));
        }

        let user = args
            .get("agentId")
            .and_then(Value::as_str)
            .unwrap_or("anonymous")
            .to_string();
        let operation = Engine::operation_of(name);
        let decision = self
            .engine
            .limiter
            .check(self.engine.config.default_tier, &user, operation)
            .map_err(|e| e.to_string())?;

        if !decision.allowed {
            return Ok(serde_json::json!({
                "success": false,
                "error": "rate_limited",
                "status": decision.status,
                "retryAfter": decision.retry_after_secs,
                "headers": {
                    "X-RateLimit-Limit": decision.limit,
                    "X-RateLimit-Remaining": decision.remaining,
                    "X-RateLimit-Reset": decision.reset_at,
                    "Retry-After": decision.retry_after_secs,
                },
            }));
        }

        match name {
            "store_memory" => tools::store::execute(&self.engine, args, false).await,
            "store_decision" => tools::store::execute(&self.engine, args, true).await,
            "retrieve_memory" => tools::retrieve::execute(&self.engine, args).await,
            "list_recent" => tools::recent::execute(&self.engine, args).await,
            "get_stats" => tools::stats::execute(&self.engine, args).await,
            "delete_memory" => tools::delete::execute(&self.engine, args).await,
            "share_context" => tools::namespaces::execute_share(&self.engine, args).await,
            "list_namespaces" => tools::namespaces::execute_list(&self.engine, args).await,
            "namespace_stats" => tools::namespaces::execute_stats(&self.engine, args).await,
            "load_skill" => tools::skills::execute_load(&self.engine, args).await,
            "record_skill_outcome" => tools::skills::execute_outcome(&self.engine, args).await,
            other => Err(format!("Unknown tool '{other}'")),
        }
    }
}

/// Wrap a tool outcome into a tool-call result payload
fn wrap_tool_outcome(outcome: Result<Value, String>) -> Value {
    match outcome {
        Ok(value) => serde_json::json!({
            "content": [{
                "type": "text",
                "text": value.to_string(),
            }],
            "isError": false,
        }),
        Err(message) => serde_json::json!({
            "content": [{
                "type": "text",
                "text": message,
            }],
            "isError": true,
        }),
    }
}

// ============================================================================
// TESTS
// ============================================================================
