//! Tool dispatcher: descriptor publication, input validation, call
//! routing, and error shaping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use proto::{Error, SchemaError, ToolDescriptor, ToolOutput};
use serde_json::{Value, json};
use tools::{Tool, ToolContext};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Routes tool calls from the transport to tool strategies
pub struct Dispatcher {
    tools: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, Arc<dyn Tool>>,
    ctx: ToolContext,
}

impl Dispatcher {
    /// Builds the dispatch table. `disabled` names come from
    /// `DISABLED_TOOLS`; unknown entries are logged, not fatal.
    pub fn new(ctx: ToolContext, tools: Vec<Arc<dyn Tool>>, disabled: &[String]) -> Self {
        let known: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        for name in disabled {
            if !known.contains(&name.as_str()) {
                warn!(tool = %name, "DISABLED_TOOLS names an unknown tool");
            }
        }

        let tools: Vec<Arc<dyn Tool>> = tools
            .into_iter()
            .filter(|t| {
                let keep = !disabled.iter().any(|d| d == t.name());
                if !keep {
                    info!(tool = %t.name(), "tool disabled by configuration");
                }
                keep
            })
            .collect();
        let by_name = tools
            .iter()
            .map(|t| (t.name().to_string(), Arc::clone(t)))
            .collect();
        Self {
            tools,
            by_name,
            ctx,
        }
    }

    /// Descriptors advertised to the host at startup.
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| tools::descriptor(t.as_ref())).collect()
    }

    /// Validates and executes one tool call.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput, Error> {
        let tool = self
            .by_name
            .get(name)
            .ok_or_else(|| SchemaError::UnknownTool(name.to_string()))?;
        validate_input(&tool.input_schema(), &arguments)?;

        let correlation_id = Uuid::new_v4();
        let started = Instant::now();
        debug!(tool = %name, correlation = %correlation_id, "tool call started");
        let result = tool.execute(&self.ctx, arguments).await;
        match &result {
            Ok(_) => info!(
                tool = %name,
                correlation = %correlation_id,
                elapsed_ms = %started.elapsed().as_millis(),
                "tool call finished"
            ),
            Err(err) => warn!(
                tool = %name,
                correlation = %correlation_id,
                elapsed_ms = %started.elapsed().as_millis(),
                error = %err,
                "tool call failed"
            ),
        }
        result.map_err(|err| match err {
            // Internal failures carry the correlation id out to the host.
            Error::Internal(msg) => Error::Internal(format!("[{correlation_id}] {msg}")),
            other => other,
        })
    }
}

/// Checks arguments against a tool schema: required fields present,
/// primitive types matching. The offending field path is reported.
pub fn validate_input(schema: &Value, arguments: &Value) -> Result<(), SchemaError> {
    let Some(args) = arguments.as_object() else {
        return Err(SchemaError::Validation {
            field: "arguments".to_string(),
            reason: "arguments must be a JSON object".to_string(),
        });
    };

    if let Some(required) = schema["required"].as_array() {
        for field in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(field) {
                return Err(SchemaError::Validation {
                    field: field.to_string(),
                    reason: "required field is missing".to_string(),
                });
            }
        }
    }

    let Some(properties) = schema["properties"].as_object() else {
        return Ok(());
    };
    for (field, value) in args {
        let Some(spec) = properties.get(field) else {
            continue;
        };
        let matches = match spec["type"].as_str() {
            Some("string") => value.is_string(),
            Some("integer") => value.is_u64() || value.is_i64(),
            Some("number") => value.is_number(),
            Some("boolean") => value.is_boolean(),
            Some("array") => value.is_array(),
            Some("object") => value.is_object(),
            _ => true,
        };
        if !matches {
            return Err(SchemaError::Validation {
                field: field.clone(),
                reason: format!(
                    "expected {}, got {}",
                    spec["type"].as_str().unwrap_or("unknown"),
                    type_name(value)
                ),
            });
        }
    }
    Ok(())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Shapes any error into the structured payload returned to the host.
pub fn error_payload(err: &Error) -> Value {
    match err {
        Error::Config(e) => json!({"kind": "config_invalid", "message": e.to_string()}),
        Error::Model(proto::ModelError::UnknownModel { model, suggestions }) => json!({
            "kind": "unknown_model",
            "message": format!("Unknown model: '{model}'"),
            "suggestions": suggestions,
        }),
        Error::Model(proto::ModelError::Restricted {
            model,
            provider,
            allowed,
        }) => json!({
            "kind": "restricted",
            "message": format!("Model '{model}' is not allowed for provider {provider}"),
            "allowed": allowed,
        }),
        Error::Upstream(proto::UpstreamError::RateLimited { retry_after }) => json!({
            "kind": "upstream_rate_limited",
            "message": err.to_string(),
            "retry_after": retry_after,
        }),
        Error::Upstream(proto::UpstreamError::Timeout { elapsed_ms }) => json!({
            "kind": "upstream_timeout",
            "message": err.to_string(),
            "elapsed_ms": elapsed_ms,
        }),
        Error::Upstream(proto::UpstreamError::Http { status, body, .. }) => json!({
            "kind": "upstream_http",
            "status": status,
            "message": body,
        }),
        Error::Upstream(e) => json!({"kind": "upstream", "message": e.to_string()}),
        Error::Memory(proto::MemoryError::ThreadUnknown(id)) => json!({
            "kind": "thread_unknown",
            "message": err.to_string(),
            "thread_id": id,
        }),
        Error::Memory(proto::MemoryError::ThreadExpired(id)) => json!({
            "kind": "thread_expired",
            "message": err.to_string(),
            "thread_id": id,
        }),
        Error::Memory(proto::MemoryError::ThreadFull { thread_id, .. }) => json!({
            "kind": "thread_full",
            "message": err.to_string(),
            "thread_id": thread_id,
        }),
        Error::Schema(proto::SchemaError::Validation { field, reason }) => json!({
            "kind": "schema_invalid",
            "field": field,
            "message": reason,
        }),
        Error::Schema(proto::SchemaError::UnknownTool(name)) => json!({
            "kind": "unknown_tool",
            "message": format!("Unknown tool: {name}"),
        }),
        Error::Internal(msg) => json!({"kind": "internal", "message": msg}),
    }
}
