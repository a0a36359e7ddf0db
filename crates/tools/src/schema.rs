//! Input-schema construction and the common argument envelope.
//!
//! Every tool schema merges its own properties with the shared fields
//! (`model`, `temperature`, `thinking_mode`, `continuation_id`, `files`,
//! `images`, `working_directory`) so hosts see one consistent surface.

use proto::{Error, ModelError, SchemaError, ThinkingMode, ThreadId, ToolCategory};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::ToolContext;

/// Builder for tool input schemas
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    properties: Map<String, Value>,
    required: Vec<String>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn string(mut self, name: &str, description: &str, required: bool) -> Self {
        self.properties.insert(
            name.to_string(),
            json!({"type": "string", "description": description}),
        );
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    pub fn integer(mut self, name: &str, description: &str, required: bool) -> Self {
        self.properties.insert(
            name.to_string(),
            json!({"type": "integer", "minimum": 1, "description": description}),
        );
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    pub fn boolean(mut self, name: &str, description: &str, required: bool) -> Self {
        self.properties.insert(
            name.to_string(),
            json!({"type": "boolean", "description": description}),
        );
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    pub fn string_array(mut self, name: &str, description: &str) -> Self {
        self.properties.insert(
            name.to_string(),
            json!({"type": "array", "items": {"type": "string"}, "description": description}),
        );
        self
    }

    pub fn enumeration(mut self, name: &str, values: &[&str], description: &str) -> Self {
        self.properties.insert(
            name.to_string(),
            json!({"type": "string", "enum": values, "description": description}),
        );
        self
    }

    /// Adds the shared fields every tool accepts.
    pub fn with_common_fields(self) -> Self {
        self.string(
            "model",
            "Model name or alias; 'auto' picks the best allowed model for this tool",
            false,
        )
        .number("temperature", "Sampling temperature; clamped to what the model accepts")
        .enumeration(
            "thinking_mode",
            &["minimal", "low", "medium", "high", "max"],
            "Extended-thinking depth for models that support it",
        )
        .string(
            "continuation_id",
            "Thread UUID from a previous call to continue that conversation",
            false,
        )
        .string_array("files", "Absolute file paths to attach as context")
        .string_array("images", "Absolute image paths to attach")
        .string(
            "working_directory",
            "Absolute directory for generated-code artifacts",
            false,
        )
    }

    fn number(mut self, name: &str, description: &str) -> Self {
        self.properties.insert(
            name.to_string(),
            json!({"type": "number", "description": description}),
        );
        self
    }

    pub fn build(self) -> Value {
        json!({
            "type": "object",
            "properties": Value::Object(self.properties),
            "required": self.required,
        })
    }
}

/// Shared argument envelope accepted by every tool
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommonArgs {
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub thinking_mode: Option<ThinkingMode>,
    pub continuation_id: Option<ThreadId>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    pub working_directory: Option<String>,
}

impl CommonArgs {
    pub fn parse(args: &Value) -> Result<Self, SchemaError> {
        serde_json::from_value(args.clone()).map_err(|e| SchemaError::Validation {
            field: "arguments".to_string(),
            reason: e.to_string(),
        })
    }

    /// Resolves the effective model name: explicit argument, then the
    /// server default, with `auto` mapped to the registry's best-ranked
    /// allowed model for the tool category.
    pub fn resolve_model(&self, ctx: &ToolContext, category: ToolCategory) -> Result<String, Error> {
        let requested = self
            .model
            .clone()
            .unwrap_or_else(|| ctx.defaults.default_model.clone());
        if !requested.eq_ignore_ascii_case("auto") {
            return Ok(requested);
        }
        ctx.registry
            .best_for(category)
            .map(|caps| caps.model_name)
            .ok_or_else(|| {
                ModelError::UnknownModel {
                    model: "auto".to_string(),
                    suggestions: Vec::new(),
                }
                .into()
            })
    }
}

/// History budget for prompt reconstruction: 60% of the model's window.
pub fn history_budget(context_window: u32) -> usize {
    (context_window as usize) * 6 / 10
}

#[cfg(test)]
mod tests {
    use proto::ToolCategory;

    use super::*;
    use crate::test_support::scripted_context;

    #[test]
    fn builder_collects_properties_and_required_fields() {
        let schema = SchemaBuilder::new()
            .string("prompt", "the prompt", true)
            .integer("step_number", "current step", true)
            .boolean("next_step_required", "more steps?", false)
            .build();

        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["prompt"]["type"], "string");
        assert_eq!(schema["properties"]["step_number"]["type"], "integer");
        let required: Vec<&str> = schema["required"]
            .as_array()
            .expect("required list")
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(required, vec!["prompt", "step_number"]);
    }

    #[test]
    fn common_fields_are_merged_into_every_schema() {
        let schema = SchemaBuilder::new()
            .string("prompt", "the prompt", true)
            .with_common_fields()
            .build();
        for field in [
            "model",
            "temperature",
            "thinking_mode",
            "continuation_id",
            "files",
            "images",
            "working_directory",
        ] {
            assert!(
                schema["properties"].get(field).is_some(),
                "missing common field {field}"
            );
        }
        assert_eq!(
            schema["properties"]["thinking_mode"]["enum"][4],
            "max"
        );
    }

    #[test]
    fn common_args_parse_accepts_partial_input() {
        let args = CommonArgs::parse(&json!({
            "prompt": "ignored by the envelope",
            "model": "mini",
            "files": ["/a.rs"],
        }))
        .expect("parse");
        assert_eq!(args.model.as_deref(), Some("mini"));
        assert_eq!(args.files, vec!["/a.rs"]);
        assert!(args.continuation_id.is_none());
    }

    #[test]
    fn common_args_parse_rejects_bad_types() {
        let err = CommonArgs::parse(&json!({"temperature": "hot"})).expect_err("bad type");
        assert!(matches!(err, SchemaError::Validation { .. }));

        let err =
            CommonArgs::parse(&json!({"continuation_id": "not-a-uuid"})).expect_err("bad uuid");
        assert!(err.to_string().contains("arguments"));
    }

    #[test]
    fn resolve_model_prefers_explicit_argument() {
        let (ctx, _) = scripted_context("ok");
        let args = CommonArgs {
            model: Some("mini".to_string()),
            ..CommonArgs::default()
        };
        assert_eq!(
            args.resolve_model(&ctx, ToolCategory::FastResponse)
                .expect("resolve"),
            "mini"
        );
    }

    #[test]
    fn resolve_model_auto_picks_best_ranked() {
        let (ctx, _) = scripted_context("ok");
        let args = CommonArgs::default();
        // Server default is "auto"; the scripted registry serves one model.
        assert_eq!(
            args.resolve_model(&ctx, ToolCategory::FastResponse)
                .expect("resolve"),
            "gpt-5-mini"
        );
    }

    #[test]
    fn history_budget_is_sixty_percent_of_window() {
        assert_eq!(history_budget(100_000), 60_000);
        assert_eq!(history_budget(0), 0);
    }
}
