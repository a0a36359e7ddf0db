//! Tool trait and built-in tool implementations.
//!
//! The dispatcher uses this crate to publish tool descriptors and route
//! calls. Simple tools (chat, listmodels) execute in one shot; multi-step
//! tools are strategies driven by the workflow engine in [`workflow`].

pub mod chat;
pub mod codereview;
pub mod consensus;
pub mod debug;
pub mod listmodels;
pub mod planner;
pub mod schema;
pub mod thinkdeep;
pub mod workflow;

use std::sync::Arc;

use async_trait::async_trait;
use memory::ConversationStore;
use proto::{Error, ThinkingMode, ToolCategory, ToolDescriptor, ToolOutput};
use providers::ProviderRegistry;

pub use schema::{CommonArgs, SchemaBuilder};
pub use workflow::{WorkflowHandle, WorkflowTool};

/// Server-level defaults handed to every tool invocation
#[derive(Debug, Clone)]
pub struct ToolDefaults {
    /// `DEFAULT_MODEL`; `"auto"` selects by category and rank.
    pub default_model: String,
    /// `DEFAULT_THINKING_MODE_THINKDEEP`.
    pub thinkdeep_thinking_mode: ThinkingMode,
}

impl Default for ToolDefaults {
    fn default() -> Self {
        Self {
            default_model: "auto".to_string(),
            thinkdeep_thinking_mode: ThinkingMode::High,
        }
    }
}

/// Shared handles every tool receives on execute
#[derive(Clone)]
pub struct ToolContext {
    pub registry: Arc<ProviderRegistry>,
    pub store: Arc<ConversationStore>,
    pub defaults: ToolDefaults,
}

/// Trait that all tools implement
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name published to the host.
    fn name(&self) -> &str;
    /// Human-readable description for tool selection.
    fn description(&self) -> &str;
    /// Model demand profile, used when the caller asks for `auto`.
    fn category(&self) -> ToolCategory {
        ToolCategory::Balanced
    }
    /// JSON schema for accepted tool arguments.
    fn input_schema(&self) -> serde_json::Value;
    /// Executes the tool with already-validated JSON args.
    async fn execute(
        &self,
        ctx: &ToolContext,
        args: serde_json::Value,
    ) -> Result<ToolOutput, Error>;
}

/// Descriptor for one tool, as advertised over the transport.
pub fn descriptor(tool: &dyn Tool) -> ToolDescriptor {
    ToolDescriptor {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        input_schema: tool.input_schema(),
    }
}

/// The built-in tool catalogue, in the order it is published.
pub fn builtin_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(chat::ChatTool),
        Arc::new(listmodels::ListModelsTool),
        Arc::new(WorkflowHandle::new(debug::DebugTool)),
        Arc::new(WorkflowHandle::new(codereview::CodeReviewTool)),
        Arc::new(WorkflowHandle::new(planner::PlannerTool)),
        Arc::new(WorkflowHandle::new(thinkdeep::ThinkDeepTool)),
        Arc::new(consensus::ConsensusTool),
    ]
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use memory::{ConversationStore, StoreConfig};
    use proto::{
        Error, ModelCapabilities, ModelResponse, ProviderType, Usage,
    };
    use providers::base::{GenerateRequest, ModelProvider};
    use providers::{ProviderRegistry, RestrictionPolicy};

    use super::{ToolContext, ToolDefaults};

    /// Scripted provider that records calls and replies with canned text.
    #[derive(Debug)]
    pub struct ScriptedProvider {
        pub kind: ProviderType,
        pub models: BTreeMap<String, ModelCapabilities>,
        pub restrictions: Arc<RestrictionPolicy>,
        pub calls: Arc<AtomicU32>,
        pub reply: String,
    }

    #[async_trait]
    impl ModelProvider for ScriptedProvider {
        fn provider_type(&self) -> ProviderType {
            self.kind
        }

        fn capabilities_map(&self) -> &BTreeMap<String, ModelCapabilities> {
            &self.models
        }

        fn restriction_policy(&self) -> &RestrictionPolicy {
            &self.restrictions
        }

        async fn generate(&self, request: GenerateRequest) -> Result<ModelResponse, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let caps = self.capabilities(&request.model)?;
            Ok(ModelResponse::new(self.reply.clone(), caps, Usage::new(7, 3)))
        }
    }

    pub fn caps(name: &str, aliases: &[&str]) -> ModelCapabilities {
        serde_json::from_value(serde_json::json!({
            "provider": "openai",
            "model_name": name,
            "context_window": 400000,
            "max_output_tokens": 64000,
            "intelligence_score": 13,
            "supports_extended_thinking": true,
            "supports_images": true,
            "aliases": aliases,
            "allow_code_generation": true,
        }))
        .expect("capabilities fixture")
    }

    /// Context backed by one scripted OpenAI provider serving `gpt-5-mini`.
    pub fn scripted_context(reply: &str) -> (ToolContext, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = Arc::new(RestrictionPolicy::default());
        let mut registry = ProviderRegistry::new(Arc::clone(&policy));

        let mut models = BTreeMap::new();
        let capabilities = caps("gpt-5-mini", &["mini"]);
        models.insert(capabilities.model_name.clone(), capabilities);

        let reply = reply.to_string();
        let factory_calls = Arc::clone(&calls);
        let factory_policy = Arc::clone(&policy);
        registry.register(
            ProviderType::OpenAi,
            Box::new(move || {
                Ok(Arc::new(ScriptedProvider {
                    kind: ProviderType::OpenAi,
                    models: models.clone(),
                    restrictions: Arc::clone(&factory_policy),
                    calls: Arc::clone(&factory_calls),
                    reply: reply.clone(),
                }) as Arc<dyn ModelProvider>)
            }),
        );

        let ctx = ToolContext {
            registry: Arc::new(registry),
            store: Arc::new(ConversationStore::new(StoreConfig::default())),
            defaults: ToolDefaults::default(),
        };
        (ctx, calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalogue_has_unique_names_and_schemas() {
        let tools = builtin_tools();
        let mut names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        assert!(names.contains(&"chat"));
        assert!(names.contains(&"debug"));
        assert!(names.contains(&"consensus"));

        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), tools.len(), "duplicate tool name published");

        for tool in &tools {
            let schema = tool.input_schema();
            assert_eq!(schema["type"], "object", "{} schema", tool.name());
        }
    }

    #[test]
    fn descriptor_copies_name_description_and_schema() {
        let tools = builtin_tools();
        let desc = descriptor(tools[0].as_ref());
        assert_eq!(desc.name, "chat");
        assert!(!desc.description.is_empty());
        assert_eq!(desc.input_schema["type"], "object");
    }
}
