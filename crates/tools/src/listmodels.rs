//! Model inventory tool. Pure registry read; no upstream calls.

use async_trait::async_trait;
use proto::{Error, ProviderType, ToolCategory, ToolOutput};
use serde_json::json;

use crate::schema::SchemaBuilder;
use crate::{Tool, ToolContext};

pub struct ListModelsTool;

#[async_trait]
impl Tool for ListModelsTool {
    fn name(&self) -> &str {
        "listmodels"
    }

    fn description(&self) -> &str {
        "List configured providers and the models the current restriction policy allows, \
         with aliases and capability ranks"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::FastResponse
    }

    fn input_schema(&self) -> serde_json::Value {
        SchemaBuilder::new()
            .string(
                "provider",
                "Limit output to one provider (e.g. 'openai', 'google')",
                false,
            )
            .build()
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        args: serde_json::Value,
    ) -> Result<ToolOutput, Error> {
        let filter: Option<ProviderType> = args
            .get("provider")
            .and_then(|v| v.as_str())
            .map(|s| s.parse::<ProviderType>())
            .transpose()
            .map_err(Error::Config)?;

        let mut out = String::from("# Available models\n");
        let mut total = 0usize;
        for provider_type in ProviderType::PRIORITY_ORDER {
            if let Some(wanted) = filter
                && wanted != provider_type
            {
                continue;
            }
            let Some(provider) = ctx.registry.get_provider(provider_type) else {
                continue;
            };

            out.push_str(&format!("\n## {provider_type}\n"));
            if ctx.registry.restrictions().has_restrictions(provider_type) {
                out.push_str(&format!(
                    "Restricted to: {}\n",
                    ctx.registry
                        .restrictions()
                        .allowed_summary(provider_type)
                        .join(", ")
                ));
            }

            let mut caps: Vec<_> = provider
                .capabilities_map()
                .values()
                .filter(|c| {
                    ctx.registry.restrictions().is_allowed(
                        provider_type,
                        &c.model_name,
                        &c.aliases,
                    )
                })
                .collect();
            caps.sort_by(|a, b| {
                b.effective_rank()
                    .cmp(&a.effective_rank())
                    .then_with(|| a.model_name.cmp(&b.model_name))
            });

            for c in caps {
                total += 1;
                let aliases = if c.aliases.is_empty() {
                    String::new()
                } else {
                    format!(" (aliases: {})", c.aliases.join(", "))
                };
                out.push_str(&format!(
                    "- `{}`{} rank {} context {}k\n",
                    c.model_name,
                    aliases,
                    c.effective_rank(),
                    c.context_window / 1_000,
                ));
            }
        }
        out.push_str(&format!("\n{total} models available\n"));

        Ok(ToolOutput::text(out).with_metadata("model_count", json!(total)))
    }
}
