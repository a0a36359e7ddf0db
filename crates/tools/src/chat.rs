//! General-purpose chat tool.
//!
//! One provider call per invocation. Attached files are embedded into the
//! prompt, history is reconstructed when the host continues a thread, and
//! models cleared for code generation may emit a file artifact into the
//! caller's working directory.

use async_trait::async_trait;
use proto::{
    Error, Role, SchemaError, ToolCategory, ToolOutput, Turn,
};
use providers::base::GenerateRequest;
use serde_json::json;
use tracing::debug;

use crate::schema::{CommonArgs, SchemaBuilder, history_budget};
use crate::{Tool, ToolContext};

const SYSTEM_PROMPT: &str = "You are a senior engineering collaborator working with another \
AI agent. Give direct, technically grounded answers. When you are unsure, say so and name \
what would settle the question.";

/// Name of the artifact written when a model emits generated code.
const GENERATED_CODE_FILE: &str = "zenmcp-generated.md";

pub struct ChatTool;

#[async_trait]
impl Tool for ChatTool {
    fn name(&self) -> &str {
        "chat"
    }

    fn description(&self) -> &str {
        "General chat and collaborative thinking with a model; supports file and image \
         context and cross-tool conversation continuation"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::FastResponse
    }

    fn input_schema(&self) -> serde_json::Value {
        SchemaBuilder::new()
            .string("prompt", "Your question or idea for the model", true)
            .with_common_fields()
            .build()
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        args: serde_json::Value,
    ) -> Result<ToolOutput, Error> {
        let common = CommonArgs::parse(&args)?;
        let prompt = args
            .get("prompt")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SchemaError::Validation {
                field: "prompt".to_string(),
                reason: "required string field is missing".to_string(),
            })?
            .to_string();

        let model = common.resolve_model(ctx, self.category())?;
        let provider = ctx.registry.get_provider_for_model(&model)?;
        let caps = provider.capabilities(&model)?.clone();

        // Continue an existing thread or start a fresh one.
        let mut history_block = String::new();
        let thread_id = match common.continuation_id {
            Some(id) => {
                let history = ctx
                    .store
                    .reconstruct(&id, history_budget(caps.context_window))?;
                history_block = render_history(&history);
                ctx.store.append_turn(
                    &id,
                    Turn::user(&prompt)
                        .with_tool(self.name())
                        .with_files(common.files.clone()),
                )?;
                id
            }
            None => ctx.store.create_thread(
                self.name(),
                Turn::user(&prompt)
                    .with_tool(self.name())
                    .with_files(common.files.clone()),
                None,
            ),
        };
        ctx.store.record_files(&thread_id, &common.files)?;

        let full_prompt = assemble_prompt(&history_block, &common.files, &prompt)?;
        debug!(model = %caps.model_name, thread = %thread_id, "chat prompt assembled");

        let response = provider
            .generate(GenerateRequest {
                prompt: full_prompt,
                model: caps.model_name.clone(),
                system_prompt: Some(SYSTEM_PROMPT.to_string()),
                temperature: common.temperature,
                max_output_tokens: None,
                thinking_mode: common.thinking_mode,
                images: common.images.clone(),
                json_mode: false,
            })
            .await?;

        ctx.store.append_turn(
            &thread_id,
            Turn::assistant(&response.content)
                .with_tool(self.name())
                .with_model(&response.model_name),
        )?;
        let info = ctx.store.thread_info(&thread_id)?;

        let mut output = ToolOutput::text(&response.content)
            .with_continuation(thread_id)
            .with_metadata("model", json!(response.model_name))
            .with_metadata("provider", json!(response.provider))
            .with_metadata("usage", json!(response.usage))
            .with_metadata("remaining_turns", json!(info.remaining_turns));

        if let (Some(dir), true) = (&common.working_directory, caps.allow_code_generation)
            && contains_fenced_code(&response.content)
        {
            let path = write_generated_artifact(dir, &response.content)?;
            output.push_file_reference(&path);
        }
        Ok(output)
    }
}

/// Renders reconstructed turns into a prompt preamble.
fn render_history(history: &[Turn]) -> String {
    if history.is_empty() {
        return String::new();
    }
    let mut block = String::from("=== CONVERSATION HISTORY ===\n");
    for turn in history {
        let speaker = match turn.role {
            Role::User => "Agent",
            Role::Assistant => turn.model_used.as_deref().unwrap_or("Model"),
            Role::System => "System",
        };
        block.push_str(&format!("{speaker}: {}\n", turn.content));
    }
    block.push_str("=== END HISTORY ===\n\n");
    block
}

/// Embeds attached files as fenced blocks ahead of the question.
fn assemble_prompt(history: &str, files: &[String], prompt: &str) -> Result<String, Error> {
    let mut assembled = String::from(history);
    for path in files {
        let contents = std::fs::read_to_string(path).map_err(|e| SchemaError::Validation {
            field: "files".to_string(),
            reason: format!("cannot read {path}: {e}"),
        })?;
        assembled.push_str(&format!("--- {path} ---\n```\n{contents}\n```\n\n"));
    }
    assembled.push_str(prompt);
    Ok(assembled)
}

fn contains_fenced_code(content: &str) -> bool {
    content.matches("```").count() >= 2
}

/// Writes the full response into the caller's working directory and
/// returns the artifact path.
fn write_generated_artifact(dir: &str, content: &str) -> Result<String, Error> {
    let path = std::path::Path::new(dir).join(GENERATED_CODE_FILE);
    std::fs::write(&path, content).map_err(|e| {
        Error::Internal(format!(
            "failed to write generated artifact {}: {e}",
            path.display()
        ))
    })?;
    Ok(path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::atomic::Ordering;

    use proto::ContentBlock;

    use super::*;
    use crate::test_support::scripted_context;

    #[tokio::test]
    async fn chat_calls_provider_and_threads_conversation() {
        let (ctx, calls) = scripted_context("the answer is 42");
        let output = ChatTool
            .execute(&ctx, json!({"prompt": "what is the answer?", "model": "mini"}))
            .await
            .expect("chat should succeed");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(output.joined_text(), "the answer is 42");
        assert_eq!(output.metadata["model"], "gpt-5-mini");
        assert_eq!(output.metadata["remaining_turns"], 18);

        let thread_id = output.continuation_id.expect("continuation offered");
        let history = ctx.store.reconstruct(&thread_id, 10_000).expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].model_used.as_deref(), Some("gpt-5-mini"));
    }

    #[tokio::test]
    async fn chat_continues_existing_thread_from_another_tool() {
        let (ctx, _) = scripted_context("continuing");
        let thread_id = ctx.store.create_thread(
            "planner",
            Turn::user("plan migration").with_tool("planner"),
            None,
        );

        let output = ChatTool
            .execute(
                &ctx,
                json!({
                    "prompt": "and the rollback?",
                    "model": "gpt-5-mini",
                    "continuation_id": thread_id.to_string(),
                }),
            )
            .await
            .expect("continuation should succeed");

        assert_eq!(output.continuation_id, Some(thread_id));
        let history = ctx.store.reconstruct(&thread_id, 10_000).expect("history");
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "plan migration");
        assert_eq!(history[0].tool_name.as_deref(), Some("planner"));
        assert_eq!(history[1].tool_name.as_deref(), Some("chat"));
    }

    #[tokio::test]
    async fn chat_missing_prompt_is_a_schema_error() {
        let (ctx, calls) = scripted_context("unused");
        let err = ChatTool
            .execute(&ctx, json!({"model": "mini"}))
            .await
            .expect_err("prompt is required");
        assert!(matches!(err, Error::Schema(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn chat_unknown_model_surfaces_model_error() {
        let (ctx, calls) = scripted_context("unused");
        let err = ChatTool
            .execute(&ctx, json!({"prompt": "hi", "model": "claude"}))
            .await
            .expect_err("unknown model");
        assert!(matches!(err, Error::Model(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn chat_embeds_attached_files_into_prompt() {
        let (ctx, _) = scripted_context("saw the file");
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "fn main() {{}}").expect("write");
        let path = file.path().to_string_lossy().into_owned();

        let output = ChatTool
            .execute(
                &ctx,
                json!({"prompt": "review this", "model": "mini", "files": [path.clone()]}),
            )
            .await
            .expect("chat with file");

        let thread_id = output.continuation_id.expect("continuation");
        assert_eq!(ctx.store.files(&thread_id).expect("files"), vec![path]);
    }

    #[tokio::test]
    async fn chat_unreadable_file_is_a_schema_error() {
        let (ctx, _) = scripted_context("unused");
        let err = ChatTool
            .execute(
                &ctx,
                json!({"prompt": "x", "model": "mini", "files": ["/nonexistent/a.rs"]}),
            )
            .await
            .expect_err("unreadable file");
        assert!(err.to_string().contains("files"));
    }

    #[tokio::test]
    async fn chat_writes_code_artifact_when_model_allows_it() {
        let (ctx, _) = scripted_context("here you go\n```rust\nfn f() {}\n```\n");
        let dir = tempfile::tempdir().expect("tempdir");

        let output = ChatTool
            .execute(
                &ctx,
                json!({
                    "prompt": "write f",
                    "model": "mini",
                    "working_directory": dir.path().to_string_lossy(),
                }),
            )
            .await
            .expect("chat with codegen");

        let reference = output
            .blocks
            .iter()
            .find_map(|b| match b {
                ContentBlock::FileReference { path } => Some(path.clone()),
                ContentBlock::Text { .. } => None,
            })
            .expect("file reference block");
        let written = std::fs::read_to_string(&reference).expect("artifact exists");
        assert!(written.contains("fn f()"));
    }

    #[tokio::test]
    async fn chat_without_working_directory_emits_no_artifact() {
        let (ctx, _) = scripted_context("```rust\nfn f() {}\n```");
        let output = ChatTool
            .execute(&ctx, json!({"prompt": "write f", "model": "mini"}))
            .await
            .expect("chat");
        assert_eq!(output.blocks.len(), 1);
    }

    #[test]
    fn render_history_labels_speakers() {
        let turns = vec![
            Turn::user("question"),
            Turn::assistant("answer").with_model("gpt-5-mini"),
        ];
        let block = render_history(&turns);
        assert!(block.contains("Agent: question"));
        assert!(block.contains("gpt-5-mini: answer"));
        assert!(render_history(&[]).is_empty());
    }
}
