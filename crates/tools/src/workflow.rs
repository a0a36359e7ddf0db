//! Workflow engine for multi-step tools.
//!
//! A workflow tool is a strategy (debug, codereview, planner, thinkdeep)
//! driven by one shared state machine. Each call carries the host's new
//! findings for one step; intermediate steps pause and tell the host what
//! to investigate next, the terminal step optionally consults an expert
//! model over the consolidated findings. State lives inside the
//! conversation thread, so a workflow resumes from any process sharing the
//! same store.

use async_trait::async_trait;
use proto::{
    Error, SchemaError, ThinkingMode, ToolCategory, ToolOutput, Turn, WorkflowStatus,
};
use providers::base::GenerateRequest;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::schema::{CommonArgs, SchemaBuilder};
use crate::{Tool, ToolContext, ToolDefaults};

/// Host-reported certainty about the current hypothesis
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    #[default]
    Exploring,
    Low,
    Medium,
    High,
    VeryHigh,
    AlmostCertain,
    Certain,
}

/// One step as reported by the host
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRequest {
    /// Narrative of what the host did in this step.
    pub step: String,
    /// 1-based step index.
    pub step_number: usize,
    /// Host's current estimate of the total steps needed.
    pub total_steps: usize,
    /// True while the host expects to continue investigating.
    pub next_step_required: bool,
    #[serde(default)]
    pub findings: String,
    #[serde(default)]
    pub files_checked: Vec<String>,
    #[serde(default)]
    pub relevant_files: Vec<String>,
    #[serde(default)]
    pub issues_found: Vec<serde_json::Value>,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(flatten)]
    pub common: CommonArgs,
}

/// Findings accumulated across steps, persisted in the thread
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsolidatedFindings {
    pub step_number: usize,
    pub total_steps: usize,
    pub findings: Vec<String>,
    pub files_checked: Vec<String>,
    pub relevant_files: Vec<String>,
    pub issues_found: Vec<serde_json::Value>,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default)]
    pub complete: bool,
}

impl ConsolidatedFindings {
    /// Folds one step's report into the accumulated state.
    fn absorb(&mut self, request: &WorkflowRequest) {
        self.step_number = request.step_number;
        self.total_steps = request.total_steps;
        self.confidence = request.confidence;
        if !request.findings.is_empty() {
            self.findings
                .push(format!("Step {}: {}", request.step_number, request.findings));
        }
        for path in &request.files_checked {
            if !self.files_checked.contains(path) {
                self.files_checked.push(path.clone());
            }
        }
        for path in &request.relevant_files {
            if !self.relevant_files.contains(path) {
                self.relevant_files.push(path.clone());
            }
        }
        self.issues_found.extend(request.issues_found.iter().cloned());
    }

    /// Render for the expert prompt.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Investigation across {} of {} planned steps (confidence: {:?}).\n\n",
            self.step_number, self.total_steps, self.confidence
        ));
        if !self.findings.is_empty() {
            out.push_str("Findings:\n");
            for finding in &self.findings {
                out.push_str(&format!("- {finding}\n"));
            }
        }
        if !self.relevant_files.is_empty() {
            out.push_str("\nRelevant files:\n");
            for path in &self.relevant_files {
                out.push_str(&format!("- {path}\n"));
            }
        }
        if !self.issues_found.is_empty() {
            out.push_str(&format!("\nIssues found: {}\n", json!(self.issues_found)));
        }
        out
    }
}

/// Strategy interface for one multi-step tool
pub trait WorkflowTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    fn category(&self) -> ToolCategory {
        ToolCategory::ExtendedReasoning
    }

    /// System prompt for the expert-analysis call.
    fn system_prompt(&self) -> &str;

    fn default_temperature(&self) -> f64 {
        0.2
    }

    /// Thinking mode for the expert call when the host passed none.
    fn default_thinking_mode(&self, _defaults: &ToolDefaults) -> Option<ThinkingMode> {
        None
    }

    /// What the host should do before reporting the next step.
    fn required_actions(
        &self,
        step_number: usize,
        confidence: Confidence,
        total_steps: usize,
    ) -> Vec<String>;

    /// Whether the terminal step consults the expert model.
    fn should_call_expert_analysis(&self, _findings: &ConsolidatedFindings) -> bool {
        true
    }

    /// Prompt handed to the expert model on the terminal step.
    fn expert_context(&self, findings: &ConsolidatedFindings) -> String {
        findings.render()
    }
}

/// Adapter running any [`WorkflowTool`] strategy as a [`Tool`]
pub struct WorkflowHandle<T> {
    strategy: T,
}

impl<T: WorkflowTool> WorkflowHandle<T> {
    pub fn new(strategy: T) -> Self {
        Self { strategy }
    }
}

#[async_trait]
impl<T: WorkflowTool> Tool for WorkflowHandle<T> {
    fn name(&self) -> &str {
        self.strategy.name()
    }

    fn description(&self) -> &str {
        self.strategy.description()
    }

    fn category(&self) -> ToolCategory {
        self.strategy.category()
    }

    fn input_schema(&self) -> serde_json::Value {
        workflow_schema()
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        args: serde_json::Value,
    ) -> Result<ToolOutput, Error> {
        let request: WorkflowRequest =
            serde_json::from_value(args).map_err(|e| SchemaError::Validation {
                field: "arguments".to_string(),
                reason: e.to_string(),
            })?;
        validate_step(&request)?;

        // Open or continue the thread that carries this workflow.
        let step_turn = Turn::user(&request.step)
            .with_tool(self.name())
            .with_files(request.common.files.clone());
        let thread_id = match request.common.continuation_id {
            Some(id) => {
                ctx.store.append_turn(&id, step_turn)?;
                id
            }
            None => ctx.store.create_thread(self.name(), step_turn, None),
        };
        ctx.store.record_files(&thread_id, &request.relevant_files)?;

        let mut findings: ConsolidatedFindings = ctx
            .store
            .workflow_state(&thread_id)?
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| Error::Internal(format!("corrupt workflow state: {e}")))?
            .unwrap_or_default();
        findings.absorb(&request);

        let output = if request.next_step_required && request.step_number < request.total_steps {
            debug!(
                tool = %self.name(),
                step = request.step_number,
                total = request.total_steps,
                "workflow pausing for investigation"
            );
            let actions = self.strategy.required_actions(
                request.step_number,
                request.confidence,
                request.total_steps,
            );
            let summary = json!({
                "status": WorkflowStatus::PauseForInvestigation,
                "step_number": request.step_number,
                "total_steps": request.total_steps,
                "next_step_number": request.step_number + 1,
                "required_actions": actions.clone(),
                "continuation_id": thread_id,
            });
            ctx.store.append_turn(
                &thread_id,
                Turn::assistant(summary.to_string()).with_tool(self.name()),
            )?;

            ToolOutput::text(serde_json::to_string_pretty(&summary).map_err(|e| {
                Error::Internal(format!("workflow response serialization: {e}"))
            })?)
            .with_status(WorkflowStatus::PauseForInvestigation)
            .with_continuation(thread_id)
            .with_metadata("required_actions", json!(actions))
        } else {
            findings.complete = true;
            let mut output = if self.strategy.should_call_expert_analysis(&findings) {
                let expert = self
                    .run_expert_analysis(ctx, &request, &findings)
                    .await?;
                ToolOutput::text(&expert.content)
                    .with_status(WorkflowStatus::Complete)
                    .with_continuation(thread_id)
                    .with_metadata("expert_model", json!(expert.model_name))
                    .with_metadata("expert_usage", json!(expert.usage))
            } else {
                ToolOutput::text(
                    serde_json::to_string_pretty(&json!({
                        "status": WorkflowStatus::Complete,
                        "step_number": request.step_number,
                        "summary": findings.render(),
                    }))
                    .map_err(|e| Error::Internal(format!("workflow response serialization: {e}")))?,
                )
                .with_status(WorkflowStatus::Complete)
                .with_continuation(thread_id)
            };
            output = output.with_metadata("steps_taken", json!(findings.step_number));
            ctx.store.append_turn(
                &thread_id,
                Turn::assistant(output.joined_text()).with_tool(self.name()),
            )?;
            output
        };

        let state = serde_json::to_value(&findings)
            .map_err(|e| Error::Internal(format!("workflow state serialization: {e}")))?;
        ctx.store.set_workflow_state(&thread_id, state)?;
        Ok(output)
    }
}

impl<T: WorkflowTool> WorkflowHandle<T> {
    /// Terminal provider call over the consolidated findings. Never
    /// retried here; provider failures surface to the host untouched.
    async fn run_expert_analysis(
        &self,
        ctx: &ToolContext,
        request: &WorkflowRequest,
        findings: &ConsolidatedFindings,
    ) -> Result<proto::ModelResponse, Error> {
        let model = request.common.resolve_model(ctx, self.strategy.category())?;
        let provider = ctx.registry.get_provider_for_model(&model)?;
        let caps = provider.capabilities(&model)?.clone();
        debug!(
            tool = %self.name(),
            model = %caps.model_name,
            "consulting expert model over consolidated findings"
        );

        provider
            .generate(GenerateRequest {
                prompt: self.strategy.expert_context(findings),
                model: caps.model_name,
                system_prompt: Some(self.strategy.system_prompt().to_string()),
                temperature: request
                    .common
                    .temperature
                    .or(Some(self.strategy.default_temperature())),
                max_output_tokens: None,
                thinking_mode: request
                    .common
                    .thinking_mode
                    .or_else(|| self.strategy.default_thinking_mode(&ctx.defaults)),
                images: request.common.images.clone(),
                json_mode: false,
            })
            .await
    }
}

/// Shared schema for every workflow tool.
fn workflow_schema() -> serde_json::Value {
    SchemaBuilder::new()
        .string("step", "What you did or plan to do in this step", true)
        .integer("step_number", "Current step index, starting at 1", true)
        .integer("total_steps", "Current estimate of steps needed", true)
        .boolean(
            "next_step_required",
            "True while further investigation is planned; false on the final step",
            true,
        )
        .string("findings", "What this step uncovered", false)
        .string_array("files_checked", "All files examined so far")
        .string_array("relevant_files", "Files tied to the issue or goal")
        .enumeration(
            "confidence",
            &[
                "exploring",
                "low",
                "medium",
                "high",
                "very_high",
                "almost_certain",
                "certain",
            ],
            "Certainty about the current hypothesis",
        )
        .with_common_fields()
        .build()
}

fn validate_step(request: &WorkflowRequest) -> Result<(), SchemaError> {
    if request.step_number == 0 {
        return Err(SchemaError::Validation {
            field: "step_number".to_string(),
            reason: "steps are 1-based".to_string(),
        });
    }
    if request.total_steps == 0 {
        return Err(SchemaError::Validation {
            field: "total_steps".to_string(),
            reason: "at least one step is required".to_string(),
        });
    }
    if request.step_number > request.total_steps {
        return Err(SchemaError::Validation {
            field: "step_number".to_string(),
            reason: format!(
                "step {} exceeds total_steps {}",
                request.step_number, request.total_steps
            ),
        });
    }
    Ok(())
}
