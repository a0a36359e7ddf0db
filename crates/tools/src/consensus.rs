//! Multi-model consensus tool.
//!
//! The host states a proposal, names the models to consult and the stance
//! each should take, then calls back once per step. Every step consults
//! one model; the final step hands all collected verdicts back so the
//! host can synthesize. Unlike the other workflow tools there is no
//! expert call at the end; the per-step consultations are the point.

use async_trait::async_trait;
use proto::{
    Error, SchemaError, ToolCategory, ToolOutput, Turn, WorkflowStatus,
};
use providers::base::GenerateRequest;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::schema::{CommonArgs, SchemaBuilder};
use crate::{Tool, ToolContext};

const BASE_SYSTEM_PROMPT: &str = "You are evaluating an engineering proposal. Judge it on \
technical merit, feasibility, and risk. Be specific about what would make it fail.";

const CONSULT_TEMPERATURE: f64 = 0.2;

/// One model to consult, with the stance it should argue from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub model: String,
    #[serde(default)]
    pub stance: Stance,
    /// Overrides the built-in stance wording when present.
    #[serde(default)]
    pub stance_prompt: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stance {
    For,
    Against,
    #[default]
    Neutral,
}

impl Stance {
    fn prompt(&self) -> &'static str {
        match self {
            Self::For => {
                "Argue the strongest good-faith case FOR this proposal, while flagging any \
                 genuinely disqualifying risk."
            }
            Self::Against => {
                "Argue the strongest good-faith case AGAINST this proposal, while conceding \
                 points that clearly work."
            }
            Self::Neutral => "Evaluate the proposal impartially.",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConsensusRequest {
    step: String,
    step_number: usize,
    total_steps: usize,
    next_step_required: bool,
    #[serde(default)]
    findings: String,
    #[serde(default)]
    models: Vec<ModelSpec>,
    #[serde(flatten)]
    common: CommonArgs,
}

/// Per-thread consensus progress, persisted in the workflow-state slot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConsensusState {
    proposal: String,
    models: Vec<ModelSpec>,
    responses: Vec<ConsultedVerdict>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConsultedVerdict {
    model: String,
    stance: Stance,
    /// Verdict text, or the error message when the consult failed.
    verdict: String,
    ok: bool,
}

pub struct ConsensusTool;

#[async_trait]
impl Tool for ConsensusTool {
    fn name(&self) -> &str {
        "consensus"
    }

    fn description(&self) -> &str {
        "Consult multiple models on a proposal, one per step and each from an assigned \
         stance, then hand all verdicts back for synthesis"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::ExtendedReasoning
    }

    fn input_schema(&self) -> serde_json::Value {
        let mut schema = SchemaBuilder::new()
            .string(
                "step",
                "Step 1: your own neutral analysis of the proposal. Later steps: your \
                 notes on the previous verdict",
                true,
            )
            .integer("step_number", "Current step index (step 1 consults the first model)", true)
            .integer(
                "total_steps",
                "Number of models to consult plus one synthesis step",
                true,
            )
            .boolean(
                "next_step_required",
                "False on the final synthesis step",
                true,
            )
            .string("findings", "Your accumulated observations", false)
            .with_common_fields()
            .build();
        schema["properties"]["models"] = json!({
            "type": "array",
            "description": "Models to consult with stances; required on step 1",
            "items": {
                "type": "object",
                "properties": {
                    "model": {"type": "string"},
                    "stance": {"type": "string", "enum": ["for", "against", "neutral"]},
                    "stance_prompt": {"type": "string"}
                },
                "required": ["model"]
            }
        });
        schema
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        args: serde_json::Value,
    ) -> Result<ToolOutput, Error> {
        let request: ConsensusRequest =
            serde_json::from_value(args).map_err(|e| SchemaError::Validation {
                field: "arguments".to_string(),
                reason: e.to_string(),
            })?;
        validate(&request)?;

        let step_turn = Turn::user(&request.step).with_tool(self.name());
        let thread_id = match request.common.continuation_id {
            Some(id) => {
                ctx.store.append_turn(&id, step_turn)?;
                id
            }
            None => ctx.store.create_thread(self.name(), step_turn, None),
        };

        let mut state: ConsensusState = ctx
            .store
            .workflow_state(&thread_id)?
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| Error::Internal(format!("corrupt consensus state: {e}")))?
            .unwrap_or_default();
        if request.step_number == 1 {
            state.proposal = request.step.clone();
            state.models = request.models.clone();
        }

        let output = if request.next_step_required && request.step_number < request.total_steps {
            // Consult the model assigned to this step.
            let spec = state
                .models
                .get(request.step_number - 1)
                .cloned()
                .ok_or_else(|| SchemaError::Validation {
                    field: "models".to_string(),
                    reason: format!("no model assigned to step {}", request.step_number),
                })?;
            let verdict = self.consult(ctx, &state.proposal, &spec).await;
            state.responses.push(verdict.clone());

            let summary = json!({
                "status": WorkflowStatus::PauseForInvestigation,
                "step_number": request.step_number,
                "total_steps": request.total_steps,
                "model_consulted": verdict.model.clone(),
                "stance": verdict.stance,
                "verdict": verdict.verdict.clone(),
                "next_step_number": request.step_number + 1,
                "continuation_id": thread_id,
            });
            ctx.store.append_turn(
                &thread_id,
                Turn::assistant(verdict.verdict.clone())
                    .with_tool(self.name())
                    .with_model(verdict.model.clone()),
            )?;
            ToolOutput::text(serde_json::to_string_pretty(&summary).map_err(|e| {
                Error::Internal(format!("consensus response serialization: {e}"))
            })?)
            .with_status(WorkflowStatus::PauseForInvestigation)
            .with_continuation(thread_id)
            .with_metadata("model_consulted", json!(verdict.model))
        } else {
            // Synthesis step: hand everything back to the host.
            let rendered = render_verdicts(&state);
            ctx.store.append_turn(
                &thread_id,
                Turn::assistant(rendered.clone()).with_tool(self.name()),
            )?;
            ToolOutput::text(rendered)
                .with_status(WorkflowStatus::Complete)
                .with_continuation(thread_id)
                .with_metadata("models_consulted", json!(state.responses.len()))
        };

        let value = serde_json::to_value(&state)
            .map_err(|e| Error::Internal(format!("consensus state serialization: {e}")))?;
        ctx.store.set_workflow_state(&thread_id, value)?;
        Ok(output)
    }
}

impl ConsensusTool {
    /// One model consultation. Failures become part of the record instead
    /// of aborting the run; the remaining models still get their say.
    async fn consult(&self, ctx: &ToolContext, proposal: &str, spec: &ModelSpec) -> ConsultedVerdict {
        debug!(model = %spec.model, stance = ?spec.stance, "consulting model for consensus");
        let stance_text = spec
            .stance_prompt
            .clone()
            .unwrap_or_else(|| spec.stance.prompt().to_string());
        let system_prompt = format!("{BASE_SYSTEM_PROMPT}\n\n{stance_text}");

        let result = match ctx.registry.get_provider_for_model(&spec.model) {
            Ok(provider) => {
                provider
                    .generate(GenerateRequest {
                        prompt: format!("Proposal under evaluation:\n\n{proposal}"),
                        model: spec.model.clone(),
                        system_prompt: Some(system_prompt),
                        temperature: Some(CONSULT_TEMPERATURE),
                        max_output_tokens: None,
                        thinking_mode: None,
                        images: Vec::new(),
                        json_mode: false,
                    })
                    .await
            }
            Err(err) => Err(err.into()),
        };

        match result {
            Ok(response) => ConsultedVerdict {
                model: response.model_name,
                stance: spec.stance,
                verdict: response.content,
                ok: true,
            },
            Err(err) => {
                warn!(model = %spec.model, error = %err, "consensus consultation failed");
                ConsultedVerdict {
                    model: spec.model.clone(),
                    stance: spec.stance,
                    verdict: format!("consultation failed: {err}"),
                    ok: false,
                }
            }
        }
    }
}

fn validate(request: &ConsensusRequest) -> Result<(), SchemaError> {
    if request.step_number == 0 || request.total_steps == 0 {
        return Err(SchemaError::Validation {
            field: "step_number".to_string(),
            reason: "steps are 1-based".to_string(),
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
    if request.step_number == 1 && request.models.is_empty() {
        return Err(SchemaError::Validation {
            field: "models".to_string(),
            reason: "step 1 must name the models to consult".to_string(),
        });
    }
    Ok(())
}

fn render_verdicts(state: &ConsensusState) -> String {
    let mut out = String::from("=== CONSENSUS ===\n");
    out.push_str(&format!("Proposal:\n{}\n", state.proposal));
    for verdict in &state.responses {
        out.push_str(&format!(
            "\n--- {} ({:?}{}) ---\n{}\n",
            verdict.model,
            verdict.stance,
            if verdict.ok { "" } else { ", failed" },
            verdict.verdict
        ));
    }
    out.push_str("\nSynthesize the verdicts above into a final recommendation.\n");
    out
}
