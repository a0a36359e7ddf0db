//! Interactive planning workflow tool. Plans are built by the host step by
//! step; no expert model is consulted.

use proto::ToolCategory;

use crate::workflow::{Confidence, ConsolidatedFindings, WorkflowTool};

const SYSTEM_PROMPT: &str = "You help break complex work into ordered, verifiable steps.";

pub struct PlannerTool;

impl WorkflowTool for PlannerTool {
    fn name(&self) -> &str {
        "planner"
    }

    fn description(&self) -> &str {
        "Sequential planning: build a plan step by step, revising and branching as \
         understanding deepens"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Balanced
    }

    fn system_prompt(&self) -> &str {
        SYSTEM_PROMPT
    }

    fn required_actions(
        &self,
        step_number: usize,
        _confidence: Confidence,
        total_steps: usize,
    ) -> Vec<String> {
        if step_number == 1 {
            vec![
                "State the goal and the constraints that bound the plan".to_string(),
                "Sketch the major phases before detailing any one of them".to_string(),
            ]
        } else if step_number < total_steps {
            vec![
                "Detail the next phase; revise earlier steps if this step invalidated them"
                    .to_string(),
            ]
        } else {
            vec!["Review the full plan for ordering problems and missing dependencies".to_string()]
        }
    }

    /// Plans are synthesized by the host, never by an expert call.
    fn should_call_expert_analysis(&self, _findings: &ConsolidatedFindings) -> bool {
        false
    }
}
