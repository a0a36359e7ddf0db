//! Extended-reasoning workflow tool.

use proto::ThinkingMode;

use crate::ToolDefaults;
use crate::workflow::{Confidence, ConsolidatedFindings, WorkflowTool};

const SYSTEM_PROMPT: &str = "You are a senior engineering thought partner. You receive an \
investigation log on a hard design or analysis question. Challenge its assumptions, find \
the alternatives it ignored, and deliver a reasoned recommendation with its tradeoffs made \
explicit.";

pub struct ThinkDeepTool;

impl WorkflowTool for ThinkDeepTool {
    fn name(&self) -> &str {
        "thinkdeep"
    }

    fn description(&self) -> &str {
        "Multi-step deep reasoning about a hard problem, concluded by an expert model \
         challenging the analysis"
    }

    fn system_prompt(&self) -> &str {
        SYSTEM_PROMPT
    }

    /// `DEFAULT_THINKING_MODE_THINKDEEP` applies when the host passed none.
    fn default_thinking_mode(&self, defaults: &ToolDefaults) -> Option<ThinkingMode> {
        Some(defaults.thinkdeep_thinking_mode)
    }

    fn required_actions(
        &self,
        step_number: usize,
        confidence: Confidence,
        _total_steps: usize,
    ) -> Vec<String> {
        if step_number == 1 {
            vec![
                "State the question precisely and list the constraints that matter".to_string(),
                "Gather the evidence the answer depends on".to_string(),
            ]
        } else if confidence < Confidence::High {
            vec![
                "Develop at least one alternative to the current line of reasoning".to_string(),
                "Stress-test the leading option against edge cases".to_string(),
            ]
        } else {
            vec!["Write down the recommendation and what would falsify it".to_string()]
        }
    }
}
