//! Root-cause debugging workflow tool.

use crate::ToolDefaults;
use crate::workflow::{Confidence, ConsolidatedFindings, WorkflowTool};
use proto::ThinkingMode;

const SYSTEM_PROMPT: &str = "You are an expert debugger. You receive an investigation log \
from another agent: step-by-step findings, files examined, and a working hypothesis. \
Identify the most likely root cause, explain the mechanism that produces the observed \
symptoms, and propose the minimal fix. If the evidence is inconclusive, name the single \
most informative next experiment.";

pub struct DebugTool;

impl WorkflowTool for DebugTool {
    fn name(&self) -> &str {
        "debug"
    }

    fn description(&self) -> &str {
        "Systematic root-cause analysis: investigate step by step, then hand the \
         consolidated evidence to an expert model for a verdict"
    }

    fn system_prompt(&self) -> &str {
        SYSTEM_PROMPT
    }

    fn default_thinking_mode(&self, _defaults: &ToolDefaults) -> Option<ThinkingMode> {
        Some(ThinkingMode::High)
    }

    fn required_actions(
        &self,
        step_number: usize,
        confidence: Confidence,
        _total_steps: usize,
    ) -> Vec<String> {
        if step_number == 1 {
            return vec![
                "Reproduce the issue and capture the exact error output".to_string(),
                "Locate the code paths involved and list them in files_checked".to_string(),
            ];
        }
        if confidence < Confidence::High {
            vec![
                "Trace the failing data flow; record each file you rule out".to_string(),
                "Form or refine a hypothesis and test it against the evidence".to_string(),
            ]
        } else {
            vec![
                "Verify the hypothesis explains every observed symptom".to_string(),
                "Identify the minimal change that fixes the root cause".to_string(),
            ]
        }
    }

    /// Skip the expert when the host is already certain of the root cause.
    fn should_call_expert_analysis(&self, findings: &ConsolidatedFindings) -> bool {
        findings.confidence < Confidence::Certain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn early_steps_ask_for_reproduction() {
        let actions = DebugTool.required_actions(1, Confidence::Exploring, 3);
        assert!(actions[0].contains("Reproduce"));
    }

    #[test]
    fn later_steps_shift_with_confidence() {
        let low = DebugTool.required_actions(2, Confidence::Low, 3);
        assert!(low.iter().any(|a| a.contains("hypothesis")));

        let high = DebugTool.required_actions(3, Confidence::High, 3);
        assert!(high.iter().any(|a| a.contains("minimal change")));
    }

    #[test]
    fn certain_confidence_skips_the_expert() {
        let mut findings = ConsolidatedFindings::default();
        findings.confidence = Confidence::Certain;
        assert!(!DebugTool.should_call_expert_analysis(&findings));

        findings.confidence = Confidence::AlmostCertain;
        assert!(DebugTool.should_call_expert_analysis(&findings));
    }
}
