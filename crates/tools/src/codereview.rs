//! Code-review workflow tool.

use crate::workflow::{Confidence, ConsolidatedFindings, WorkflowTool};

const SYSTEM_PROMPT: &str = "You are an expert code reviewer. You receive the consolidated \
notes of a structured review pass: files examined, issues with severities, and the \
reviewer's assessment. Produce the final review: confirm or reject each issue, add any the \
reviewer missed in the cited code, and order everything by severity with concrete fixes. \
Do not pad; absence of findings is a valid outcome.";

pub struct CodeReviewTool;

impl WorkflowTool for CodeReviewTool {
    fn name(&self) -> &str {
        "codereview"
    }

    fn description(&self) -> &str {
        "Structured multi-pass code review with severity-ranked findings and an expert \
         final verdict"
    }

    fn system_prompt(&self) -> &str {
        SYSTEM_PROMPT
    }

    fn default_temperature(&self) -> f64 {
        0.1
    }

    fn required_actions(
        &self,
        step_number: usize,
        _confidence: Confidence,
        total_steps: usize,
    ) -> Vec<String> {
        if step_number == 1 {
            vec![
                "Read every file under review end to end; list them in files_checked".to_string(),
                "Note the change's intent and the conventions of the surrounding code".to_string(),
            ]
        } else if step_number < total_steps {
            vec![
                "Examine correctness: error paths, boundaries, concurrency, resource use"
                    .to_string(),
                "Record each issue in issues_found with a severity and file location".to_string(),
            ]
        } else {
            vec![
                "Re-check every flagged issue against the actual code before reporting"
                    .to_string(),
            ]
        }
    }

    fn expert_context(&self, findings: &ConsolidatedFindings) -> String {
        format!(
            "{}\nProduce the final severity-ordered review.",
            findings.render()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_requires_full_read() {
        let actions = CodeReviewTool.required_actions(1, Confidence::Exploring, 3);
        assert!(actions[0].contains("end to end"));
    }

    #[test]
    fn review_always_consults_expert() {
        let mut findings = ConsolidatedFindings::default();
        findings.confidence = Confidence::Certain;
        assert!(CodeReviewTool.should_call_expert_analysis(&findings));
    }

    #[test]
    fn expert_context_appends_review_instruction() {
        let findings = ConsolidatedFindings::default();
        assert!(
            CodeReviewTool
                .expert_context(&findings)
                .contains("severity-ordered review")
        );
    }
}
