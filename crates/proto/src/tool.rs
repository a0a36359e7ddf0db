//! Tool descriptor and structured output types published over the transport.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::thread::ThreadId;

/// Descriptor advertised for one tool at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema for accepted tool arguments.
    pub input_schema: Value,
}

/// Progress state a workflow tool reports with its output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// The host must investigate and call back with the next step.
    PauseForInvestigation,
    /// Terminal step reached; the expert model is being consulted.
    ExpertAnalysisPending,
    /// The workflow finished.
    Complete,
}

/// One block of structured tool output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    FileReference { path: String },
}

/// Structured payload a tool returns to the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub blocks: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkflowStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_id: Option<ThreadId>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ToolOutput {
    /// Creates an output holding a single text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            blocks: vec![ContentBlock::Text { text: text.into() }],
            status: None,
            continuation_id: None,
            metadata: Map::new(),
        }
    }

    /// Attaches the continuation handle offered to the host.
    pub fn with_continuation(mut self, id: ThreadId) -> Self {
        self.continuation_id = Some(id);
        self
    }

    /// Attaches a workflow status.
    pub fn with_status(mut self, status: WorkflowStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Adds a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Appends a file-reference block for a generated artifact.
    pub fn push_file_reference(&mut self, path: impl Into<String>) {
        self.blocks.push(ContentBlock::FileReference {
            path: path.into(),
        });
    }

    /// Concatenated text of all text blocks, for logging and tests.
    pub fn joined_text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::FileReference { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
