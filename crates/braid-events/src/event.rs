use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BraidErrorCode;

/// One frame-sized unit of the client-facing protocol. Immutable once
/// created; `sequence_id` is assigned by the stream manager at enqueue
/// time and doubles as the client's resumption token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "sequenceId")]
    pub sequence_id: u64,
    pub kind: EventKind,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

impl Event {
    /// Terminal events end a turn: `Done`, or an `Error` the client
    /// cannot recover from.
    pub fn is_terminal(&self) -> bool {
        match &self.kind {
            EventKind::Done { .. } => true,
            EventKind::Error { recoverable, .. } => !recoverable,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    Thinking,
    Idle,
    Delegating,
}

/// The closed set of event kinds. Every producer and consumer shares this
/// one definition; unknown kinds are rejected at decode time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    #[serde(rename = "token")]
    Token { text: String },
    #[serde(rename = "tool_call")]
    ToolCall {
        name: String,
        args: Value,
        #[serde(rename = "callId")]
        call_id: String,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        #[serde(rename = "callId")]
        call_id: String,
        output: String,
        #[serde(rename = "exitCode")]
        exit_code: i32,
    },
    #[serde(rename = "planning")]
    Planning { steps: Vec<String> },
    #[serde(rename = "step_complete")]
    StepComplete {
        index: usize,
        total: usize,
        description: String,
    },
    #[serde(rename = "status")]
    Status { state: StatusState },
    #[serde(rename = "usage")]
    Usage {
        #[serde(rename = "inputTokens")]
        input_tokens: u64,
        #[serde(rename = "outputTokens")]
        output_tokens: u64,
        #[serde(rename = "estimatedCost")]
        estimated_cost: f64,
        provider: String,
        model: String,
    },
    #[serde(rename = "error")]
    Error {
        message: String,
        code: BraidErrorCode,
        recoverable: bool,
    },
    #[serde(rename = "done")]
    Done {
        #[serde(rename = "finalPayload")]
        final_payload: String,
    },
}
