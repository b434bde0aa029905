use std::sync::Arc;

use async_trait::async_trait;
use braid_events::BraidError;
use braid_providers::ProviderRequest;
use serde_json::Value;

/// The next semantic step the engine wants the orchestrator to take.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction {
    Plan {
        steps: Vec<String>,
    },
    CompleteStep {
        index: usize,
        total: usize,
        description: String,
    },
    InvokeModel {
        request: ProviderRequest,
    },
    InvokeTool {
        name: String,
        args: Value,
    },
    Finish,
}

/// The reasoning engine collaborator. The core makes no assumption about
/// how the engine decides its deltas; it only requires that the engine
/// observes each step's result (via the updated `TurnRecord`) before
/// deciding the next one.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    async fn next_action(&self, turn: &TurnRecord) -> Result<EngineAction, BraidError>;
}

pub type ReasoningEngineRef = Arc<dyn ReasoningEngine>;

#[derive(Debug, Clone, PartialEq)]
pub enum TurnStep {
    Plan {
        steps: Vec<String>,
    },
    ModelOutput {
        provider: String,
        model: String,
        text: String,
    },
    ToolOutput {
        call_id: String,
        name: String,
        output: String,
        exit_code: i32,
    },
}

/// Accumulated state of one logical turn, visible to the engine between
/// steps. `emitted_text` is everything delivered via `Token` events so
/// far; `Done.final_payload` is always exactly this text.
#[derive(Debug, Clone, Default)]
pub struct TurnRecord {
    pub prompt: String,
    pub steps: Vec<TurnStep>,
    emitted_text: String,
}

impl TurnRecord {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            steps: Vec::new(),
            emitted_text: String::new(),
        }
    }

    pub fn emitted_text(&self) -> &str {
        &self.emitted_text
    }

    pub(crate) fn append_emitted_text(&mut self, text: &str) {
        self.emitted_text.push_str(text);
    }

    pub fn last_step(&self) -> Option<&TurnStep> {
        self.steps.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emitted_text_accumulates_in_order() {
        let mut record = TurnRecord::new("hello");
        record.append_emitted_text("hi");
        record.append_emitted_text(" there");
        assert_eq!(record.emitted_text(), "hi there");
    }
}
