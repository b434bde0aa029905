use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use braid_events::BraidError;
use serde::{Deserialize, Serialize};

pub type ProviderFuture = Pin<Box<dyn Future<Output = Result<ProviderResponse, BraidError>> + Send>>;

/// One upstream model provider. The chain treats every raised failure
/// identically regardless of cause, except `InvalidRequest`, which a
/// provider raises to signal "do not retry".
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;
    fn invoke(&self, request: ProviderRequest) -> ProviderFuture;
}

pub type ProviderRef = Arc<dyn ModelProvider>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub prompt: String,
    #[serde(rename = "systemPrompt", skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl ProviderRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }
}

/// A completed model invocation. `chunks` preserve the provider's delta
/// segmentation so the orchestrator can emit one `Token` event per chunk;
/// their concatenation is the full response text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub chunks: Vec<String>,
    #[serde(rename = "inputTokens")]
    pub input_tokens: u64,
    #[serde(rename = "outputTokens")]
    pub output_tokens: u64,
    #[serde(rename = "estimatedCost")]
    pub estimated_cost: f64,
    pub provider: String,
    pub model: String,
}

impl ProviderResponse {
    pub fn text(&self) -> String {
        self.chunks.concat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_text_concatenates_chunks_in_order() {
        let response = ProviderResponse {
            chunks: vec!["hi".to_string(), " there".to_string()],
            input_tokens: 3,
            output_tokens: 2,
            estimated_cost: 0.0001,
            provider: "b".to_string(),
            model: "b-large".to_string(),
        };
        assert_eq!(response.text(), "hi there");
    }
}
