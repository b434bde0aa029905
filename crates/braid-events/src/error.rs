use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BraidErrorCode {
    ProviderTimeout,
    ProviderRateLimited,
    ProviderHttp,
    ProviderProtocol,
    ProviderExhausted,
    InvalidRequest,
    ToolExecutionFailed,
    Cancelled,
    GapDetected,
}

impl BraidErrorCode {
    /// Whether the caller may retry the operation that produced this error.
    /// `InvalidRequest` is the provider's "do not retry" signal.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            BraidErrorCode::ProviderTimeout
                | BraidErrorCode::ProviderRateLimited
                | BraidErrorCode::ProviderHttp
                | BraidErrorCode::ProviderProtocol
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BraidError {
    pub code: BraidErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl BraidError {
    pub fn new(code: BraidErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn retryable(&self) -> bool {
        self.code.retryable()
    }

    pub fn as_compact_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"code\":\"provider_protocol\",\"message\":\"{}\"}}",
                self.message.replace('\"', "\\\"")
            )
        })
    }
}

impl Display for BraidError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for BraidError {}
