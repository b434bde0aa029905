use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use braid_events::BraidError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub output: String,
    pub exit_code: i32,
}

/// The sandboxed command-execution collaborator. Opaque to this core
/// beyond wrapping its results as `ToolResult` events.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn execute(&self, command: &str, timeout: Duration) -> Result<ExecutionResult, BraidError>;
    async fn read_file(&self, path: &str) -> Result<String, BraidError>;
    async fn write_file(&self, path: &str, contents: &str) -> Result<(), BraidError>;
}

pub type ExecutionBackendRef = Arc<dyn ExecutionBackend>;
