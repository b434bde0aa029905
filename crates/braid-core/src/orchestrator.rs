use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use braid_events::{BraidError, BraidErrorCode, EventKind, StatusState};
use braid_providers::{
    AbortReason, ExhaustedError, FallbackChain, ProviderRequest, ProviderResponse,
    TurnAbortController, TurnAbortSignal,
};
use braid_stream::StreamManager;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::ExecutionBackendRef;
use crate::engine::{EngineAction, ReasoningEngineRef, TurnRecord, TurnStep};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub tool_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tool_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnRequest {
    pub session_id: String,
    pub prompt: String,
    pub system_prompt: Option<String>,
}

/// Control handle for one running turn: abort it, or await completion.
pub struct TurnHandle {
    controller: TurnAbortController,
    task: JoinHandle<()>,
}

impl TurnHandle {
    pub fn abort(&self) {
        self.controller.abort();
    }

    pub fn signal(&self) -> TurnAbortSignal {
        self.controller.signal()
    }

    /// Arms a deadline: if the turn is still running when it elapses, the
    /// turn ends with a cancelled terminal event.
    pub fn deadline(&self, after: Duration) {
        self.controller.deadline(after);
    }

    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Drives one logical turn per `start` call: Planning → Acting →
/// (Invoking…)* → Completing → Terminal. Every path ends in exactly one
/// terminal event (`Done` or a non-recoverable `Error`).
pub struct TurnOrchestrator {
    engine: ReasoningEngineRef,
    backend: ExecutionBackendRef,
    chain: Arc<FallbackChain>,
    stream: Arc<StreamManager>,
    config: OrchestratorConfig,
}

impl TurnOrchestrator {
    pub fn new(
        engine: ReasoningEngineRef,
        backend: ExecutionBackendRef,
        chain: Arc<FallbackChain>,
        stream: Arc<StreamManager>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            engine,
            backend,
            chain,
            stream,
            config,
        }
    }

    /// Opens a logical turn and runs it on its own task. The session's
    /// buffer is opened (idempotently) before the first event so nothing
    /// is lost if no client has attached yet.
    pub fn start(&self, request: TurnRequest) -> TurnHandle {
        self.stream.open_session(&request.session_id);
        let controller = TurnAbortController::new();
        let runner = TurnRunner {
            engine: self.engine.clone(),
            backend: self.backend.clone(),
            chain: self.chain.clone(),
            stream: self.stream.clone(),
            signal: controller.signal(),
            session_id: request.session_id.clone(),
            record: TurnRecord::new(request.prompt),
            system_prompt: request.system_prompt,
            tool_timeout: self.config.tool_timeout,
            next_call_id: 1,
            next_unit_id: 1,
            emitted_units: HashSet::new(),
            terminal_pushed: false,
        };
        let task = tokio::spawn(runner.run());
        TurnHandle { controller, task }
    }
}

enum StepFlow {
    Continue,
    Terminal,
}

struct TurnRunner {
    engine: ReasoningEngineRef,
    backend: ExecutionBackendRef,
    chain: Arc<FallbackChain>,
    stream: Arc<StreamManager>,
    signal: TurnAbortSignal,
    session_id: String,
    record: TurnRecord,
    system_prompt: Option<String>,
    tool_timeout: Duration,
    next_call_id: u64,
    next_unit_id: u64,
    emitted_units: HashSet<u64>,
    terminal_pushed: bool,
}

impl TurnRunner {
    async fn run(mut self) {
        self.push(EventKind::Status {
            state: StatusState::Thinking,
        });

        loop {
            if self.signal.is_aborted() {
                self.terminate_cancelled();
                return;
            }

            let action = tokio::select! {
                _ = self.signal.cancelled() => {
                    self.terminate_cancelled();
                    return;
                }
                action = self.engine.next_action(&self.record) => action,
            };

            let flow = match action {
                Ok(EngineAction::Plan { steps }) => {
                    self.push(EventKind::Planning {
                        steps: steps.clone(),
                    });
                    self.record.steps.push(TurnStep::Plan { steps });
                    StepFlow::Continue
                }
                Ok(EngineAction::CompleteStep {
                    index,
                    total,
                    description,
                }) => {
                    self.push(EventKind::StepComplete {
                        index,
                        total,
                        description,
                    });
                    StepFlow::Continue
                }
                Ok(EngineAction::InvokeModel { request }) => self.invoke_model(request).await,
                Ok(EngineAction::InvokeTool { name, args }) => self.invoke_tool(name, args).await,
                Ok(EngineAction::Finish) => {
                    self.terminate_done();
                    return;
                }
                Err(error) => {
                    warn!(
                        session_id = self.session_id.as_str(),
                        error = error.message.as_str(),
                        "reasoning engine failed"
                    );
                    self.terminate_error(error);
                    return;
                }
            };

            if matches!(flow, StepFlow::Terminal) {
                return;
            }
        }
    }

    /// Invoking: one model call routed through the fallback chain. The
    /// per-unit emission ledger guarantees that this invocation's content
    /// reaches the stream at most once, whichever path delivers it.
    async fn invoke_model(&mut self, mut request: ProviderRequest) -> StepFlow {
        if request.system_prompt.is_none() {
            request.system_prompt = self.system_prompt.clone();
        }
        let unit_id = self.next_unit_id;
        self.next_unit_id += 1;

        match self.chain.invoke(request, Some(&self.signal)).await {
            Ok(response) => {
                self.emit_model_output(unit_id, &response);
                StepFlow::Continue
            }
            Err(exhausted) if exhausted.cancelled => {
                self.terminate_cancelled();
                StepFlow::Terminal
            }
            Err(exhausted) => {
                self.terminate_exhausted(exhausted);
                StepFlow::Terminal
            }
        }
    }

    fn emit_model_output(&mut self, unit_id: u64, response: &ProviderResponse) {
        if !self.emitted_units.insert(unit_id) {
            // Content for this unit already reached the stream.
            debug!(
                session_id = self.session_id.as_str(),
                unit_id, "duplicate emission suppressed"
            );
            return;
        }

        for chunk in &response.chunks {
            self.push(EventKind::Token {
                text: chunk.clone(),
            });
            self.record.append_emitted_text(chunk);
        }
        self.push(EventKind::Usage {
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            estimated_cost: response.estimated_cost,
            provider: response.provider.clone(),
            model: response.model.clone(),
        });
        self.record.steps.push(TurnStep::ModelOutput {
            provider: response.provider.clone(),
            model: response.model.clone(),
            text: response.text(),
        });
    }

    /// Acting: tool execution delegated to the backend. Dispatch and
    /// completion are two distinct events; failures surface as a non-zero
    /// exit code, never as a stream error.
    async fn invoke_tool(&mut self, name: String, args: Value) -> StepFlow {
        let call_id = format!("call-{}", self.next_call_id);
        self.next_call_id += 1;

        self.push(EventKind::ToolCall {
            name: name.clone(),
            args: args.clone(),
            call_id: call_id.clone(),
        });
        self.push(EventKind::Status {
            state: StatusState::Delegating,
        });

        let execution = tokio::select! {
            _ = self.signal.cancelled() => {
                self.terminate_cancelled();
                return StepFlow::Terminal;
            }
            result = self.dispatch_tool(&name, &args) => result,
        };

        let result = match execution {
            Ok(result) => result,
            Err(error) => crate::backend::ExecutionResult {
                output: error.message,
                exit_code: 1,
            },
        };

        self.push(EventKind::ToolResult {
            call_id: call_id.clone(),
            output: result.output.clone(),
            exit_code: result.exit_code,
        });
        self.push(EventKind::Status {
            state: StatusState::Thinking,
        });
        self.record.steps.push(TurnStep::ToolOutput {
            call_id,
            name,
            output: result.output,
            exit_code: result.exit_code,
        });
        StepFlow::Continue
    }

    async fn dispatch_tool(
        &self,
        name: &str,
        args: &Value,
    ) -> Result<crate::backend::ExecutionResult, BraidError> {
        match name {
            "read_file" => {
                let path = required_string_arg(args, "path")?;
                let output = self.backend.read_file(&path).await?;
                Ok(crate::backend::ExecutionResult {
                    output,
                    exit_code: 0,
                })
            }
            "write_file" => {
                let path = required_string_arg(args, "path")?;
                let contents = required_string_arg(args, "contents")?;
                self.backend.write_file(&path, &contents).await?;
                Ok(crate::backend::ExecutionResult {
                    output: String::new(),
                    exit_code: 0,
                })
            }
            _ => {
                let command = required_string_arg(args, "command")?;
                self.backend.execute(&command, self.tool_timeout).await
            }
        }
    }

    fn terminate_done(&mut self) {
        let final_payload = self.record.emitted_text().to_string();
        self.push_terminal(EventKind::Done { final_payload });
    }

    fn terminate_cancelled(&mut self) {
        let message = match self.signal.reason() {
            Some(AbortReason::DeadlineExceeded) => "turn deadline exceeded",
            _ => "turn cancelled",
        };
        self.push_terminal(EventKind::Error {
            message: message.to_string(),
            code: BraidErrorCode::Cancelled,
            recoverable: false,
        });
    }

    fn terminate_exhausted(&mut self, exhausted: ExhaustedError) {
        warn!(
            session_id = self.session_id.as_str(),
            attempted = exhausted.attempts.len(),
            skipped = exhausted.skipped.len(),
            "all providers exhausted"
        );
        let detail = exhausted
            .last_error()
            .map(|error| error.message.clone())
            .unwrap_or_else(|| "no provider could be attempted".to_string());
        self.push_terminal(EventKind::Error {
            message: format!("{exhausted}: {detail}"),
            code: BraidErrorCode::ProviderExhausted,
            recoverable: false,
        });
    }

    fn terminate_error(&mut self, error: BraidError) {
        self.push_terminal(EventKind::Error {
            message: error.message,
            code: error.code,
            recoverable: false,
        });
    }

    fn push(&mut self, kind: EventKind) {
        if let Err(error) = self.stream.push(&self.session_id, kind) {
            warn!(
                session_id = self.session_id.as_str(),
                error = %error,
                "event dropped, session gone"
            );
        }
    }

    /// A second terminal event on the same turn is a protocol defect.
    fn push_terminal(&mut self, kind: EventKind) {
        debug_assert!(
            !self.terminal_pushed,
            "turn attempted to emit a second terminal event"
        );
        if self.terminal_pushed {
            return;
        }
        self.terminal_pushed = true;
        self.push(kind);
    }
}

fn required_string_arg(args: &Value, key: &str) -> Result<String, BraidError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            BraidError::new(
                BraidErrorCode::ToolExecutionFailed,
                format!("tool arguments missing string field '{key}'"),
            )
        })
}
