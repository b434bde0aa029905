//! Turn orchestration: drives the reasoning engine, routes model calls
//! through the provider fallback chain, and feeds the resulting typed
//! events into the stream manager.

mod backend;
mod config;
mod engine;
mod orchestrator;
mod telemetry;

pub use backend::{ExecutionBackend, ExecutionBackendRef, ExecutionResult};
pub use config::{load_core_config, parse_core_config, ConfigError, CoreConfig};
pub use engine::{EngineAction, ReasoningEngine, ReasoningEngineRef, TurnRecord, TurnStep};
pub use orchestrator::{OrchestratorConfig, TurnHandle, TurnOrchestrator, TurnRequest};
pub use telemetry::init_tracing;
