//! Provider-side resilience: circuit breaking, ordered fallback, retry
//! with jittered backoff, and turn cancellation.

mod breaker;
mod cancel;
mod chain;
mod plan;
mod provider;
mod retry;

pub use breaker::{AttemptOutcome, BreakerConfig, CircuitBreaker, CircuitState, Permit};
pub use cancel::{AbortReason, TurnAbortController, TurnAbortSignal};
pub use chain::{ChainConfig, ExhaustedError, FallbackChain, ProviderAttemptError};
pub use plan::{FallbackPlan, ProviderDescriptor};
pub use provider::{ModelProvider, ProviderFuture, ProviderRef, ProviderRequest, ProviderResponse};
pub use retry::RetryPolicy;
