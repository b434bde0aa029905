use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::time::Duration;

use braid_events::{BraidError, BraidErrorCode};
use tracing::{debug, warn};

use crate::breaker::{AttemptOutcome, CircuitBreaker, Permit};
use crate::cancel::TurnAbortSignal;
use crate::plan::{FallbackPlan, ProviderDescriptor};
use crate::provider::{ProviderRef, ProviderRequest, ProviderResponse};
use crate::retry::{sleep_backoff, RetryPolicy};

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderAttemptError {
    pub provider: String,
    pub error: BraidError,
}

/// Every provider in the plan was skipped or exhausted. Carries the last
/// error observed per attempted provider so callers can log the whole
/// chain's failure story.
#[derive(Debug, Clone, PartialEq)]
pub struct ExhaustedError {
    pub attempts: Vec<ProviderAttemptError>,
    pub skipped: Vec<String>,
    pub cancelled: bool,
}

impl ExhaustedError {
    pub fn last_error(&self) -> Option<&BraidError> {
        self.attempts.last().map(|attempt| &attempt.error)
    }
}

impl Display for ExhaustedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.cancelled {
            return write!(f, "provider chain cancelled before completion");
        }
        write!(
            f,
            "all providers exhausted ({} attempted, {} skipped by circuit breaker)",
            self.attempts.len(),
            self.skipped.len()
        )
    }
}

impl std::error::Error for ExhaustedError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(130),
            retry: RetryPolicy::default(),
        }
    }
}

/// Ordered provider fallback. Iterates the plan in priority order,
/// consulting the circuit breaker before every provider and reporting
/// every attempt's outcome back to it exactly once.
pub struct FallbackChain {
    plan: FallbackPlan,
    providers: HashMap<String, ProviderRef>,
    breaker: CircuitBreaker,
    config: ChainConfig,
}

impl FallbackChain {
    pub fn new(
        plan: FallbackPlan,
        providers: Vec<ProviderRef>,
        breaker: CircuitBreaker,
        config: ChainConfig,
    ) -> Self {
        let providers = providers
            .into_iter()
            .map(|provider| (provider.name().to_string(), provider))
            .collect();
        Self {
            plan,
            providers,
            breaker,
            config,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn invoke(
        &self,
        request: ProviderRequest,
        signal: Option<&TurnAbortSignal>,
    ) -> Result<ProviderResponse, ExhaustedError> {
        let mut attempts: Vec<ProviderAttemptError> = Vec::new();
        let mut skipped: Vec<String> = Vec::new();

        for descriptor in self.plan.enabled() {
            if is_aborted(signal) {
                return Err(cancelled_error(attempts, skipped));
            }

            let permit = self.breaker.allow(&descriptor.name);
            if !permit.is_allowed() {
                debug!(provider = descriptor.name.as_str(), "circuit open, provider skipped");
                skipped.push(descriptor.name.clone());
                continue;
            }

            let Some(provider) = self.providers.get(&descriptor.name) else {
                warn!(
                    provider = descriptor.name.as_str(),
                    "provider in plan has no registered implementation"
                );
                // A probe permit must still be resolved or the slot leaks.
                if permit == Permit::Probe {
                    self.breaker
                        .report(&descriptor.name, permit, AttemptOutcome::Failure);
                }
                attempts.push(ProviderAttemptError {
                    provider: descriptor.name.clone(),
                    error: BraidError::new(
                        BraidErrorCode::ProviderProtocol,
                        format!("provider '{}' is not registered", descriptor.name),
                    ),
                });
                continue;
            };

            match self
                .try_provider(descriptor, provider, &request, permit, signal)
                .await
            {
                Ok(response) => return Ok(response),
                Err(error) => {
                    let was_cancelled = error.code == BraidErrorCode::Cancelled;
                    attempts.push(ProviderAttemptError {
                        provider: descriptor.name.clone(),
                        error,
                    });
                    if was_cancelled {
                        return Err(cancelled_error(attempts, skipped));
                    }
                }
            }
        }

        Err(ExhaustedError {
            attempts,
            skipped,
            cancelled: false,
        })
    }

    /// Runs one provider's retry budget. A half-open probe permit gets a
    /// single attempt; resolving it with a fresh permit is the breaker's
    /// job on the next pass.
    async fn try_provider(
        &self,
        descriptor: &ProviderDescriptor,
        provider: &ProviderRef,
        request: &ProviderRequest,
        permit: Permit,
        signal: Option<&TurnAbortSignal>,
    ) -> Result<ProviderResponse, BraidError> {
        let max_attempts = if permit == Permit::Probe {
            1
        } else {
            descriptor.max_retries.max(1)
        };

        let mut last_error = BraidError::new(
            BraidErrorCode::ProviderProtocol,
            format!("provider '{}' was never attempted", descriptor.name),
        );

        for attempt in 0..max_attempts {
            if attempt > 0 {
                if wait_backoff_or_abort(&self.config.retry, attempt - 1, signal).await {
                    return Err(turn_cancelled_error());
                }
            }
            if is_aborted(signal) {
                return Err(turn_cancelled_error());
            }

            match self.attempt_once(provider, request.clone(), signal).await {
                Ok(response) => {
                    self.breaker
                        .report(&descriptor.name, permit, AttemptOutcome::Success);
                    debug!(
                        provider = descriptor.name.as_str(),
                        attempt = attempt + 1,
                        "provider call succeeded"
                    );
                    return Ok(response);
                }
                Err(error) => {
                    // A cancelled in-flight attempt still resolves the
                    // permit; counting it as a failure is the
                    // conservative reading.
                    self.breaker
                        .report(&descriptor.name, permit, AttemptOutcome::Failure);
                    warn!(
                        provider = descriptor.name.as_str(),
                        attempt = attempt + 1,
                        max_attempts,
                        error_code = ?error.code,
                        error = error.message.as_str(),
                        "provider attempt failed"
                    );
                    let retryable = error.retryable();
                    last_error = error;
                    if !retryable {
                        break;
                    }
                }
            }
        }

        Err(last_error)
    }

    async fn attempt_once(
        &self,
        provider: &ProviderRef,
        request: ProviderRequest,
        signal: Option<&TurnAbortSignal>,
    ) -> Result<ProviderResponse, BraidError> {
        let call = tokio::time::timeout(self.config.call_timeout, provider.invoke(request));
        let outcome = if let Some(signal_ref) = signal {
            tokio::select! {
                _ = signal_ref.cancelled() => return Err(turn_cancelled_error()),
                outcome = call => outcome,
            }
        } else {
            call.await
        };

        match outcome {
            Ok(result) => result,
            Err(_) => Err(BraidError::new(
                BraidErrorCode::ProviderTimeout,
                format!(
                    "provider call exceeded {}ms",
                    self.config.call_timeout.as_millis()
                ),
            )),
        }
    }
}

async fn wait_backoff_or_abort(
    policy: &RetryPolicy,
    attempt: u32,
    signal: Option<&TurnAbortSignal>,
) -> bool {
    if let Some(signal_ref) = signal {
        tokio::select! {
            _ = signal_ref.cancelled() => true,
            _ = sleep_backoff(policy, attempt) => false,
        }
    } else {
        sleep_backoff(policy, attempt).await;
        false
    }
}

fn is_aborted(signal: Option<&TurnAbortSignal>) -> bool {
    signal.map(|signal| signal.is_aborted()).unwrap_or(false)
}

fn turn_cancelled_error() -> BraidError {
    BraidError::new(BraidErrorCode::Cancelled, "turn cancelled")
}

fn cancelled_error(attempts: Vec<ProviderAttemptError>, skipped: Vec<String>) -> ExhaustedError {
    ExhaustedError {
        attempts,
        skipped,
        cancelled: true,
    }
}
