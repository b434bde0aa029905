use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    /// Circuit is closed; call freely.
    Granted,
    /// Circuit is half-open and this caller won the single probe slot.
    /// The permit must be resolved by exactly one `report`.
    Probe,
    Rejected,
}

impl Permit {
    pub fn is_allowed(self) -> bool {
        !matches!(self, Permit::Rejected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    /// A consecutive-failure streak older than this restarts the count.
    pub failure_window: Duration,
    pub cooldown: Duration,
    pub cooldown_multiplier: u32,
    pub max_cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
            cooldown_multiplier: 2,
            max_cooldown: Duration::from_secs(300),
        }
    }
}

struct HealthState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    current_cooldown: Duration,
}

/// Per-provider health record, shared across every in-flight turn. The
/// mutex guards only state transitions; it is never held across I/O. The
/// half-open single-probe invariant rides on a compare-and-swap of
/// `probe_in_flight`.
struct ProviderHealth {
    state: Mutex<HealthState>,
    probe_in_flight: AtomicBool,
}

impl ProviderHealth {
    fn new(config: &BreakerConfig) -> Self {
        Self {
            state: Mutex::new(HealthState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
                opened_at: None,
                current_cooldown: config.cooldown,
            }),
            probe_in_flight: AtomicBool::new(false),
        }
    }
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    table: Mutex<HashMap<String, Arc<ProviderHealth>>>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            table: Mutex::new(HashMap::new()),
        }
    }

    fn health(&self, provider: &str) -> Arc<ProviderHealth> {
        let mut table = self.table.lock().expect("breaker table mutex poisoned");
        table
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(ProviderHealth::new(&self.config)))
            .clone()
    }

    /// Never blocks beyond the narrow state mutex.
    pub fn allow(&self, provider: &str) -> Permit {
        let health = self.health(provider);
        let state = {
            let mut guard = health.state.lock().expect("provider health mutex poisoned");
            if guard.state == CircuitState::Open {
                let elapsed = guard.opened_at.map(|at| at.elapsed()).unwrap_or_default();
                if elapsed >= guard.current_cooldown {
                    guard.state = CircuitState::HalfOpen;
                    debug!(provider, "circuit cooldown elapsed, entering half-open");
                }
            }
            guard.state
        };

        match state {
            CircuitState::Closed => Permit::Granted,
            CircuitState::Open => Permit::Rejected,
            CircuitState::HalfOpen => {
                // Exactly one caller wins the probe slot.
                if health
                    .probe_in_flight
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    Permit::Probe
                } else {
                    Permit::Rejected
                }
            }
        }
    }

    /// `permit` is the one the attempt was made under: only a `Probe`
    /// report may transition a half-open circuit, so calls that got a
    /// `Granted` permit before the circuit opened cannot steal the
    /// probe's resolution when they resolve late.
    pub fn report(&self, provider: &str, permit: Permit, outcome: AttemptOutcome) {
        let health = self.health(provider);
        {
            let mut guard = health.state.lock().expect("provider health mutex poisoned");
            match (guard.state, permit) {
                (CircuitState::HalfOpen, Permit::Probe) => match outcome {
                    AttemptOutcome::Success => {
                        guard.state = CircuitState::Closed;
                        guard.consecutive_failures = 0;
                        guard.opened_at = None;
                        guard.current_cooldown = self.config.cooldown;
                        debug!(provider, "probe succeeded, circuit closed");
                    }
                    AttemptOutcome::Failure => {
                        guard.state = CircuitState::Open;
                        guard.opened_at = Some(Instant::now());
                        guard.current_cooldown = next_cooldown(&self.config, guard.current_cooldown);
                        warn!(
                            provider,
                            cooldown_ms = guard.current_cooldown.as_millis() as u64,
                            "probe failed, circuit re-opened"
                        );
                    }
                },
                (CircuitState::Closed, _) => match outcome {
                    AttemptOutcome::Success => {
                        guard.consecutive_failures = 0;
                        guard.last_failure_at = None;
                    }
                    AttemptOutcome::Failure => {
                        let now = Instant::now();
                        let streak_expired = guard
                            .last_failure_at
                            .map(|at| now.duration_since(at) > self.config.failure_window)
                            .unwrap_or(false);
                        if streak_expired {
                            guard.consecutive_failures = 0;
                        }
                        guard.consecutive_failures = guard.consecutive_failures.saturating_add(1);
                        guard.last_failure_at = Some(now);
                        if guard.consecutive_failures >= self.config.failure_threshold {
                            guard.state = CircuitState::Open;
                            guard.opened_at = Some(now);
                            guard.current_cooldown = self.config.cooldown;
                            warn!(
                                provider,
                                failures = guard.consecutive_failures,
                                "failure threshold reached, circuit opened"
                            );
                        }
                    }
                },
                // Reports from calls that were already in flight when the
                // circuit opened. Counted, no transition.
                (CircuitState::HalfOpen, _) | (CircuitState::Open, _) => {
                    if outcome == AttemptOutcome::Failure {
                        guard.consecutive_failures = guard.consecutive_failures.saturating_add(1);
                        guard.last_failure_at = Some(Instant::now());
                    }
                }
            }
        }
        if permit == Permit::Probe {
            health.probe_in_flight.store(false, Ordering::SeqCst);
        }
    }

    pub fn state(&self, provider: &str) -> CircuitState {
        let health = self.health(provider);
        let guard = health.state.lock().expect("provider health mutex poisoned");
        guard.state
    }
}

fn next_cooldown(config: &BreakerConfig, current: Duration) -> Duration {
    current
        .saturating_mul(config.cooldown_multiplier.max(1))
        .min(config.max_cooldown)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_millis(20),
            cooldown_multiplier: 2,
            max_cooldown: Duration::from_millis(80),
        }
    }

    fn trip(breaker: &CircuitBreaker, provider: &str, failures: u32) {
        for _ in 0..failures {
            breaker.report(provider, Permit::Granted, AttemptOutcome::Failure);
        }
    }

    #[test]
    fn opens_after_failure_threshold_and_rejects() {
        let breaker = CircuitBreaker::new(fast_config());
        assert_eq!(breaker.allow("a"), Permit::Granted);
        trip(&breaker, "a", 3);
        assert_eq!(breaker.state("a"), CircuitState::Open);
        assert_eq!(breaker.allow("a"), Permit::Rejected);
    }

    #[test]
    fn success_resets_the_failure_streak() {
        let breaker = CircuitBreaker::new(fast_config());
        trip(&breaker, "a", 2);
        breaker.report("a", Permit::Granted, AttemptOutcome::Success);
        trip(&breaker, "a", 2);
        assert_eq!(breaker.state("a"), CircuitState::Closed);
    }

    #[test]
    fn single_probe_after_cooldown_and_concurrent_callers_rejected() {
        let breaker = CircuitBreaker::new(fast_config());
        trip(&breaker, "a", 3);
        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(breaker.allow("a"), Permit::Probe);
        assert_eq!(breaker.allow("a"), Permit::Rejected);
        assert_eq!(breaker.allow("a"), Permit::Rejected);
    }

    #[test]
    fn probe_success_closes_the_circuit() {
        let breaker = CircuitBreaker::new(fast_config());
        trip(&breaker, "a", 3);
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(breaker.allow("a"), Permit::Probe);
        breaker.report("a", Permit::Probe, AttemptOutcome::Success);

        assert_eq!(breaker.state("a"), CircuitState::Closed);
        assert_eq!(breaker.allow("a"), Permit::Granted);
    }

    #[test]
    fn probe_failure_reopens_with_doubled_cooldown() {
        let breaker = CircuitBreaker::new(fast_config());
        trip(&breaker, "a", 3);
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(breaker.allow("a"), Permit::Probe);
        breaker.report("a", Permit::Probe, AttemptOutcome::Failure);
        assert_eq!(breaker.state("a"), CircuitState::Open);

        // First cooldown was 20ms; the re-open doubles it to 40ms, so a
        // 25ms wait is not enough for a new probe.
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(breaker.allow("a"), Permit::Rejected);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(breaker.allow("a"), Permit::Probe);
        // Resolve the probe so the slot is released.
        breaker.report("a", Permit::Probe, AttemptOutcome::Success);
    }

    #[test]
    fn stale_granted_report_cannot_resolve_the_probe() {
        let breaker = CircuitBreaker::new(fast_config());
        trip(&breaker, "a", 3);
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(breaker.allow("a"), Permit::Probe);

        // A call admitted before the circuit opened resolves late.
        breaker.report("a", Permit::Granted, AttemptOutcome::Failure);
        assert_eq!(breaker.state("a"), CircuitState::HalfOpen);
        assert_eq!(breaker.allow("a"), Permit::Rejected);

        breaker.report("a", Permit::Probe, AttemptOutcome::Success);
        assert_eq!(breaker.state("a"), CircuitState::Closed);
        assert_eq!(breaker.allow("a"), Permit::Granted);
    }

    #[test]
    fn cooldown_growth_is_capped() {
        let config = fast_config();
        assert_eq!(
            next_cooldown(&config, Duration::from_millis(60)),
            Duration::from_millis(80)
        );
    }

    #[test]
    fn providers_are_tracked_independently() {
        let breaker = CircuitBreaker::new(fast_config());
        trip(&breaker, "a", 3);
        assert_eq!(breaker.allow("a"), Permit::Rejected);
        assert_eq!(breaker.allow("b"), Permit::Granted);
    }
}
