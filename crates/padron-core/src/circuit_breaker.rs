//! Circuit breaker guarding the external registry.
//!
//! One instance is shared by every agent in the worker pool: it gates the
//! *source*, not an individual agent, so clustered failures from any agent
//! stop the whole pool from hammering a degraded registry.
//!
//! # Circuit States
//!
//! ```text
//! CLOSED (healthy) --[N failures]--> OPEN (rejecting) --[timeout]--> HALF_OPEN (probing)
//!                                                                         |
//!                                       <--[failure]--                    |
//!                                                                         |
//! CLOSED <---------------------------[successes]--------------------------+
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::error::AppError;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed - calls flow normally.
    Closed,
    /// Circuit is open - calls are rejected immediately.
    Open,
    /// Circuit is half-open - calls are allowed through to test recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit.
    pub failure_threshold: u32,

    /// Number of successful calls in half-open state to close the circuit.
    pub success_threshold: u32,

    /// Time to wait before allowing a half-open probe.
    pub reset_timeout: Duration,

    /// Hard bound on each guarded call. A call that has not settled within
    /// this window counts as a failure.
    pub call_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(300),
            call_timeout: Duration::from_secs(60),
        }
    }
}

/// Internal state tracking for the circuit breaker.
#[derive(Debug)]
struct CircuitBreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    next_attempt_at: Option<Instant>,
    last_error_message: Option<String>,
    successful_calls: u64,
    failed_calls: u64,
    rejected_calls: u64,
}

impl CircuitBreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            next_attempt_at: None,
            last_error_message: None,
            successful_calls: 0,
            failed_calls: 0,
            rejected_calls: 0,
        }
    }
}

/// Point-in-time view of the breaker, for health endpoints and pool stats.
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Time until a half-open probe is allowed, while open.
    pub next_attempt_in: Option<Duration>,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub last_error: Option<String>,
}

/// Error type for circuit breaker operations.
#[derive(Debug)]
pub enum CircuitBreakerError {
    /// Circuit is open - the call was rejected without reaching the registry.
    Open { name: String, retry_after: Duration },
    /// The guarded operation failed (or timed out).
    Inner(AppError),
}

impl std::fmt::Display for CircuitBreakerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::Open { name, retry_after } => {
                write!(
                    f,
                    "Circuit breaker '{}' is open. Retry after {} seconds.",
                    name,
                    retry_after.as_secs()
                )
            }
            CircuitBreakerError::Inner(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CircuitBreakerError {}

/// Thread-safe circuit breaker protecting calls to the external registry.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<CircuitBreakerInner>>,
    state_tx: Arc<watch::Sender<CircuitState>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let (state_tx, _) = watch::channel(CircuitState::Closed);
        Self {
            name: name.into(),
            config,
            inner: Arc::new(Mutex::new(CircuitBreakerInner::new())),
            state_tx: Arc::new(state_tx),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Watch state transitions (Closed/Open/HalfOpen) as they happen.
    pub fn subscribe(&self) -> watch::Receiver<CircuitState> {
        self.state_tx.subscribe()
    }

    /// Acquires the inner mutex lock, recovering from poison if necessary.
    fn lock_inner(&self) -> std::sync::MutexGuard<'_, CircuitBreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(circuit = %self.name, "Recovered from poisoned mutex");
            poisoned.into_inner()
        })
    }

    fn set_state(&self, inner: &mut CircuitBreakerInner, state: CircuitState) {
        inner.state = state;
        self.state_tx.send_replace(state);
    }

    /// Returns the current state, handling lazy Open → HalfOpen transitions.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);
        inner.state
    }

    /// Time remaining until a half-open probe is allowed, while open.
    pub fn retry_in(&self) -> Option<Duration> {
        let inner = self.lock_inner();
        if inner.state != CircuitState::Open {
            return None;
        }
        inner
            .next_attempt_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);

        let next_attempt_in = if inner.state == CircuitState::Open {
            inner
                .next_attempt_at
                .map(|at| at.saturating_duration_since(Instant::now()))
        } else {
            None
        };

        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.failure_count,
            consecutive_successes: inner.success_count,
            next_attempt_in,
            total_calls: inner.successful_calls + inner.failed_calls + inner.rejected_calls,
            successful_calls: inner.successful_calls,
            failed_calls: inner.failed_calls,
            rejected_calls: inner.rejected_calls,
            last_error: inner.last_error_message.clone(),
        }
    }

    /// Executes the given operation through the circuit breaker.
    ///
    /// - Closed: executes operation, tracks success/failure
    /// - Open: returns `CircuitBreakerError::Open` immediately, unless
    ///   `next_attempt_at` has passed, in which case the breaker moves to
    ///   HalfOpen and the call is allowed through as a probe
    /// - HalfOpen: executes operation, transitions based on result
    ///
    /// Every call is bounded by `call_timeout`; an elapsed timeout counts
    /// as a failure and the wrapped future is dropped.
    pub async fn call<F, T, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        // Check if the call is allowed through
        {
            let mut inner = self.lock_inner();
            self.maybe_transition_to_half_open(&mut inner);

            if inner.state == CircuitState::Open {
                inner.rejected_calls += 1;
                let retry_after = inner
                    .next_attempt_at
                    .map(|at| at.saturating_duration_since(Instant::now()))
                    .unwrap_or(self.config.reset_timeout);

                return Err(CircuitBreakerError::Open {
                    name: self.name.clone(),
                    retry_after,
                });
            }
        }

        // Execute, bounded by the call timeout
        let result = match tokio::time::timeout(self.config.call_timeout, operation()).await {
            Ok(inner) => inner,
            Err(_) => Err(AppError::Timeout(self.config.call_timeout.as_secs())),
        };

        // Record the outcome
        match &result {
            Ok(_) => self.record_success(),
            Err(e) => self.record_failure(e),
        }

        result.map_err(CircuitBreakerError::Inner)
    }

    pub fn record_success(&self) {
        let mut inner = self.lock_inner();
        inner.successful_calls += 1;

        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    tracing::info!(
                        circuit = %self.name,
                        "Circuit breaker closing after {} successful probes",
                        inner.success_count
                    );
                    self.set_state(&mut inner, CircuitState::Closed);
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.next_attempt_at = None;
                    inner.last_error_message = None;
                }
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, error: &AppError) {
        let mut inner = self.lock_inner();
        inner.failed_calls += 1;
        inner.last_error_message = Some(error.to_string());

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;

                if inner.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        circuit = %self.name,
                        failures = inner.failure_count,
                        error = %error,
                        "Circuit breaker opening after {} consecutive failures",
                        inner.failure_count
                    );
                    self.set_state(&mut inner, CircuitState::Open);
                    inner.next_attempt_at = Some(Instant::now() + self.config.reset_timeout);
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(
                    circuit = %self.name,
                    error = %error,
                    "Circuit breaker probe failed, returning to open state"
                );
                self.set_state(&mut inner, CircuitState::Open);
                inner.next_attempt_at = Some(Instant::now() + self.config.reset_timeout);
                inner.success_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Force the breaker closed with all counters zeroed, for operator
    /// intervention.
    pub fn reset(&self) {
        let mut inner = self.lock_inner();
        tracing::info!(circuit = %self.name, "Circuit breaker manually reset");
        self.set_state(&mut inner, CircuitState::Closed);
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.next_attempt_at = None;
        inner.last_error_message = None;
        inner.successful_calls = 0;
        inner.failed_calls = 0;
        inner.rejected_calls = 0;
    }

    fn maybe_transition_to_half_open(&self, inner: &mut CircuitBreakerInner) {
        if inner.state == CircuitState::Open
            && let Some(next_attempt) = inner.next_attempt_at
            && Instant::now() >= next_attempt
        {
            tracing::info!(
                circuit = %self.name,
                "Circuit breaker transitioning to half-open state"
            );
            self.set_state(inner, CircuitState::HalfOpen);
            inner.success_count = 0;
        }
    }
}
