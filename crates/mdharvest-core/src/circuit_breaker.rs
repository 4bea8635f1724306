//! Circuit breaker guarding calls to the content service.
//!
//! One breaker exists per logical endpoint (submit, poll, fetch, map) so that a
//! failing status endpoint does not block page fetches, and vice versa.
//!
//! ```text
//! CLOSED --[N failed calls]--> OPEN --[cool-down]--> HALF_OPEN (one trial call)
//!   ^                           ^                        |
//!   |                           +------[failure]---------+
//!   +-------------------------------[success]------------+
//! ```

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::AppError;

/// Observable state of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    /// Calls are rejected without touching the network.
    Open,
    /// A single trial call is allowed to test recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        })
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failed calls that open the circuit.
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls before allowing a trial call.
    pub cool_down: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(60),
        }
    }
}

/// How a call was let through the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Normal,
    /// The single recovery trial of a half-open circuit.
    Trial,
}

impl Admission {
    pub fn is_trial(&self) -> bool {
        matches!(self, Admission::Trial)
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed,
    Open { since: Instant },
    HalfOpen { probing: bool },
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    failures: u32,
    last_error: Option<String>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            phase: Phase::Closed,
            failures: 0,
            last_error: None,
        }
    }
}

/// Thread-safe circuit breaker. Clones share state.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<Inner>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        match self.lock().phase {
            Phase::Closed => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Consecutive failures counted since the last success.
    pub fn failure_count(&self) -> u32 {
        self.lock().failures
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    /// Remaining cool-down while open.
    pub fn retry_after(&self) -> Option<Duration> {
        match self.lock().phase {
            Phase::Open { since } => Some(self.config.cool_down.saturating_sub(since.elapsed())),
            _ => None,
        }
    }

    /// Locks the state, recovering from poison and applying a due
    /// open → half-open transition.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        let mut inner = self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(circuit = %self.name, "Recovered from poisoned mutex");
            poisoned.into_inner()
        });
        if let Phase::Open { since } = inner.phase
            && since.elapsed() >= self.config.cool_down
        {
            tracing::info!(circuit = %self.name, "Circuit half-open, next call is a trial");
            inner.phase = Phase::HalfOpen { probing: false };
        }
        inner
    }

    fn rejection(&self, retry_after: Duration) -> AppError {
        AppError::ServiceUnavailable {
            endpoint: self.name.clone(),
            retry_after_secs: retry_after.as_secs(),
        }
    }

    /// Decides whether a call may proceed.
    ///
    /// While half-open only the first caller gets the trial slot; everyone
    /// else is rejected until the trial resolves.
    pub fn try_acquire(&self) -> Result<Admission, AppError> {
        let mut inner = self.lock();
        match inner.phase {
            Phase::Closed => Ok(Admission::Normal),
            Phase::HalfOpen { probing: false } => {
                inner.phase = Phase::HalfOpen { probing: true };
                tracing::debug!(circuit = %self.name, "Admitting trial call");
                Ok(Admission::Trial)
            }
            Phase::HalfOpen { probing: true } => Err(self.rejection(Duration::ZERO)),
            Phase::Open { since } => {
                Err(self.rejection(self.config.cool_down.saturating_sub(since.elapsed())))
            }
        }
    }

    /// Runs `operation` if the breaker admits it and records the outcome.
    ///
    /// The operation is told whether it runs as the trial. Errors that say
    /// nothing about service health (4xx, rejected input) are passed through
    /// without counting as failures.
    pub async fn call<F, T, Fut>(&self, operation: F) -> Result<T, AppError>
    where
        F: FnOnce(Admission) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let admission = self.try_acquire()?;
        let result = operation(admission).await;

        match &result {
            Ok(_) => self.record_success(),
            Err(e) if e.should_trip_circuit() => self.record_failure(e),
            Err(_) if admission.is_trial() => {
                // The service answered, so it is not down; let the next call be the trial.
                self.lock().phase = Phase::HalfOpen { probing: false };
            }
            Err(_) => {}
        }

        result
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if let Phase::HalfOpen { .. } = inner.phase {
            tracing::info!(circuit = %self.name, "Trial call succeeded, circuit closed");
            inner.last_error = None;
        }
        if !matches!(inner.phase, Phase::Open { .. }) {
            inner.phase = Phase::Closed;
            inner.failures = 0;
        }
    }

    pub fn record_failure(&self, error: &AppError) {
        let mut inner = self.lock();
        inner.last_error = Some(error.to_string());

        match inner.phase {
            Phase::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    tracing::warn!(
                        circuit = %self.name,
                        failures = inner.failures,
                        error = %error,
                        "Circuit opened"
                    );
                    inner.phase = Phase::Open {
                        since: Instant::now(),
                    };
                }
            }
            Phase::HalfOpen { .. } => {
                tracing::warn!(circuit = %self.name, error = %error, "Trial call failed, circuit reopened");
                inner.phase = Phase::Open {
                    since: Instant::now(),
                };
            }
            Phase::Open { .. } => {}
        }
    }

    pub fn reset(&self) {
        *self.lock() = Inner::default();
    }
}
