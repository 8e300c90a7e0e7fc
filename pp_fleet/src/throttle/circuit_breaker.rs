//! Circuit breaker for failure domains (one per scan source).
//!
//! Classic three-state breaker: `Closed` passes requests through, `Open`
//! rejects everything, `HalfOpen` admits a single probe after the recovery
//! timeout. The `Open -> HalfOpen` transition is computed lazily when state
//! is read, not by a timer thread, so an idle breaker costs nothing.

use serde::{Deserialize, Serialize};
use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, requests allowed
    Closed,
    /// Tripped, all requests rejected
    Open,
    /// Recovery probe window, one request allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

/// Three-state failure/recovery circuit breaker.
///
/// Callers must check [`CircuitBreaker::allow_request`] before attempting
/// work and report the outcome with exactly one of
/// [`CircuitBreaker::record_success`] / [`CircuitBreaker::record_failure`].
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Consecutive failures before tripping open
    failure_threshold: u32,

    /// Time the breaker stays open before admitting a probe
    recovery_timeout: Duration,

    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new breaker in the closed state.
    ///
    /// # Arguments
    ///
    /// * `failure_threshold` - Consecutive failures that trip the breaker
    /// * `recovery_timeout` - How long the breaker stays open before a probe
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
            }),
        }
    }

    /// Current state, applying the lazy `Open -> HalfOpen` transition.
    ///
    /// The transition mutates state under the same lock as the read; a pure
    /// getter plus a separate setter would let two racing readers
    /// double-transition.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().unwrap();
        Self::effective_state(&mut inner, self.recovery_timeout)
    }

    /// Whether a request may be attempted right now.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        matches!(
            Self::effective_state(&mut inner, self.recovery_timeout),
            CircuitState::Closed | CircuitState::HalfOpen
        )
    }

    /// Record a successful request. A success in `HalfOpen` closes the
    /// breaker; in any state it clears the failure count.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        let previous = Self::effective_state(&mut inner, self.recovery_timeout);
        if previous != CircuitState::Closed {
            log::info!("circuit breaker recovered ({previous} -> closed)");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
    }

    /// Record a failed request. A failure in `HalfOpen` re-trips the breaker
    /// immediately and restarts the recovery clock.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        let previous = Self::effective_state(&mut inner, self.recovery_timeout);

        inner.consecutive_failures += 1;
        inner.last_failure = Some(Instant::now());

        let trip = match previous {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.failure_threshold,
            CircuitState::Open => false,
        };
        if trip && previous != CircuitState::Open {
            log::warn!(
                "circuit breaker tripped open after {} consecutive failures",
                inner.consecutive_failures
            );
            inner.state = CircuitState::Open;
        }
    }

    /// Force the breaker closed with counters zeroed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.last_failure = None;
    }

    /// Consecutive failure count.
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().unwrap().consecutive_failures
    }

    fn effective_state(inner: &mut BreakerState, recovery_timeout: Duration) -> CircuitState {
        if inner.state == CircuitState::Open
            && let Some(last_failure) = inner.last_failure
            && last_failure.elapsed() >= recovery_timeout
        {
            inner.state = CircuitState::HalfOpen;
        }
        inner.state
    }
}
