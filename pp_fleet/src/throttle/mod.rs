//! Throttling primitives shared by the scan orchestrator and proxy pool.
//!
//! Both primitives are self-contained state machines guarded by their own
//! mutex, so they can be shared freely across worker threads.

/// Jittered, error-backed-off delay between requests.
pub mod adaptive_delay;

/// Three-state failure/recovery circuit breaker.
pub mod circuit_breaker;

pub use adaptive_delay::AdaptiveDelay;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
