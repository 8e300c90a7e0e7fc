//! Adaptive inter-request delay with jitter and error backoff.
//!
//! The delay grows exponentially with consecutive errors and shrinks one
//! step per success, so a scanner recovering from a rate-limit episode
//! ramps back up gradually instead of immediately hammering the target.

use rand::Rng;
use std::{
    sync::Mutex,
    time::Duration,
};

/// Adaptive delay between requests.
///
/// The computed delay is `base * mult^errors`, capped at `max`, with a
/// uniform jitter of up to `jitter_frac` of the delay applied in either
/// direction. [`AdaptiveDelay::wait`] is the only blocking operation in
/// the library's core: it sleeps the calling thread for the computed
/// duration.
#[derive(Debug)]
pub struct AdaptiveDelay {
    /// Delay with zero recorded errors
    base: Duration,

    /// Hard cap on the backed-off delay
    max: Duration,

    /// Jitter as a fraction of the current delay (0.0 disables jitter)
    jitter_frac: f64,

    /// Multiplier applied per consecutive error
    backoff_mult: f64,

    /// Consecutive error count driving the backoff exponent
    consecutive_errors: Mutex<u32>,
}

impl AdaptiveDelay {
    /// Create a new adaptive delay.
    ///
    /// # Arguments
    ///
    /// * `base` - Delay with no recorded errors
    /// * `max` - Upper bound on the backed-off delay
    /// * `jitter_frac` - Fractional jitter, e.g. 0.3 for ±30%
    /// * `backoff_mult` - Exponential multiplier per consecutive error
    pub fn new(base: Duration, max: Duration, jitter_frac: f64, backoff_mult: f64) -> Self {
        Self {
            base,
            max,
            jitter_frac,
            backoff_mult,
            consecutive_errors: Mutex::new(0),
        }
    }

    /// Compute the current delay (backoff applied, then jitter).
    pub fn current_delay(&self) -> Duration {
        let errors = *self.consecutive_errors.lock().unwrap();

        let backed_off = self.base.as_secs_f64() * self.backoff_mult.powi(errors as i32);
        let capped = backed_off.min(self.max.as_secs_f64());

        let jittered = if self.jitter_frac > 0.0 {
            let jitter = capped * self.jitter_frac;
            capped + rand::rng().random_range(-jitter..=jitter)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered.max(0.0))
    }

    /// Sleep the calling thread for the current delay. No-op if the
    /// computed delay is zero.
    pub fn wait(&self) {
        let delay = self.current_delay();
        if delay > Duration::ZERO {
            log::debug!("throttling for {:.3}s", delay.as_secs_f64());
            std::thread::sleep(delay);
        }
    }

    /// Record a failed request, increasing the backoff exponent.
    pub fn record_error(&self) {
        let mut errors = self.consecutive_errors.lock().unwrap();
        *errors += 1;
    }

    /// Record a successful request, decreasing the backoff exponent by one
    /// step (gradual recovery rather than a hard reset).
    pub fn record_success(&self) {
        let mut errors = self.consecutive_errors.lock().unwrap();
        *errors = errors.saturating_sub(1);
    }

    /// Reset the backoff exponent to zero.
    pub fn reset(&self) {
        *self.consecutive_errors.lock().unwrap() = 0;
    }

    /// Current consecutive error count.
    pub fn consecutive_errors(&self) -> u32 {
        *self.consecutive_errors.lock().unwrap()
    }
}
