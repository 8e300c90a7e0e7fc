//! Property-based tests for the throttling primitives and stats folding.

use pp_fleet::scan::{ScanMetric, ScanSource, ScanStats};
use pp_fleet::throttle::{AdaptiveDelay, CircuitBreaker, CircuitState};
use proptest::prelude::*;
use std::time::Duration;

proptest! {
    /// The computed delay never exceeds max * (1 + jitter), for any error
    /// count and configuration.
    #[test]
    fn prop_delay_bounded(
        base_ms in 1u64..5_000,
        max_ms in 1u64..60_000,
        jitter in 0.0f64..0.9,
        mult in 1.0f64..4.0,
        errors in 0u32..20,
    ) {
        let delay = AdaptiveDelay::new(
            Duration::from_millis(base_ms),
            Duration::from_millis(max_ms),
            jitter,
            mult,
        );
        for _ in 0..errors {
            delay.record_error();
        }

        let upper = (max_ms.max(base_ms) as f64 / 1_000.0) * (1.0 + jitter) + 1e-6;
        let d = delay.current_delay().as_secs_f64();
        prop_assert!(d >= 0.0);
        prop_assert!(d <= upper, "delay {} exceeds bound {}", d, upper);
    }

    /// Successes walk the error counter back one step at a time, never
    /// below zero.
    #[test]
    fn prop_delay_recovery_is_gradual(errors in 0u32..30, successes in 0u32..40) {
        let delay = AdaptiveDelay::new(
            Duration::from_millis(100),
            Duration::from_secs(10),
            0.0,
            2.0,
        );
        for _ in 0..errors {
            delay.record_error();
        }
        for _ in 0..successes {
            delay.record_success();
        }
        prop_assert_eq!(delay.consecutive_errors(), errors.saturating_sub(successes));
    }

    /// A breaker below its failure threshold stays closed; at or past it,
    /// it is open and rejects requests.
    #[test]
    fn prop_breaker_threshold_exact(threshold in 1u32..20, failures in 0u32..40) {
        let breaker = CircuitBreaker::new(threshold, Duration::from_secs(3_600));
        for _ in 0..failures {
            breaker.record_failure();
        }
        if failures >= threshold {
            prop_assert_eq!(breaker.state(), CircuitState::Open);
            prop_assert!(!breaker.allow_request());
        } else {
            prop_assert_eq!(breaker.state(), CircuitState::Closed);
            prop_assert!(breaker.allow_request());
        }
    }

    /// Folding any sequence of metrics keeps the count invariant and the
    /// average latency within the observed range.
    #[test]
    fn prop_scan_stats_invariants(outcomes in prop::collection::vec((any::<bool>(), 0.0f64..10_000.0, 0usize..50), 1..50)) {
        let mut stats = ScanStats::default();
        let mut min = f64::MAX;
        let mut max: f64 = 0.0;
        for (success, latency_ms, tables) in &outcomes {
            min = min.min(*latency_ms);
            max = max.max(*latency_ms);
            stats.record(&ScanMetric {
                source: ScanSource::Http,
                success: *success,
                latency_ms: *latency_ms,
                tables_found: *tables,
                error: if *success { None } else { Some("err".to_string()) },
                proxy: None,
                timestamp: chrono::Utc::now(),
            });
        }

        prop_assert_eq!(stats.successful + stats.failed, stats.total_scans);
        prop_assert_eq!(stats.total_scans, outcomes.len() as u64);
        prop_assert!(stats.avg_latency_ms >= min - 1e-6);
        prop_assert!(stats.avg_latency_ms <= max + 1e-6);
        prop_assert_eq!(stats.errors.len() as u64, stats.failed);
    }
}
