//! Scan orchestration: source failover, throttling, and proxy rotation.

use super::models::{ScanMetric, ScanSource, ScanStats};
use crate::{
    proxy::ProxyPool,
    throttle::{AdaptiveDelay, CircuitBreaker, CircuitState},
};
use chrono::Utc;
use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

/// A pluggable scan source.
///
/// Receives the proxy URL to route through (`None` for direct/local
/// sources) and returns the discovered lobby records or an error string.
pub type ScanFn<T> = Arc<dyn Fn(Option<&str>) -> Result<Vec<T>, String> + Send + Sync>;

/// Scanner configuration
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Base inter-scan delay
    pub base_delay: Duration,

    /// Cap on the backed-off delay
    pub max_delay: Duration,

    /// Fractional jitter applied to every delay
    pub jitter_frac: f64,

    /// Delay multiplier per consecutive scan error
    pub backoff_mult: f64,

    /// Consecutive failures before a source's breaker trips
    pub circuit_failure_threshold: u32,

    /// How long a tripped source rests before a probe
    pub circuit_recovery_timeout: Duration,

    /// Source tried first on every scan
    pub preferred_source: ScanSource,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            jitter_frac: 0.3,
            backoff_mult: 2.0,
            circuit_failure_threshold: 3,
            circuit_recovery_timeout: Duration::from_secs(60),
            preferred_source: ScanSource::Ocr,
        }
    }
}

/// Rate-limit-safe lobby scan orchestrator.
///
/// Generic over the lobby record type `T`; the scanner never inspects
/// records beyond counting them. Its sub-components each guard themselves,
/// so concurrent `scan` calls are safe, though their stats updates
/// interleave.
pub struct LobbyScanner<T> {
    config: ScannerConfig,
    ocr_fn: Option<ScanFn<T>>,
    http_fn: Option<ScanFn<T>>,
    ocr_breaker: CircuitBreaker,
    http_breaker: CircuitBreaker,
    delay: AdaptiveDelay,
    pool: Arc<ProxyPool>,
    stats: Mutex<ScanStats>,
}

impl<T> LobbyScanner<T> {
    /// Create a scanner with no sources configured. Attach sources with
    /// [`LobbyScanner::with_ocr_source`] / [`LobbyScanner::with_http_source`].
    pub fn new(config: ScannerConfig, pool: Arc<ProxyPool>) -> Self {
        let delay = AdaptiveDelay::new(
            config.base_delay,
            config.max_delay,
            config.jitter_frac,
            config.backoff_mult,
        );
        let ocr_breaker = CircuitBreaker::new(
            config.circuit_failure_threshold,
            config.circuit_recovery_timeout,
        );
        let http_breaker = CircuitBreaker::new(
            config.circuit_failure_threshold,
            config.circuit_recovery_timeout,
        );
        Self {
            config,
            ocr_fn: None,
            http_fn: None,
            ocr_breaker,
            http_breaker,
            delay,
            pool,
            stats: Mutex::new(ScanStats::default()),
        }
    }

    /// Attach the OCR-like (local, proxy-free) scan source.
    pub fn with_ocr_source(mut self, f: ScanFn<T>) -> Self {
        self.ocr_fn = Some(f);
        self
    }

    /// Attach the HTTP-like (proxy-routed) scan source.
    pub fn with_http_source(mut self, f: ScanFn<T>) -> Self {
        self.http_fn = Some(f);
        self
    }

    /// Scanner configuration.
    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Breaker state for a source, for introspection.
    pub fn breaker_state(&self, source: ScanSource) -> CircuitState {
        self.breaker_of(source).state()
    }

    /// Snapshot of the running session stats.
    pub fn stats(&self) -> ScanStats {
        self.stats.lock().unwrap().clone()
    }

    /// Reset the session stats to zero.
    pub fn reset_stats(&self) {
        self.stats.lock().unwrap().reset();
    }

    /// Execute one scan.
    ///
    /// Applies the adaptive delay (unless suppressed), picks a source by
    /// breaker state with failover, routes HTTP scans through the proxy
    /// pool, and records the outcome everywhere it matters. Failures come
    /// back as data in the metric, never as panics.
    pub fn scan(&self, apply_delay: bool) -> (Vec<T>, ScanMetric) {
        if apply_delay {
            self.delay.wait();
        }

        let Some((source, scan_fn)) = self.select_source() else {
            // Nothing to call; breakers and delay are left untouched.
            let metric = ScanMetric {
                source: self.config.preferred_source,
                success: false,
                latency_ms: 0.0,
                tables_found: 0,
                error: Some("no scan function configured".to_string()),
                proxy: None,
                timestamp: Utc::now(),
            };
            self.stats.lock().unwrap().record(&metric);
            return (Vec::new(), metric);
        };

        let proxy = match source {
            ScanSource::Http => self.pool.next_proxy().map(|e| e.url),
            ScanSource::Ocr => None,
        };

        let start = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| scan_fn(proxy.as_deref())))
            .unwrap_or_else(|_| Err("scan function panicked".to_string()));
        let latency_ms = start.elapsed().as_secs_f64() * 1_000.0;

        let breaker = self.breaker_of(source);
        let (items, error) = match result {
            Ok(items) => {
                breaker.record_success();
                self.delay.record_success();
                if let Some(url) = &proxy {
                    self.pool.report_success(url, Some(latency_ms));
                }
                (items, None)
            }
            Err(reason) => {
                breaker.record_failure();
                self.delay.record_error();
                if let Some(url) = &proxy {
                    self.pool.report_failure(url);
                }
                log::debug!("scan via {source} failed: {reason}");
                (Vec::new(), Some(reason))
            }
        };

        let metric = ScanMetric {
            source,
            success: error.is_none(),
            latency_ms,
            tables_found: items.len(),
            error,
            proxy,
            timestamp: Utc::now(),
        };
        self.stats.lock().unwrap().record(&metric);
        (items, metric)
    }

    /// Run `count` scans, resetting the session stats first.
    ///
    /// The delay is suppressed for the very first scan so a cold start
    /// pays no wait; every later iteration is throttled.
    pub fn run_batch(&self, count: usize) -> ScanStats {
        self.run_batch_with(count, |_, _| {})
    }

    /// Run a batch with a per-scan callback receiving the index and metric.
    pub fn run_batch_with<F>(&self, count: usize, mut on_scan: F) -> ScanStats
    where
        F: FnMut(usize, &ScanMetric),
    {
        self.reset_stats();
        log::info!("starting scan batch of {count}");
        for i in 0..count {
            let (_, metric) = self.scan(i > 0);
            on_scan(i, &metric);
        }
        self.stats()
    }

    /// Pick the source to call.
    ///
    /// Prefer the configured source when it has a function and its breaker
    /// admits requests; otherwise the alternate under the same condition;
    /// otherwise fall back to the preferred source regardless, so the
    /// system keeps attempting and the breaker's lazy half-open transition
    /// gets a chance to fire. Returns `None` only when no source has a
    /// function at all.
    fn select_source(&self) -> Option<(ScanSource, &ScanFn<T>)> {
        let preferred = self.config.preferred_source;
        let alternate = preferred.other();

        for source in [preferred, alternate] {
            if let Some(f) = self.fn_of(source)
                && self.breaker_of(source).allow_request()
            {
                return Some((source, f));
            }
        }
        if let Some(f) = self.fn_of(preferred) {
            return Some((preferred, f));
        }
        self.fn_of(alternate).map(|f| (alternate, f))
    }

    fn fn_of(&self, source: ScanSource) -> Option<&ScanFn<T>> {
        match source {
            ScanSource::Ocr => self.ocr_fn.as_ref(),
            ScanSource::Http => self.http_fn.as_ref(),
        }
    }

    fn breaker_of(&self, source: ScanSource) -> &CircuitBreaker {
        match source {
            ScanSource::Ocr => &self.ocr_breaker,
            ScanSource::Http => &self.http_breaker,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::PoolConfig;

    #[derive(Debug, Clone, PartialEq)]
    struct Table(u32);

    fn fast_config() -> ScannerConfig {
        ScannerConfig {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_frac: 0.0,
            ..ScannerConfig::default()
        }
    }

    fn empty_pool() -> Arc<ProxyPool> {
        Arc::new(ProxyPool::new(PoolConfig::default()))
    }

    fn ok_source(tables: usize) -> ScanFn<Table> {
        Arc::new(move |_| Ok((0..tables as u32).map(Table).collect()))
    }

    fn failing_source(reason: &str) -> ScanFn<Table> {
        let reason = reason.to_string();
        Arc::new(move |_| Err(reason.clone()))
    }

    #[test]
    fn test_no_sources_configured_reports_error_metric() {
        let scanner: LobbyScanner<Table> = LobbyScanner::new(fast_config(), empty_pool());

        let (items, metric) = scanner.scan(false);
        assert!(items.is_empty());
        assert!(!metric.success);
        assert_eq!(metric.error.as_deref(), Some("no scan function configured"));
        // Breakers and delay untouched
        assert_eq!(scanner.breaker_state(ScanSource::Ocr), CircuitState::Closed);
        assert_eq!(scanner.delay.consecutive_errors(), 0);
    }

    #[test]
    fn test_successful_scan_returns_items() {
        let scanner = LobbyScanner::new(fast_config(), empty_pool()).with_ocr_source(ok_source(3));

        let (items, metric) = scanner.scan(false);
        assert_eq!(items.len(), 3);
        assert!(metric.success);
        assert_eq!(metric.source, ScanSource::Ocr);
        assert_eq!(metric.tables_found, 3);
        assert!(metric.proxy.is_none());
    }

    #[test]
    fn test_failover_to_http_after_ocr_trips() {
        let config = ScannerConfig {
            circuit_failure_threshold: 1,
            ..fast_config()
        };
        let scanner = LobbyScanner::new(config, empty_pool())
            .with_ocr_source(failing_source("camera offline"))
            .with_http_source(ok_source(2));

        // First scan goes to the preferred OCR source and fails
        let (_, metric) = scanner.scan(false);
        assert_eq!(metric.source, ScanSource::Ocr);
        assert!(!metric.success);
        assert_eq!(scanner.breaker_state(ScanSource::Ocr), CircuitState::Open);

        // Everything afterwards routes to HTTP and succeeds
        for _ in 0..5 {
            let (items, metric) = scanner.scan(false);
            assert_eq!(metric.source, ScanSource::Http);
            assert!(metric.success);
            assert_eq!(items.len(), 2);
        }
    }

    #[test]
    fn test_falls_back_to_preferred_when_all_breakers_open() {
        let config = ScannerConfig {
            circuit_failure_threshold: 1,
            ..fast_config()
        };
        let scanner = LobbyScanner::new(config, empty_pool())
            .with_ocr_source(failing_source("down"))
            .with_http_source(failing_source("down too"));

        scanner.scan(false); // trips OCR
        scanner.scan(false); // trips HTTP
        assert_eq!(scanner.breaker_state(ScanSource::Ocr), CircuitState::Open);
        assert_eq!(scanner.breaker_state(ScanSource::Http), CircuitState::Open);

        // Still attempts the preferred source rather than giving up
        let (_, metric) = scanner.scan(false);
        assert_eq!(metric.source, ScanSource::Ocr);
    }

    #[test]
    fn test_http_scans_use_and_report_proxy() {
        let pool = Arc::new(ProxyPool::new(PoolConfig::default()));
        pool.add_proxy("http://p1", None, None).unwrap();

        let config = ScannerConfig {
            preferred_source: ScanSource::Http,
            ..fast_config()
        };
        let scanner = LobbyScanner::new(config, Arc::clone(&pool)).with_http_source(ok_source(1));

        let (_, metric) = scanner.scan(false);
        assert_eq!(metric.proxy.as_deref(), Some("http://p1"));
        assert_eq!(pool.get("http://p1").unwrap().successful_requests, 1);
    }

    #[test]
    fn test_http_failure_feeds_proxy_pool() {
        let pool = Arc::new(ProxyPool::new(PoolConfig {
            max_failures: 2,
            ..PoolConfig::default()
        }));
        pool.add_proxy("http://p1", None, None).unwrap();

        let config = ScannerConfig {
            preferred_source: ScanSource::Http,
            circuit_failure_threshold: 10,
            ..fast_config()
        };
        let scanner =
            LobbyScanner::new(config, Arc::clone(&pool)).with_http_source(failing_source("403"));

        scanner.scan(false);
        scanner.scan(false);
        assert_eq!(pool.get("http://p1").unwrap().consecutive_failures, 2);
    }

    #[test]
    fn test_panicking_scan_source_becomes_failure_metric() {
        let scanner: LobbyScanner<Table> = LobbyScanner::new(fast_config(), empty_pool())
            .with_ocr_source(Arc::new(|_| panic!("reader crashed")));

        let (items, metric) = scanner.scan(false);
        assert!(items.is_empty());
        assert!(!metric.success);
        assert_eq!(metric.error.as_deref(), Some("scan function panicked"));
    }

    #[test]
    fn test_run_batch_stress() {
        let scanner = LobbyScanner::new(fast_config(), empty_pool()).with_ocr_source(ok_source(4));

        let stats = scanner.run_batch(100);
        assert_eq!(stats.total_scans, 100);
        assert_eq!(stats.failed, 0);
        assert!((stats.success_rate() - 1.0).abs() < 1e-9);
        assert_eq!(stats.total_tables, 400);
    }

    #[test]
    fn test_run_batch_resets_stats_and_invokes_callback() {
        let scanner = LobbyScanner::new(fast_config(), empty_pool()).with_ocr_source(ok_source(1));
        scanner.scan(false);
        assert_eq!(scanner.stats().total_scans, 1);

        let mut indices = Vec::new();
        let stats = scanner.run_batch_with(3, |i, metric| {
            indices.push(i);
            assert!(metric.success);
        });
        assert_eq!(stats.total_scans, 3);
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_scan_errors_back_off_the_delay() {
        let config = ScannerConfig {
            circuit_failure_threshold: 100,
            ..fast_config()
        };
        let scanner =
            LobbyScanner::new(config, empty_pool()).with_ocr_source(failing_source("flaky"));

        scanner.scan(false);
        scanner.scan(false);
        assert_eq!(scanner.delay.consecutive_errors(), 2);
    }
}
