//! Lobby scanner integration tests.
//!
//! End-to-end failover and throttling behavior across the scanner, its
//! breakers, the adaptive delay, and a live proxy pool.

use pp_fleet::{
    proxy::{PoolConfig, ProxyPool},
    scan::{LobbyScanner, ScanFn, ScanSource, ScannerConfig},
    throttle::CircuitState,
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    thread,
    time::Duration,
};

#[derive(Debug, Clone)]
struct TableRow {
    #[allow(dead_code)]
    name: String,
}

fn rows(n: usize) -> Vec<TableRow> {
    (0..n)
        .map(|i| TableRow {
            name: format!("table-{i}"),
        })
        .collect()
}

fn fast_config() -> ScannerConfig {
    ScannerConfig {
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        jitter_frac: 0.0,
        ..ScannerConfig::default()
    }
}

// ============================================================================
// Failover Correctness
// ============================================================================

#[test]
fn test_ocr_failure_routes_batch_to_http() {
    let ocr_calls = Arc::new(AtomicU32::new(0));
    let http_calls = Arc::new(AtomicU32::new(0));

    let ocr_counter = Arc::clone(&ocr_calls);
    let ocr: ScanFn<TableRow> = Arc::new(move |_| {
        ocr_counter.fetch_add(1, Ordering::SeqCst);
        Err("screen reader offline".to_string())
    });
    let http_counter = Arc::clone(&http_calls);
    let http: ScanFn<TableRow> = Arc::new(move |_| {
        http_counter.fetch_add(1, Ordering::SeqCst);
        Ok(rows(6))
    });

    let config = ScannerConfig {
        circuit_failure_threshold: 1,
        circuit_recovery_timeout: Duration::from_secs(60),
        ..fast_config()
    };
    let scanner = LobbyScanner::new(config, Arc::new(ProxyPool::new(PoolConfig::default())))
        .with_ocr_source(ocr)
        .with_http_source(http);

    let stats = scanner.run_batch(10);

    // One OCR failure, nine HTTP successes
    assert_eq!(ocr_calls.load(Ordering::SeqCst), 1);
    assert_eq!(http_calls.load(Ordering::SeqCst), 9);
    assert_eq!(stats.total_scans, 10);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.total_tables, 54);
    assert_eq!(stats.by_source[&ScanSource::Ocr], (0, 1));
    assert_eq!(stats.by_source[&ScanSource::Http], (9, 0));
}

#[test]
fn test_ocr_recovers_through_half_open_probe() {
    let ocr_calls = Arc::new(AtomicU32::new(0));
    let ocr_counter = Arc::clone(&ocr_calls);
    // Fails once, then recovers
    let ocr: ScanFn<TableRow> = Arc::new(move |_| {
        if ocr_counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err("warming up".to_string())
        } else {
            Ok(rows(2))
        }
    });

    let config = ScannerConfig {
        circuit_failure_threshold: 1,
        circuit_recovery_timeout: Duration::from_millis(80),
        ..fast_config()
    };
    let scanner = LobbyScanner::new(config, Arc::new(ProxyPool::new(PoolConfig::default())))
        .with_ocr_source(ocr)
        .with_http_source(Arc::new(|_| Ok(rows(1))));

    scanner.scan(false);
    assert_eq!(scanner.breaker_state(ScanSource::Ocr), CircuitState::Open);

    // While OCR rests, scans route to HTTP
    let (_, metric) = scanner.scan(false);
    assert_eq!(metric.source, ScanSource::Http);

    // After the recovery timeout the half-open probe goes back to OCR
    thread::sleep(Duration::from_millis(110));
    let (items, metric) = scanner.scan(false);
    assert_eq!(metric.source, ScanSource::Ocr);
    assert!(metric.success);
    assert_eq!(items.len(), 2);
    assert_eq!(scanner.breaker_state(ScanSource::Ocr), CircuitState::Closed);
}

// ============================================================================
// Proxy-Rotated Scanning
// ============================================================================

#[test]
fn test_http_batch_rotates_proxies_and_attributes_stats() {
    let pool = Arc::new(ProxyPool::new(PoolConfig::default()));
    pool.add_proxy("http://p1", None, None).unwrap();
    pool.add_proxy("http://p2", None, None).unwrap();

    let http: ScanFn<TableRow> = Arc::new(|proxy| {
        assert!(proxy.is_some(), "http scans must be proxied");
        Ok(rows(3))
    });

    let config = ScannerConfig {
        preferred_source: ScanSource::Http,
        ..fast_config()
    };
    let scanner = LobbyScanner::new(config, Arc::clone(&pool)).with_http_source(http);

    let stats = scanner.run_batch(10);
    assert_eq!(stats.by_proxy["http://p1"], (5, 0));
    assert_eq!(stats.by_proxy["http://p2"], (5, 0));
    assert_eq!(pool.stats().successful_requests, 10);
}

#[test]
fn test_http_scan_without_proxies_still_runs() {
    let config = ScannerConfig {
        preferred_source: ScanSource::Http,
        ..fast_config()
    };
    let scanner = LobbyScanner::new(config, Arc::new(ProxyPool::new(PoolConfig::default())))
        .with_http_source(Arc::new(|proxy| {
            assert!(proxy.is_none());
            Ok(rows(1))
        }));

    let (_, metric) = scanner.scan(false);
    assert!(metric.success);
    assert!(metric.proxy.is_none());
}

// ============================================================================
// Throttling
// ============================================================================

#[test]
fn test_batch_skips_delay_only_on_first_scan() {
    let config = ScannerConfig {
        base_delay: Duration::from_millis(40),
        max_delay: Duration::from_millis(40),
        jitter_frac: 0.0,
        backoff_mult: 1.0,
        ..ScannerConfig::default()
    };
    let scanner = LobbyScanner::new(config, Arc::new(ProxyPool::new(PoolConfig::default())))
        .with_ocr_source(Arc::new(|_| Ok(rows(1))));

    let start = std::time::Instant::now();
    scanner.run_batch(4);
    let elapsed = start.elapsed();

    // 3 throttled scans out of 4: at least 120ms, well under 4 delays
    assert!(elapsed >= Duration::from_millis(120), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(400), "elapsed {elapsed:?}");
}

#[test]
fn test_concurrent_scans_keep_stats_consistent() {
    const THREADS: usize = 8;
    const SCANS: usize = 50;

    let scanner = Arc::new(
        LobbyScanner::new(fast_config(), Arc::new(ProxyPool::new(PoolConfig::default())))
            .with_ocr_source(Arc::new(|_| Ok(rows(2)))),
    );

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let scanner = Arc::clone(&scanner);
            thread::spawn(move || {
                for _ in 0..SCANS {
                    scanner.scan(false);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = scanner.stats();
    assert_eq!(stats.total_scans, (THREADS * SCANS) as u64);
    assert_eq!(stats.total_tables, (THREADS * SCANS * 2) as u64);
    assert_eq!(stats.failed, 0);
}
