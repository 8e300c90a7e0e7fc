//! Fleet monitor integration tests.
//!
//! Drives a monitor the way a fleet of worker threads would: concurrent
//! heartbeats, death and restart cycles, and alert delivery.

use pp_fleet::monitor::{
    AlertLevel, BotMonitor, BotStatus, MonitorConfig, RestartStrategy,
};
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    thread,
    time::Duration,
};

fn fast_config() -> MonitorConfig {
    MonitorConfig {
        heartbeat_timeout: Duration::from_millis(120),
        degraded_error_threshold: 3,
        check_interval: Duration::from_millis(30),
        max_restarts: 0,
        restart_cooldown: Duration::ZERO,
        restart_strategy: RestartStrategy::Immediate,
        ..MonitorConfig::default()
    }
}

// ============================================================================
// Concurrent Telemetry
// ============================================================================

#[test]
fn test_many_workers_reporting_concurrently() {
    const WORKERS: usize = 12;
    const REPORTS: usize = 100;

    let monitor = Arc::new(BotMonitor::new(fast_config()));
    for worker in 0..WORKERS {
        monitor.register(&format!("bot-{worker}"), None);
    }

    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let monitor = Arc::clone(&monitor);
            thread::spawn(move || {
                let bot_id = format!("bot-{worker}");
                for i in 0..REPORTS {
                    if i % 10 == 0 {
                        monitor.report_error(&bot_id, "transient");
                    } else {
                        monitor.report_success(&bot_id);
                    }
                    monitor.heartbeat(&bot_id);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = monitor.get_stats();
    assert_eq!(stats.total_bots, WORKERS);
    assert_eq!(stats.healthy, WORKERS);
    assert_eq!(stats.total_errors, (WORKERS * (REPORTS / 10)) as u64);
}

// ============================================================================
// Death, Restart, And Budget
// ============================================================================

#[test]
fn test_silent_bot_restarted_by_background_loop() {
    let restarts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&restarts);

    let monitor = BotMonitor::new(fast_config());
    monitor.register(
        "lobby-bot",
        Some(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })),
    );

    monitor.start();
    thread::sleep(Duration::from_millis(300));
    monitor.stop();

    assert!(restarts.load(Ordering::SeqCst) >= 1);
    assert_eq!(monitor.get("lobby-bot").unwrap().status, BotStatus::Healthy);
}

#[test]
fn test_restart_budget_respected_end_to_end() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);

    let monitor = BotMonitor::new(MonitorConfig {
        max_restarts: 3,
        ..fast_config()
    });
    monitor.register(
        "doomed-bot",
        Some(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err("binary missing".to_string())
        })),
    );

    for _ in 0..8 {
        thread::sleep(Duration::from_millis(140));
        monitor.check_all();
    }

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(monitor.get("doomed-bot").unwrap().status, BotStatus::Stopped);

    // Never revisited once stopped
    thread::sleep(Duration::from_millis(140));
    assert!(monitor.check_all().is_empty());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[test]
fn test_restarted_bot_stays_healthy_while_heartbeating() {
    let monitor = BotMonitor::new(fast_config());
    monitor.register("bot-1", Some(Arc::new(|| Ok(()))));

    thread::sleep(Duration::from_millis(150));
    assert_eq!(monitor.check_all(), vec!["bot-1".to_string()]);

    // Fresh heartbeats keep it alive through the next passes
    for _ in 0..3 {
        monitor.heartbeat("bot-1");
        assert!(monitor.check_all().is_empty());
    }
    assert_eq!(monitor.get("bot-1").unwrap().restart_count, 1);
}

// ============================================================================
// Alert Delivery
// ============================================================================

#[test]
fn test_alert_levels_across_a_bot_lifecycle() {
    let seen: Arc<Mutex<Vec<AlertLevel>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = Arc::clone(&seen);

    let monitor = BotMonitor::new(fast_config());
    monitor.on_alert(move |alert| sink_seen.lock().unwrap().push(alert.level));
    monitor.register("bot-1", Some(Arc::new(|| Ok(()))));

    // Degrade via errors (threshold 3): one warning
    monitor.report_error("bot-1", "e1");
    monitor.report_error("bot-1", "e2");
    monitor.report_error("bot-1", "e3");

    // Die and restart: one critical, one info
    thread::sleep(Duration::from_millis(150));
    monitor.check_all();

    let levels = seen.lock().unwrap().clone();
    assert_eq!(
        levels,
        vec![AlertLevel::Warning, AlertLevel::Critical, AlertLevel::Info]
    );
    assert_eq!(monitor.alert_log().len(), 3);
}
