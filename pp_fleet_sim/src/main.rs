//! Fleet simulator: fake bots and scan sources driving the pp_fleet core.
//!
//! Spawns a fleet of simulated bot threads reporting into a shared
//! monitor, runs a lobby scan batch through flaky fake sources, and prints
//! the resulting statistics as JSON.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::Error;
use ctrlc::set_handler;
use log::info;
use pp_fleet::{
    monitor::{BotMonitor, MonitorConfig, RestartStrategy},
    proxy::{PoolConfig, ProxyPool},
    scan::{LobbyScanner, ScanFn, ScannerConfig},
};
use rand::Rng;

const HELP: &str = "\
Simulate a poker bot fleet against the pp_fleet coordination core

USAGE:
  pp_fleet_sim [OPTIONS]

OPTIONS:
  --bots       N           Number of simulated bots       [default: env FLEET_BOTS or 8]
  --scans      N           Lobby scans to run in a batch  [default: env FLEET_SCANS or 25]
  --proxies    LIST        Comma-separated proxy URLs     [default: env FLEET_PROXIES or built-in fakes]
  --runtime    SECS        How long the bots run          [default: 10]

FLAGS:
  -h, --help               Print help information

ENVIRONMENT:
  FLEET_BOTS               Number of simulated bots
  FLEET_SCANS              Lobby scans per batch
  FLEET_PROXIES            Comma-separated proxy URLs
  RUST_LOG                 Log filter (e.g. info, pp_fleet=debug)
";

struct Args {
    bots: usize,
    scans: usize,
    proxies: String,
    runtime: Duration,
}

/// A fake lobby row; the scanner only ever counts these.
#[derive(Debug, Clone)]
#[allow(dead_code)]
struct TableRow {
    name: String,
    seats: u8,
}

fn main() -> Result<(), Error> {
    let mut pargs = pico_args::Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let args = Args {
        bots: pargs.value_from_str("--bots").unwrap_or_else(|_| {
            std::env::var("FLEET_BOTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8)
        }),
        scans: pargs.value_from_str("--scans").unwrap_or_else(|_| {
            std::env::var("FLEET_SCANS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(25)
        }),
        proxies: pargs.value_from_str("--proxies").unwrap_or_else(|_| {
            std::env::var("FLEET_PROXIES").unwrap_or_else(|_| {
                "http://10.0.0.1:8080,http://10.0.0.2:8080,socks5://10.0.0.3:1080".to_string()
            })
        }),
        runtime: Duration::from_secs(pargs.value_from_str("--runtime").unwrap_or(10)),
    };

    // Catching signals for exit.
    set_handler(|| std::process::exit(0))?;

    env_logger::builder().format_target(false).init();
    info!(
        "starting fleet sim: {} bots, {} scans, runtime {:?}",
        args.bots, args.scans, args.runtime
    );

    let pool = Arc::new(ProxyPool::from_delimited(
        &args.proxies,
        ',',
        PoolConfig {
            max_failures: 3,
            cooldown: Duration::from_secs(5),
            rate_limit_per_proxy: 10,
            ..PoolConfig::default()
        },
    )?);
    info!("proxy pool loaded with {} proxies", pool.len());

    let monitor = Arc::new(BotMonitor::new(MonitorConfig {
        heartbeat_timeout: Duration::from_secs(2),
        check_interval: Duration::from_millis(500),
        restart_strategy: RestartStrategy::Backoff,
        backoff_base: Duration::from_millis(500),
        backoff_max: Duration::from_secs(5),
        max_restarts: 5,
        ..MonitorConfig::default()
    }));
    monitor.on_alert(|alert| {
        info!("ALERT [{}] {}: {}", alert.level, alert.bot_id, alert.message);
    });

    for i in 0..args.bots {
        let bot_id = format!("sim-bot-{i}");
        let restart_id = bot_id.clone();
        monitor.register(
            &bot_id,
            Some(Arc::new(move || {
                info!("restarting {restart_id}");
                Ok(())
            })),
        );
    }
    monitor.start();

    // Simulated bot workers: heartbeat, occasionally error, occasionally
    // go silent long enough to be declared dead.
    let running = Arc::new(AtomicBool::new(true));
    let workers: Vec<_> = (0..args.bots)
        .map(|i| {
            let monitor = Arc::clone(&monitor);
            let running = Arc::clone(&running);
            thread::spawn(move || {
                let bot_id = format!("sim-bot-{i}");
                while running.load(Ordering::Relaxed) {
                    let roll: f64 = rand::rng().random_range(0.0..1.0);
                    if roll < 0.05 {
                        monitor.report_error(&bot_id, "simulated table read failure");
                    } else if roll < 0.08 {
                        // Go dark for a while; the monitor should revive us
                        thread::sleep(Duration::from_secs(3));
                    } else {
                        monitor.heartbeat(&bot_id);
                    }
                    thread::sleep(Duration::from_millis(200));
                }
            })
        })
        .collect();

    // Fake scan sources: OCR is flaky, HTTP succeeds through a proxy.
    let ocr: ScanFn<TableRow> = Arc::new(|_| {
        if rand::rng().random_range(0.0..1.0) < 0.4 {
            Err("ocr capture failed".to_string())
        } else {
            Ok(fake_tables(rand::rng().random_range(3..12)))
        }
    });
    let http: ScanFn<TableRow> = Arc::new(|proxy| {
        log::debug!("lobby fetch via {proxy:?}");
        Ok(fake_tables(rand::rng().random_range(5..15)))
    });

    let scanner = LobbyScanner::new(
        ScannerConfig {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            circuit_failure_threshold: 2,
            circuit_recovery_timeout: Duration::from_secs(3),
            ..ScannerConfig::default()
        },
        Arc::clone(&pool),
    )
    .with_ocr_source(ocr)
    .with_http_source(http);

    let scan_stats = scanner.run_batch_with(args.scans, |i, metric| {
        info!(
            "scan {i}: source={} success={} tables={} proxy={:?}",
            metric.source, metric.success, metric.tables_found, metric.proxy
        );
    });

    thread::sleep(args.runtime);
    running.store(false, Ordering::Relaxed);
    for worker in workers {
        let _ = worker.join();
    }
    monitor.stop();

    println!("{}", serde_json::to_string_pretty(&scan_stats)?);
    println!("{}", serde_json::to_string_pretty(&monitor.get_stats())?);
    println!("{}", serde_json::to_string_pretty(&pool.stats())?);
    Ok(())
}

fn fake_tables(n: usize) -> Vec<TableRow> {
    (0..n)
        .map(|i| TableRow {
            name: format!("Holdem {i}"),
            seats: 6,
        })
        .collect()
}
