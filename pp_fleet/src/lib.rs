//! # PP Fleet
//!
//! Coordination primitives for running many concurrent poker bots against
//! shared, rate-limited resources.
//!
//! The library is built around one recurring shape: a thread-safe resource
//! pool with per-entry health tracking, a rotation or escalation policy, and
//! failure-driven state transitions (cooldown, circuit breaking), optionally
//! fed by a periodic background control loop.
//!
//! ## Core Modules
//!
//! - [`throttle`]: adaptive backoff delays and circuit breakers
//! - [`proxy`]: rotating proxy pool with health checks and sticky bot
//!   assignment
//! - [`monitor`]: fleet health tracking with auto-restart policies
//! - [`scan`]: rate-limit-safe lobby scan orchestration
//!
//! The library performs no I/O of its own beyond optional proxy health
//! probes; callers supply scan and restart functions and consume results
//! through snapshots and stats.
//!
//! ## Example
//!
//! ```
//! use pp_fleet::proxy::{PoolConfig, ProxyPool};
//!
//! let pool = ProxyPool::new(PoolConfig::default());
//! pool.add_proxy("http://10.0.0.1:8080", None, None).unwrap();
//! let entry = pool.next_proxy().expect("one proxy is available");
//! assert_eq!(entry.url, "http://10.0.0.1:8080");
//! ```

/// Backoff delays and circuit breakers for rate-limit avoidance.
pub mod throttle;
pub use throttle::{AdaptiveDelay, CircuitBreaker, CircuitState};

/// Rotating proxy pool with health tracking and sticky bot assignment.
pub mod proxy;
pub use proxy::{
    BotProxyAssigner, PoolConfig, ProxyEntry, ProxyPool, ProxyStatus, RotationMode,
};

/// Fleet health monitoring and auto-restart.
pub mod monitor;
pub use monitor::{Alert, AlertLevel, BotMonitor, BotStatus, MonitorConfig, RestartStrategy};

/// Rate-limit-safe lobby scan orchestration.
pub mod scan;
pub use scan::{LobbyScanner, ScanMetric, ScanSource, ScanStats, ScannerConfig};
