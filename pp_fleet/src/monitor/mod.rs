//! Fleet health monitoring with heartbeats and auto-restart.
//!
//! Worker processes report liveness and errors into one shared
//! [`BotMonitor`]; a periodic `check_all` pass declares silent bots dead
//! and drives restarts under a configurable budget and backoff policy.

/// Health records, configuration, and alert models.
pub mod models;

/// The monitor itself.
pub mod manager;

pub use manager::BotMonitor;
pub use models::{
    Alert, AlertLevel, BotHealthSnapshot, BotStatus, MonitorConfig, MonitorStats, RestartFn,
    RestartStrategy,
};
