//! Bot health models, monitor configuration, and alerts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

/// Restart callback supplied by the caller when registering a bot.
///
/// `Ok(())` means the bot came back; `Err(reason)` is treated as a failed
/// restart attempt. An absent callback is treated as always succeeding.
pub type RestartFn = Arc<dyn Fn() -> Result<(), String> + Send + Sync>;

/// Bot lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    /// Heartbeating normally
    Healthy,
    /// Alive but erroring past the threshold
    Degraded,
    /// Heartbeat timed out
    Dead,
    /// Restart attempt in flight
    Restarting,
    /// Restart budget exhausted, left alone until reset
    Stopped,
}

impl std::fmt::Display for BotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BotStatus::Healthy => write!(f, "healthy"),
            BotStatus::Degraded => write!(f, "degraded"),
            BotStatus::Dead => write!(f, "dead"),
            BotStatus::Restarting => write!(f, "restarting"),
            BotStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Restart gating strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartStrategy {
    /// Fixed cooldown between restarts
    Immediate,
    /// Exponential backoff keyed on cumulative restart count
    Backoff,
    /// Cooldown gate plus a hard cap on total restarts
    CircuitBreaker,
}

impl std::fmt::Display for RestartStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartStrategy::Immediate => write!(f, "immediate"),
            RestartStrategy::Backoff => write!(f, "backoff"),
            RestartStrategy::CircuitBreaker => write!(f, "circuit_breaker"),
        }
    }
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertLevel::Info => write!(f, "info"),
            AlertLevel::Warning => write!(f, "warning"),
            AlertLevel::Critical => write!(f, "critical"),
        }
    }
}

/// A monitor alert, broadcast to every registered sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub bot_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(level: AlertLevel, bot_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            bot_id: bot_id.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Heartbeat silence after which a bot is declared dead
    pub heartbeat_timeout: Duration,

    /// Consecutive errors before a bot is flagged degraded
    pub degraded_error_threshold: u32,

    /// Interval for the background check loop
    pub check_interval: Duration,

    /// Max restarts before a bot is stopped (0 = unlimited)
    pub max_restarts: u32,

    /// Minimum gap between restarts for the immediate strategy
    pub restart_cooldown: Duration,

    /// Base delay for the backoff strategy
    pub backoff_base: Duration,

    /// Cap on the backoff delay
    pub backoff_max: Duration,

    /// Backoff multiplier per restart
    pub backoff_multiplier: f64,

    /// Restart gating strategy
    pub restart_strategy: RestartStrategy,

    /// Whether `check_all` restarts dead bots at all
    pub auto_restart: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(60),
            degraded_error_threshold: 3,
            check_interval: Duration::from_secs(10),
            max_restarts: 5,
            restart_cooldown: Duration::from_secs(30),
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            restart_strategy: RestartStrategy::Backoff,
            auto_restart: true,
        }
    }
}

/// Per-bot health record owned by the monitor.
pub(crate) struct BotHealth {
    pub bot_id: String,
    pub status: BotStatus,
    pub last_heartbeat: Instant,
    pub last_check: Instant,
    pub start_time: Instant,
    pub error_count: u64,
    pub consecutive_errors: u32,
    pub restart_count: u32,
    pub last_restart: Option<Instant>,
    pub last_error: Option<String>,
    pub restart_fn: Option<RestartFn>,
}

impl BotHealth {
    pub fn new(bot_id: impl Into<String>, restart_fn: Option<RestartFn>) -> Self {
        let now = Instant::now();
        Self {
            bot_id: bot_id.into(),
            status: BotStatus::Healthy,
            last_heartbeat: now,
            last_check: now,
            start_time: now,
            error_count: 0,
            consecutive_errors: 0,
            restart_count: 0,
            last_restart: None,
            last_error: None,
            restart_fn,
        }
    }

    pub fn snapshot(&self) -> BotHealthSnapshot {
        BotHealthSnapshot {
            bot_id: self.bot_id.clone(),
            status: self.status,
            uptime_secs: self.start_time.elapsed().as_secs_f64(),
            time_since_heartbeat_secs: self.last_heartbeat.elapsed().as_secs_f64(),
            error_count: self.error_count,
            consecutive_errors: self.consecutive_errors,
            restart_count: self.restart_count,
            last_error: self.last_error.clone(),
        }
    }
}

/// Caller-facing copy of one bot's health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotHealthSnapshot {
    pub bot_id: String,
    pub status: BotStatus,
    pub uptime_secs: f64,
    pub time_since_heartbeat_secs: f64,
    pub error_count: u64,
    pub consecutive_errors: u32,
    pub restart_count: u32,
    pub last_error: Option<String>,
}

/// Aggregate fleet snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorStats {
    pub total_bots: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub dead: usize,
    pub restarting: usize,
    pub stopped: usize,
    pub total_restarts: u64,
    pub total_errors: u64,
    pub avg_uptime_secs: f64,
    /// `(healthy + degraded) / total`, 1.0 for an empty fleet
    pub fleet_health: f64,
}
