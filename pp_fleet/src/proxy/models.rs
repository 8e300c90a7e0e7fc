//! Proxy entry and pool configuration models.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Smoothing factor for the per-proxy latency moving average.
pub const LATENCY_EMA_ALPHA: f64 = 0.2;

/// Proxy protocol, inferred from the URL scheme prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyProtocol {
    /// Infer the protocol from a proxy URL. Unrecognized schemes fall back
    /// to plain HTTP, matching how bare `host:port` lists are written.
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("socks5") {
            ProxyProtocol::Socks5
        } else if url.starts_with("socks4") {
            ProxyProtocol::Socks4
        } else if url.starts_with("https") {
            ProxyProtocol::Https
        } else {
            ProxyProtocol::Http
        }
    }
}

impl std::fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyProtocol::Http => write!(f, "http"),
            ProxyProtocol::Https => write!(f, "https"),
            ProxyProtocol::Socks4 => write!(f, "socks4"),
            ProxyProtocol::Socks5 => write!(f, "socks5"),
        }
    }
}

/// Proxy runtime status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyStatus {
    /// Healthy and selectable
    Active,
    /// Selectable but slow (latency over the degraded threshold)
    Degraded,
    /// Administratively removed from rotation
    Disabled,
    /// Parked after repeated failures, auto-recovers after the cooldown
    Cooldown,
}

impl std::fmt::Display for ProxyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyStatus::Active => write!(f, "active"),
            ProxyStatus::Degraded => write!(f, "degraded"),
            ProxyStatus::Disabled => write!(f, "disabled"),
            ProxyStatus::Cooldown => write!(f, "cooldown"),
        }
    }
}

/// Proxy rotation strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationMode {
    /// Cyclic over the available set in insertion order
    RoundRobin,
    /// Uniform random over the available set
    Random,
    /// Entry with the fewest total requests
    LeastUsed,
    /// Stochastic, proportional to weight x success rate x latency factor
    Weighted,
    /// Prefer entries in the configured region, else uniform random
    Geo,
}

impl std::fmt::Display for RotationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RotationMode::RoundRobin => write!(f, "round_robin"),
            RotationMode::Random => write!(f, "random"),
            RotationMode::LeastUsed => write!(f, "least_used"),
            RotationMode::Weighted => write!(f, "weighted"),
            RotationMode::Geo => write!(f, "geo"),
        }
    }
}

/// A single proxy and its runtime health bookkeeping.
///
/// Entries are owned by the pool; callers get clones and report outcomes
/// back by URL. The counter invariant
/// `successful_requests + failed_requests == total_requests` holds across
/// every mutation the pool performs.
#[derive(Debug, Clone)]
pub struct ProxyEntry {
    /// Proxy URL, the unique key within a pool
    pub url: String,

    /// Protocol inferred from the URL scheme
    pub protocol: ProxyProtocol,

    /// Optional region tag for geo rotation
    pub region: Option<String>,

    /// Relative weight for weighted rotation
    pub weight: f64,

    /// Current status
    pub status: ProxyStatus,

    /// Total requests routed through this proxy
    pub total_requests: u64,

    /// Requests reported as successful
    pub successful_requests: u64,

    /// Requests reported as failed
    pub failed_requests: u64,

    /// Failures since the last success
    pub consecutive_failures: u32,

    /// Exponential moving average latency in milliseconds
    pub avg_latency_ms: Option<f64>,

    /// Last time this entry was handed out
    pub last_used: Option<Instant>,

    /// Last reported success
    pub last_success: Option<Instant>,

    /// Last reported failure
    pub last_failure: Option<Instant>,

    /// When the entry entered cooldown
    pub disabled_at: Option<Instant>,
}

impl ProxyEntry {
    pub fn new(url: impl Into<String>, region: Option<String>, weight: Option<f64>) -> Self {
        let url = url.into();
        let protocol = ProxyProtocol::from_url(&url);
        Self {
            url,
            protocol,
            region,
            weight: weight.unwrap_or(1.0),
            status: ProxyStatus::Active,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            consecutive_failures: 0,
            avg_latency_ms: None,
            last_used: None,
            last_success: None,
            last_failure: None,
            disabled_at: None,
        }
    }

    /// Fraction of requests reported successful. A fresh entry with no
    /// traffic counts as fully successful so weighted rotation gives it a
    /// fair first chance.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }

    /// Fold a latency sample into the moving average.
    pub(crate) fn record_latency(&mut self, latency_ms: f64) {
        self.avg_latency_ms = Some(match self.avg_latency_ms {
            Some(avg) => avg * (1.0 - LATENCY_EMA_ALPHA) + latency_ms * LATENCY_EMA_ALPHA,
            None => latency_ms,
        });
    }
}

/// Pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Rotation strategy used by `next_proxy`
    pub rotation: RotationMode,

    /// Consecutive failures before an entry is parked in cooldown
    pub max_failures: u32,

    /// How long a parked entry stays out of rotation
    pub cooldown: Duration,

    /// Latency above which a healthy entry is flagged degraded
    pub degraded_latency_ms: f64,

    /// URL fetched through each proxy by the health checker
    pub health_check_url: String,

    /// Per-probe timeout for health checks
    pub health_check_timeout: Duration,

    /// Interval between background health check sweeps
    pub health_check_interval: Duration,

    /// Max requests per proxy within a sliding one-second window
    /// (0 = unlimited)
    pub rate_limit_per_proxy: u32,

    /// Region preferred by geo rotation
    pub preferred_region: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            rotation: RotationMode::RoundRobin,
            max_failures: 3,
            cooldown: Duration::from_secs(300),
            degraded_latency_ms: 5_000.0,
            health_check_url: "https://www.google.com".to_string(),
            health_check_timeout: Duration::from_secs(10),
            health_check_interval: Duration::from_secs(60),
            rate_limit_per_proxy: 0,
            preferred_region: None,
        }
    }
}

/// Aggregate pool snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolStats {
    pub total_proxies: usize,
    pub active: usize,
    pub degraded: usize,
    pub disabled: usize,
    pub cooldown: usize,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
}

impl PoolStats {
    /// Pool-wide success rate, 1.0 when no traffic has been recorded.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }
}
