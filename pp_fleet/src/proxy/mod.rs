//! Rotating proxy pool with per-entry health and cooldown tracking.
//!
//! The pool owns its entries exclusively; callers receive cloned snapshots
//! from [`ProxyPool::next_proxy`] and report outcomes back by URL. Failing
//! entries are parked in a timed cooldown rather than removed, so transient
//! upstream trouble heals without operator intervention.

/// Proxy entry, status, and pool configuration models.
pub mod models;

/// Error types for proxy pool operations.
pub mod errors;

/// The rotating pool itself, including rate limiting and health checks.
pub mod pool;

/// Sticky or round-robin bot-to-proxy assignment on top of the pool.
pub mod assigner;

pub use assigner::BotProxyAssigner;
pub use errors::{ProxyError, ProxyResult};
pub use models::{PoolConfig, PoolStats, ProxyEntry, ProxyProtocol, ProxyStatus, RotationMode};
pub use pool::{HealthProbe, ProxyPool};
