//! Rate-limit-safe lobby scanning.
//!
//! The scanner composes an adaptive delay, one circuit breaker per scan
//! source, and a proxy pool to keep a table-discovery loop running without
//! tripping upstream rate limits. The actual scan I/O lives in caller
//! supplied functions; the scanner only schedules, routes, and records.

/// Scan attempt records and batch statistics.
pub mod models;

/// The scan orchestrator.
pub mod orchestrator;

pub use models::{ScanMetric, ScanSource, ScanStats};
pub use orchestrator::{LobbyScanner, ScanFn, ScannerConfig};
