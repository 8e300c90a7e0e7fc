//! Scan attempt records and running batch statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where a lobby snapshot came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanSource {
    /// Screen-capture reader; runs locally, no proxy involved
    Ocr,
    /// Lobby HTTP endpoint; routed through the proxy pool
    Http,
}

impl ScanSource {
    /// The failover alternative to this source.
    pub fn other(self) -> Self {
        match self {
            ScanSource::Ocr => ScanSource::Http,
            ScanSource::Http => ScanSource::Ocr,
        }
    }
}

impl std::fmt::Display for ScanSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanSource::Ocr => write!(f, "ocr"),
            ScanSource::Http => write!(f, "http"),
        }
    }
}

/// Immutable record of one scan attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanMetric {
    pub source: ScanSource,
    pub success: bool,
    pub latency_ms: f64,
    pub tables_found: usize,
    pub error: Option<String>,
    pub proxy: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Running aggregate over one scan session.
///
/// Mutated incrementally by [`ScanStats::record`]; reset at the start of
/// every batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanStats {
    pub total_scans: u64,
    pub successful: u64,
    pub failed: u64,
    pub total_tables: u64,
    pub avg_latency_ms: f64,
    /// (successes, failures) per source
    pub by_source: HashMap<ScanSource, (u64, u64)>,
    /// (successes, failures) per proxy URL
    pub by_proxy: HashMap<String, (u64, u64)>,
    /// Error strings captured from failed scans
    pub errors: Vec<String>,
}

impl ScanStats {
    /// Fold one metric into the aggregate.
    pub fn record(&mut self, metric: &ScanMetric) {
        self.total_scans += 1;
        if metric.success {
            self.successful += 1;
            self.total_tables += metric.tables_found as u64;
        } else {
            self.failed += 1;
            if let Some(error) = &metric.error {
                self.errors.push(error.clone());
            }
        }

        // Rolling average over all scans so far
        let n = self.total_scans as f64;
        self.avg_latency_ms += (metric.latency_ms - self.avg_latency_ms) / n;

        let source = self.by_source.entry(metric.source).or_default();
        if metric.success {
            source.0 += 1;
        } else {
            source.1 += 1;
        }

        if let Some(proxy) = &metric.proxy {
            let proxy = self.by_proxy.entry(proxy.clone()).or_default();
            if metric.success {
                proxy.0 += 1;
            } else {
                proxy.1 += 1;
            }
        }
    }

    /// Fraction of successful scans, 1.0 before any scan has run.
    pub fn success_rate(&self) -> f64 {
        if self.total_scans == 0 {
            1.0
        } else {
            self.successful as f64 / self.total_scans as f64
        }
    }

    /// Clear the session back to zero.
    pub fn reset(&mut self) {
        *self = ScanStats::default();
    }
}
