//! Rotating proxy pool with health tracking, cooldowns, and rate limiting.

use super::{
    errors::{ProxyError, ProxyResult},
    models::{PoolConfig, PoolStats, ProxyEntry, ProxyStatus, RotationMode},
};
use rand::Rng;
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Condvar, Mutex},
    thread::JoinHandle,
    time::{Duration, Instant},
};

/// Health probe: given an entry, the target URL, and a timeout, return the
/// observed latency in milliseconds or a failure reason.
///
/// The default probe issues a blocking GET through the proxy via reqwest;
/// tests inject their own.
pub type HealthProbe = dyn Fn(&ProxyEntry, &str, Duration) -> Result<f64, String> + Send + Sync;

/// Width of the per-proxy rate limit window.
const RATE_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct PoolState {
    /// Entries in insertion order (round-robin depends on it)
    entries: Vec<ProxyEntry>,

    /// Monotonically advancing round-robin cursor
    rr_cursor: usize,

    /// Sliding-window request timestamps keyed by proxy URL
    rate_windows: HashMap<String, VecDeque<Instant>>,
}

#[derive(Debug)]
struct PoolShared {
    config: PoolConfig,
    state: Mutex<PoolState>,
    stop: Mutex<bool>,
    stop_cv: Condvar,
}

impl PoolShared {
    fn report_success(&self, url: &str, latency_ms: Option<f64>) {
        let mut state = self.state.lock().unwrap();
        let degraded_cutoff = self.config.degraded_latency_ms;
        let Some(entry) = state.entries.iter_mut().find(|e| e.url == url) else {
            log::debug!("success report for unknown proxy {url}");
            return;
        };

        entry.total_requests += 1;
        entry.successful_requests += 1;
        entry.consecutive_failures = 0;
        entry.last_success = Some(Instant::now());
        if let Some(latency) = latency_ms {
            entry.record_latency(latency);
        }

        if entry.status == ProxyStatus::Degraded
            && entry.avg_latency_ms.is_none_or(|avg| avg < degraded_cutoff)
        {
            entry.status = ProxyStatus::Active;
            log::info!("proxy {url} recovered from degraded");
        }
    }

    fn report_failure(&self, url: &str) {
        let mut state = self.state.lock().unwrap();
        let max_failures = self.config.max_failures;
        let Some(entry) = state.entries.iter_mut().find(|e| e.url == url) else {
            log::debug!("failure report for unknown proxy {url}");
            return;
        };

        entry.total_requests += 1;
        entry.failed_requests += 1;
        entry.consecutive_failures += 1;
        entry.last_failure = Some(Instant::now());

        if entry.consecutive_failures >= max_failures && entry.status != ProxyStatus::Cooldown {
            entry.status = ProxyStatus::Cooldown;
            entry.disabled_at = Some(Instant::now());
            log::warn!(
                "proxy {url} entered cooldown after {} consecutive failures",
                entry.consecutive_failures
            );
        }
    }

    /// Probe every non-disabled entry once. The state lock is released
    /// while probes run.
    fn check_all_health_with(&self, probe: &HealthProbe) -> usize {
        let snapshot: Vec<ProxyEntry> = {
            let state = self.state.lock().unwrap();
            state
                .entries
                .iter()
                .filter(|e| e.status != ProxyStatus::Disabled)
                .cloned()
                .collect()
        };

        let url = self.config.health_check_url.clone();
        let timeout = self.config.health_check_timeout;
        let degraded_cutoff = self.config.degraded_latency_ms;

        let mut healthy = 0;
        for entry in snapshot {
            match probe(&entry, &url, timeout) {
                Ok(latency_ms) => {
                    healthy += 1;
                    self.report_success(&entry.url, Some(latency_ms));
                    if latency_ms > degraded_cutoff {
                        let mut state = self.state.lock().unwrap();
                        if let Some(e) = state.entries.iter_mut().find(|e| e.url == entry.url)
                            && e.status == ProxyStatus::Active
                        {
                            e.status = ProxyStatus::Degraded;
                            log::warn!(
                                "proxy {} degraded ({latency_ms:.0}ms over {degraded_cutoff:.0}ms)",
                                entry.url
                            );
                        }
                    }
                }
                Err(reason) => {
                    log::debug!("health check failed for {}: {reason}", entry.url);
                    self.report_failure(&entry.url);
                }
            }
        }
        healthy
    }
}

/// Thread-safe rotating proxy pool.
///
/// All mutable state lives behind one pool-wide mutex. The lock is never
/// held across a health probe: `check_all_health` snapshots the entries,
/// probes without the lock, then re-acquires it to record results, so one
/// slow upstream cannot serialize every worker behind it.
pub struct ProxyPool {
    shared: Arc<PoolShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ProxyPool {
    /// Create an empty pool.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                config,
                state: Mutex::new(PoolState::default()),
                stop: Mutex::new(false),
                stop_cv: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Build a pool from a newline-delimited proxy list.
    ///
    /// Blank lines and lines starting with `#` are ignored.
    ///
    /// # Arguments
    ///
    /// * `text` - The list contents (the caller reads the file)
    /// * `config` - Pool configuration
    pub fn from_lines(text: &str, config: PoolConfig) -> ProxyResult<Self> {
        let pool = Self::new(config);
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            pool.add_proxy(line, None, None)?;
        }
        Ok(pool)
    }

    /// Build a pool from a delimiter-separated string such as an
    /// environment variable (`"http://p1,http://p2"`).
    pub fn from_delimited(text: &str, delimiter: char, config: PoolConfig) -> ProxyResult<Self> {
        let pool = Self::new(config);
        for part in text.split(delimiter) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            pool.add_proxy(part, None, None)?;
        }
        Ok(pool)
    }

    /// Pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Add a proxy to the pool. Idempotent by URL: re-adding an existing
    /// proxy is a no-op and preserves its health record.
    ///
    /// # Arguments
    ///
    /// * `url` - Proxy URL (protocol inferred from the scheme)
    /// * `region` - Optional region tag for geo rotation
    /// * `weight` - Optional weight for weighted rotation (default 1.0)
    pub fn add_proxy(
        &self,
        url: &str,
        region: Option<&str>,
        weight: Option<f64>,
    ) -> ProxyResult<()> {
        if url.trim().is_empty() {
            return Err(ProxyError::InvalidUrl(url.to_string()));
        }

        let mut state = self.shared.state.lock().unwrap();
        if state.entries.iter().any(|e| e.url == url) {
            return Ok(());
        }

        let entry = ProxyEntry::new(url, region.map(str::to_string), weight);
        log::info!("added proxy {} ({})", entry.url, entry.protocol);
        state.entries.push(entry);
        Ok(())
    }

    /// Administratively remove a proxy from rotation, keeping its health
    /// record. A disabled entry is skipped by selection and health checks
    /// and never recovers on its own; use [`ProxyPool::enable_proxy`] to
    /// bring it back. Returns whether the proxy existed.
    pub fn disable_proxy(&self, url: &str) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        let Some(entry) = state.entries.iter_mut().find(|e| e.url == url) else {
            return false;
        };
        entry.status = ProxyStatus::Disabled;
        entry.disabled_at = Some(Instant::now());
        log::info!("proxy {url} disabled");
        true
    }

    /// Return a disabled proxy to active rotation with its failure streak
    /// cleared. Returns whether the proxy existed.
    pub fn enable_proxy(&self, url: &str) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        let Some(entry) = state.entries.iter_mut().find(|e| e.url == url) else {
            return false;
        };
        entry.status = ProxyStatus::Active;
        entry.consecutive_failures = 0;
        entry.disabled_at = None;
        log::info!("proxy {url} enabled");
        true
    }

    /// Remove a proxy and its health record. Returns whether it existed.
    pub fn remove_proxy(&self, url: &str) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        let before = state.entries.len();
        state.entries.retain(|e| e.url != url);
        state.rate_windows.remove(url);
        let removed = state.entries.len() < before;
        if removed {
            log::info!("removed proxy {url}");
        }
        removed
    }

    /// Number of proxies in the pool (any status).
    pub fn len(&self) -> usize {
        self.shared.state.lock().unwrap().entries.len()
    }

    /// Whether the pool holds no proxies at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of one entry by URL.
    pub fn get(&self, url: &str) -> Option<ProxyEntry> {
        let state = self.shared.state.lock().unwrap();
        state.entries.iter().find(|e| e.url == url).cloned()
    }

    /// URLs currently selectable (active or degraded, cooldowns expired
    /// entries included after the sweep).
    pub fn available(&self) -> Vec<String> {
        let mut state = self.shared.state.lock().unwrap();
        sweep_cooldowns(&mut state, self.shared.config.cooldown);
        state
            .entries
            .iter()
            .filter(|e| is_available(e))
            .map(|e| e.url.clone())
            .collect()
    }

    /// Select the next proxy using the configured rotation mode.
    ///
    /// Returns `None` iff no entry is selectable. Expired cooldowns are
    /// swept back to active before selection.
    pub fn next_proxy(&self) -> Option<ProxyEntry> {
        self.next_proxy_with(self.shared.config.rotation)
    }

    /// Select the next proxy with an explicit rotation mode.
    pub fn next_proxy_with(&self, mode: RotationMode) -> Option<ProxyEntry> {
        let mut state = self.shared.state.lock().unwrap();
        sweep_cooldowns(&mut state, self.shared.config.cooldown);

        let available: Vec<usize> = state
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| is_available(e))
            .map(|(i, _)| i)
            .collect();
        if available.is_empty() {
            return None;
        }

        let chosen = match mode {
            RotationMode::RoundRobin => {
                let idx = available[state.rr_cursor % available.len()];
                state.rr_cursor = state.rr_cursor.wrapping_add(1);
                idx
            }
            RotationMode::Random => available[rand::rng().random_range(0..available.len())],
            RotationMode::LeastUsed => *available
                .iter()
                .min_by_key(|&&i| state.entries[i].total_requests)
                .unwrap(),
            RotationMode::Weighted => pick_weighted(&state.entries, &available),
            RotationMode::Geo => pick_geo(
                &state.entries,
                &available,
                self.shared.config.preferred_region.as_deref(),
            ),
        };

        let entry = &mut state.entries[chosen];
        entry.last_used = Some(Instant::now());
        Some(entry.clone())
    }

    /// Report a successful request through a proxy.
    ///
    /// Resets consecutive failures, folds the latency sample into the
    /// moving average, and clears a degraded flag once latency is back
    /// under the threshold. Unknown URLs are ignored.
    pub fn report_success(&self, url: &str, latency_ms: Option<f64>) {
        self.shared.report_success(url, latency_ms);
    }

    /// Report a failed request through a proxy.
    ///
    /// At `max_failures` consecutive failures the entry is parked in
    /// cooldown. Unknown URLs are ignored.
    pub fn report_failure(&self, url: &str) {
        self.shared.report_failure(url);
    }

    /// Check and record against the per-proxy sliding one-second window.
    ///
    /// Returns false (reject) when the proxy already has
    /// `rate_limit_per_proxy` requests in the window; otherwise records the
    /// attempt and returns true. A limit of 0 means unlimited.
    pub fn check_rate_limit(&self, url: &str) -> bool {
        let limit = self.shared.config.rate_limit_per_proxy;
        if limit == 0 {
            return true;
        }

        let mut state = self.shared.state.lock().unwrap();
        let now = Instant::now();
        let window = state.rate_windows.entry(url.to_string()).or_default();
        while let Some(front) = window.front()
            && now.duration_since(*front) > RATE_WINDOW
        {
            window.pop_front();
        }

        if window.len() >= limit as usize {
            false
        } else {
            window.push_back(now);
            true
        }
    }

    /// Probe every proxy once with the default HTTP probe (a GET to the
    /// configured health check URL, expecting 200). Returns the number of
    /// proxies that passed.
    pub fn check_all_health(&self) -> usize {
        self.check_all_health_with(&http_probe)
    }

    /// Probe every proxy once with a caller-supplied probe.
    ///
    /// The pool lock is not held while probes run.
    pub fn check_all_health_with(&self, probe: &HealthProbe) -> usize {
        self.shared.check_all_health_with(probe)
    }

    /// Start the background health checker on its own thread, sweeping at
    /// the configured interval. No-op if already running.
    pub fn start_health_checker(&self) {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_some() {
            return;
        }
        *self.shared.stop.lock().unwrap() = false;

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("proxy-health".to_string())
            .spawn(move || {
                let interval = shared.config.health_check_interval;
                let mut stop = shared.stop.lock().unwrap();
                while !*stop {
                    let (guard, _) = shared.stop_cv.wait_timeout(stop, interval).unwrap();
                    stop = guard;
                    if *stop {
                        break;
                    }
                    drop(stop);
                    shared.check_all_health_with(&http_probe);
                    stop = shared.stop.lock().unwrap();
                }
            })
            .expect("failed to spawn proxy health checker");
        *worker = Some(handle);
        log::info!("proxy health checker started");
    }

    /// Stop the background health checker and join it. Synchronous: the
    /// condvar is signalled first so the worker wakes immediately.
    pub fn stop(&self) {
        *self.shared.stop.lock().unwrap() = true;
        self.shared.stop_cv.notify_all();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
            log::info!("proxy health checker stopped");
        }
    }

    /// Restore every entry to active with zeroed counters, clear rate
    /// limit windows, and reset the round-robin cursor.
    pub fn reset(&self) {
        let mut state = self.shared.state.lock().unwrap();
        for entry in &mut state.entries {
            entry.status = ProxyStatus::Active;
            entry.total_requests = 0;
            entry.successful_requests = 0;
            entry.failed_requests = 0;
            entry.consecutive_failures = 0;
            entry.avg_latency_ms = None;
            entry.last_used = None;
            entry.last_success = None;
            entry.last_failure = None;
            entry.disabled_at = None;
        }
        state.rate_windows.clear();
        state.rr_cursor = 0;
    }

    /// Aggregate pool snapshot.
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock().unwrap();
        let mut stats = PoolStats {
            total_proxies: state.entries.len(),
            ..PoolStats::default()
        };
        for entry in &state.entries {
            match entry.status {
                ProxyStatus::Active => stats.active += 1,
                ProxyStatus::Degraded => stats.degraded += 1,
                ProxyStatus::Disabled => stats.disabled += 1,
                ProxyStatus::Cooldown => stats.cooldown += 1,
            }
            stats.total_requests += entry.total_requests;
            stats.successful_requests += entry.successful_requests;
            stats.failed_requests += entry.failed_requests;
        }
        stats
    }
}

impl Drop for ProxyPool {
    fn drop(&mut self) {
        // Worker holds its own Arc; make sure it exits with the pool.
        if self.worker.lock().unwrap().is_some() {
            self.stop();
        }
    }
}

/// Selectable means active or degraded; cooldown and disabled are not.
fn is_available(entry: &ProxyEntry) -> bool {
    matches!(entry.status, ProxyStatus::Active | ProxyStatus::Degraded)
}

/// Return expired cooldowns to active with their failure streak cleared.
fn sweep_cooldowns(state: &mut PoolState, cooldown: Duration) {
    for entry in &mut state.entries {
        if entry.status == ProxyStatus::Cooldown
            && let Some(disabled_at) = entry.disabled_at
            && disabled_at.elapsed() >= cooldown
        {
            entry.status = ProxyStatus::Active;
            entry.consecutive_failures = 0;
            entry.disabled_at = None;
            log::info!("proxy {} cooldown expired, back in rotation", entry.url);
        }
    }
}

/// Stochastic pick proportional to `weight * success_rate * latency_factor`,
/// each factor floored at 0.1 so no entry starves out entirely.
fn pick_weighted(entries: &[ProxyEntry], available: &[usize]) -> usize {
    let weights: Vec<f64> = available
        .iter()
        .map(|&i| {
            let e = &entries[i];
            let latency_factor = match e.avg_latency_ms {
                Some(avg) => (1.0 - avg / 10_000.0).max(0.1),
                None => 1.0,
            };
            e.weight.max(0.1) * e.success_rate().max(0.1) * latency_factor
        })
        .collect();

    let total: f64 = weights.iter().sum();
    let mut draw = rand::rng().random_range(0.0..total);
    for (pos, w) in weights.iter().enumerate() {
        draw -= w;
        if draw <= 0.0 {
            return available[pos];
        }
    }
    available[available.len() - 1]
}

/// Prefer entries in the configured region when any exist, else uniform.
fn pick_geo(entries: &[ProxyEntry], available: &[usize], region: Option<&str>) -> usize {
    if let Some(region) = region {
        let regional: Vec<usize> = available
            .iter()
            .copied()
            .filter(|&i| entries[i].region.as_deref() == Some(region))
            .collect();
        if !regional.is_empty() {
            return regional[rand::rng().random_range(0..regional.len())];
        }
    }
    available[rand::rng().random_range(0..available.len())]
}

/// Default health probe: blocking GET through the proxy, 200 = healthy.
fn http_probe(entry: &ProxyEntry, url: &str, timeout: Duration) -> Result<f64, String> {
    let proxy = reqwest::Proxy::all(&entry.url).map_err(|e| e.to_string())?;
    let client = reqwest::blocking::Client::builder()
        .proxy(proxy)
        .timeout(timeout)
        .build()
        .map_err(|e| e.to_string())?;

    let start = Instant::now();
    let response = client.get(url).send().map_err(|e| e.to_string())?;
    if response.status() == reqwest::StatusCode::OK {
        Ok(start.elapsed().as_secs_f64() * 1_000.0)
    } else {
        Err(format!("unexpected status {}", response.status()))
    }
}
