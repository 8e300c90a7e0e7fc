//! Fleet health monitor with heartbeat tracking and auto-restart.

use super::models::{
    Alert, AlertLevel, BotHealth, BotHealthSnapshot, BotStatus, MonitorConfig, MonitorStats,
    RestartFn, RestartStrategy,
};
use std::{
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Condvar, Mutex},
    thread::JoinHandle,
    time::{Duration, Instant},
};

type AlertSink = Box<dyn Fn(&Alert) + Send>;

struct MonitorShared {
    config: MonitorConfig,
    bots: Mutex<HashMap<String, BotHealth>>,
    alert_log: Mutex<Vec<Alert>>,
    sinks: Mutex<Vec<AlertSink>>,
    stop: Mutex<bool>,
    stop_cv: Condvar,
}

/// Fleet health tracker and auto-restart controller.
///
/// Many worker threads report into one monitor; every public method takes
/// the bot map lock only for bookkeeping and never holds it across a
/// restart callback or an alert sink, so one slow bot cannot stall the
/// fleet.
///
/// Telemetry calls for unknown bot ids are silently ignored, matching
/// their fire-and-forget nature.
pub struct BotMonitor {
    shared: Arc<MonitorShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BotMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            shared: Arc::new(MonitorShared {
                config,
                bots: Mutex::new(HashMap::new()),
                alert_log: Mutex::new(Vec::new()),
                sinks: Mutex::new(Vec::new()),
                stop: Mutex::new(false),
                stop_cv: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Monitor configuration.
    pub fn config(&self) -> &MonitorConfig {
        &self.shared.config
    }

    /// Register a bot. Idempotent: re-registering an existing id is a
    /// no-op and preserves its health record.
    ///
    /// # Arguments
    ///
    /// * `bot_id` - Logical bot id chosen by the caller
    /// * `restart_fn` - Optional restart callback; absent means restarts
    ///   are treated as succeeding
    pub fn register(&self, bot_id: &str, restart_fn: Option<RestartFn>) {
        let mut bots = self.shared.bots.lock().unwrap();
        if bots.contains_key(bot_id) {
            return;
        }
        log::info!("registered bot {bot_id}");
        bots.insert(bot_id.to_string(), BotHealth::new(bot_id, restart_fn));
    }

    /// Remove a bot and its health record. Returns whether it existed.
    pub fn unregister(&self, bot_id: &str) -> bool {
        let removed = self.shared.bots.lock().unwrap().remove(bot_id).is_some();
        if removed {
            log::info!("unregistered bot {bot_id}");
        }
        removed
    }

    /// Record a liveness heartbeat.
    ///
    /// A heartbeat from a degraded bot clears its error streak and
    /// restores it to healthy.
    pub fn heartbeat(&self, bot_id: &str) {
        let mut bots = self.shared.bots.lock().unwrap();
        let Some(bot) = bots.get_mut(bot_id) else {
            return;
        };
        bot.last_heartbeat = Instant::now();
        if bot.status == BotStatus::Degraded {
            bot.consecutive_errors = 0;
            bot.status = BotStatus::Healthy;
        }
    }

    /// Record an error from a bot. An erroring bot is still alive, so the
    /// heartbeat is stamped too. Crossing the error threshold flags the
    /// bot degraded and emits a warning alert once per transition.
    pub fn report_error(&self, bot_id: &str, message: &str) {
        let alert = {
            let mut bots = self.shared.bots.lock().unwrap();
            let Some(bot) = bots.get_mut(bot_id) else {
                return;
            };
            bot.error_count += 1;
            bot.consecutive_errors += 1;
            bot.last_error = Some(message.to_string());
            bot.last_heartbeat = Instant::now();

            if bot.consecutive_errors >= self.shared.config.degraded_error_threshold
                && bot.status == BotStatus::Healthy
            {
                bot.status = BotStatus::Degraded;
                Some(Alert::new(
                    AlertLevel::Warning,
                    bot_id,
                    format!(
                        "bot degraded after {} consecutive errors: {message}",
                        bot.consecutive_errors
                    ),
                ))
            } else {
                None
            }
        };
        if let Some(alert) = alert {
            self.shared.emit(alert);
        }
    }

    /// Record a successful operation: clears the error streak, stamps the
    /// heartbeat, and demotes degraded back to healthy.
    pub fn report_success(&self, bot_id: &str) {
        let mut bots = self.shared.bots.lock().unwrap();
        let Some(bot) = bots.get_mut(bot_id) else {
            return;
        };
        bot.consecutive_errors = 0;
        bot.last_heartbeat = Instant::now();
        if bot.status == BotStatus::Degraded {
            bot.status = BotStatus::Healthy;
        }
    }

    /// Run one monitoring pass: declare silent bots dead and restart dead
    /// bots whose policy allows it. Returns the ids restarts were
    /// attempted for.
    pub fn check_all(&self) -> Vec<String> {
        self.shared.check_all()
    }

    /// Restore a stopped or dead bot to healthy with counters zeroed.
    pub fn reset_bot(&self, bot_id: &str) {
        let mut bots = self.shared.bots.lock().unwrap();
        let Some(bot) = bots.get_mut(bot_id) else {
            return;
        };
        bot.status = BotStatus::Healthy;
        bot.error_count = 0;
        bot.consecutive_errors = 0;
        bot.restart_count = 0;
        bot.last_restart = None;
        bot.last_error = None;
        bot.last_heartbeat = Instant::now();
        log::info!("bot {bot_id} reset");
    }

    /// Register an alert sink. Every alert is appended to the internal log
    /// and broadcast to all sinks; a panicking sink is contained so it
    /// cannot break monitoring.
    pub fn on_alert<F>(&self, sink: F)
    where
        F: Fn(&Alert) + Send + 'static,
    {
        self.shared.sinks.lock().unwrap().push(Box::new(sink));
    }

    /// Copy of the alert log.
    pub fn alert_log(&self) -> Vec<Alert> {
        self.shared.alert_log.lock().unwrap().clone()
    }

    /// Snapshot of one bot's health.
    pub fn get(&self, bot_id: &str) -> Option<BotHealthSnapshot> {
        self.shared
            .bots
            .lock()
            .unwrap()
            .get(bot_id)
            .map(BotHealth::snapshot)
    }

    /// Snapshots of every bot in the fleet.
    pub fn bots(&self) -> Vec<BotHealthSnapshot> {
        self.shared
            .bots
            .lock()
            .unwrap()
            .values()
            .map(BotHealth::snapshot)
            .collect()
    }

    /// Aggregate fleet statistics.
    pub fn get_stats(&self) -> MonitorStats {
        let bots = self.shared.bots.lock().unwrap();
        let mut stats = MonitorStats {
            total_bots: bots.len(),
            ..MonitorStats::default()
        };
        let mut uptime_sum = 0.0;
        for bot in bots.values() {
            match bot.status {
                BotStatus::Healthy => stats.healthy += 1,
                BotStatus::Degraded => stats.degraded += 1,
                BotStatus::Dead => stats.dead += 1,
                BotStatus::Restarting => stats.restarting += 1,
                BotStatus::Stopped => stats.stopped += 1,
            }
            stats.total_restarts += bot.restart_count as u64;
            stats.total_errors += bot.error_count;
            uptime_sum += bot.start_time.elapsed().as_secs_f64();
        }
        if stats.total_bots > 0 {
            stats.avg_uptime_secs = uptime_sum / stats.total_bots as f64;
            stats.fleet_health = (stats.healthy + stats.degraded) as f64 / stats.total_bots as f64;
        } else {
            stats.fleet_health = 1.0;
        }
        stats
    }

    /// Start the background check loop on its own thread. No-op if already
    /// running. A panic inside a pass is logged and swallowed so the loop
    /// never dies.
    pub fn start(&self) {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_some() {
            return;
        }
        *self.shared.stop.lock().unwrap() = false;

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("bot-monitor".to_string())
            .spawn(move || {
                let interval = shared.config.check_interval;
                let mut stop = shared.stop.lock().unwrap();
                while !*stop {
                    let (guard, _) = shared.stop_cv.wait_timeout(stop, interval).unwrap();
                    stop = guard;
                    if *stop {
                        break;
                    }
                    drop(stop);
                    if catch_unwind(AssertUnwindSafe(|| shared.check_all())).is_err() {
                        log::error!("monitor check pass panicked");
                    }
                    stop = shared.stop.lock().unwrap();
                }
            })
            .expect("failed to spawn bot monitor");
        *worker = Some(handle);
        log::info!("bot monitor started");
    }

    /// Stop the background loop and join it. Synchronous: the condvar is
    /// signalled first so the worker wakes immediately.
    pub fn stop(&self) {
        *self.shared.stop.lock().unwrap() = true;
        self.shared.stop_cv.notify_all();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
            log::info!("bot monitor stopped");
        }
    }
}

impl Drop for BotMonitor {
    fn drop(&mut self) {
        if self.worker.lock().unwrap().is_some() {
            self.stop();
        }
    }
}

impl MonitorShared {
    /// Append to the log and fan out to sinks. Never called with the bot
    /// map lock held.
    fn emit(&self, alert: Alert) {
        match alert.level {
            AlertLevel::Info => log::info!("[{}] {}", alert.bot_id, alert.message),
            AlertLevel::Warning => log::warn!("[{}] {}", alert.bot_id, alert.message),
            AlertLevel::Critical => log::error!("[{}] {}", alert.bot_id, alert.message),
        }
        self.alert_log.lock().unwrap().push(alert.clone());

        let sinks = self.sinks.lock().unwrap();
        for sink in sinks.iter() {
            if catch_unwind(AssertUnwindSafe(|| sink(&alert))).is_err() {
                log::warn!("alert sink panicked, alert dropped for that sink");
            }
        }
    }

    fn check_all(&self) -> Vec<String> {
        let mut alerts = Vec::new();
        let mut candidates: Vec<(String, Option<RestartFn>, u32)> = Vec::new();
        {
            let mut bots = self.bots.lock().unwrap();
            let now = Instant::now();

            for bot in bots.values_mut() {
                if bot.status == BotStatus::Stopped {
                    continue;
                }
                bot.last_check = now;
                if matches!(bot.status, BotStatus::Healthy | BotStatus::Degraded)
                    && bot.last_heartbeat.elapsed() > self.config.heartbeat_timeout
                {
                    bot.status = BotStatus::Dead;
                    alerts.push(Alert::new(
                        AlertLevel::Critical,
                        &bot.bot_id,
                        format!(
                            "bot declared dead, no heartbeat for {:.1}s",
                            bot.last_heartbeat.elapsed().as_secs_f64()
                        ),
                    ));
                }
            }

            if self.config.auto_restart {
                for bot in bots.values_mut() {
                    if bot.status != BotStatus::Dead {
                        continue;
                    }
                    match self.should_restart(bot) {
                        RestartDecision::Restart => {
                            bot.status = BotStatus::Restarting;
                            bot.restart_count += 1;
                            bot.last_restart = Some(Instant::now());
                            candidates.push((
                                bot.bot_id.clone(),
                                bot.restart_fn.clone(),
                                bot.restart_count,
                            ));
                        }
                        RestartDecision::Wait => {}
                        RestartDecision::BudgetExhausted => {
                            alerts.push(Alert::new(
                                AlertLevel::Critical,
                                &bot.bot_id,
                                format!(
                                    "restart budget exhausted after {} restarts, bot stopped",
                                    bot.restart_count
                                ),
                            ));
                        }
                    }
                }
            }
        }

        for alert in alerts {
            self.emit(alert);
        }

        let mut restarted = Vec::new();
        for (bot_id, restart_fn, attempt) in candidates {
            let result = match restart_fn {
                Some(f) => catch_unwind(AssertUnwindSafe(|| f()))
                    .unwrap_or_else(|_| Err("restart callback panicked".to_string())),
                None => Ok(()),
            };

            {
                let mut bots = self.bots.lock().unwrap();
                if let Some(bot) = bots.get_mut(&bot_id) {
                    match &result {
                        Ok(()) => {
                            let now = Instant::now();
                            bot.status = BotStatus::Healthy;
                            bot.error_count = 0;
                            bot.consecutive_errors = 0;
                            bot.start_time = now;
                            bot.last_heartbeat = now;
                        }
                        // Left dead for the next pass to retry
                        Err(_) => bot.status = BotStatus::Dead,
                    }
                }
            }

            match result {
                Ok(()) => self.emit(Alert::new(
                    AlertLevel::Info,
                    &bot_id,
                    format!("bot restarted (attempt {attempt})"),
                )),
                Err(reason) => self.emit(Alert::new(
                    AlertLevel::Critical,
                    &bot_id,
                    format!("restart attempt {attempt} failed: {reason}"),
                )),
            }
            restarted.push(bot_id);
        }
        restarted
    }

    /// Evaluate the restart policy for a dead bot. May transition the bot
    /// to stopped when the budget is exhausted.
    fn should_restart(&self, bot: &mut BotHealth) -> RestartDecision {
        let cfg = &self.config;

        if cfg.max_restarts > 0 && bot.restart_count >= cfg.max_restarts {
            bot.status = BotStatus::Stopped;
            return RestartDecision::BudgetExhausted;
        }

        let gate = match cfg.restart_strategy {
            RestartStrategy::Immediate => cfg.restart_cooldown,
            RestartStrategy::Backoff => {
                let backed_off = cfg.backoff_base.as_secs_f64()
                    * cfg.backoff_multiplier.powi(bot.restart_count as i32);
                Duration::from_secs_f64(backed_off.min(cfg.backoff_max.as_secs_f64()))
            }
            RestartStrategy::CircuitBreaker => {
                if cfg.max_restarts > 0 && bot.restart_count >= cfg.max_restarts {
                    return RestartDecision::Wait;
                }
                cfg.restart_cooldown
            }
        };

        let ready = bot.last_restart.is_none_or(|t| t.elapsed() >= gate);
        if ready {
            RestartDecision::Restart
        } else {
            RestartDecision::Wait
        }
    }
}

enum RestartDecision {
    Restart,
    Wait,
    BudgetExhausted,
}
