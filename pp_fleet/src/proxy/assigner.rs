//! Sticky bot-to-proxy assignment on top of a shared pool.

use super::{models::ProxyEntry, pool::ProxyPool};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// Maps logical bot ids to proxy entries.
///
/// In sticky mode a bot keeps its assigned proxy for as long as the proxy
/// stays available; otherwise every call rotates through the pool. The
/// assigner holds only URLs, never entries, so health state always comes
/// from the pool.
pub struct BotProxyAssigner {
    pool: Arc<ProxyPool>,
    sticky: bool,
    assignments: Mutex<HashMap<String, String>>,
}

impl BotProxyAssigner {
    /// Create a new assigner over a shared pool.
    ///
    /// # Arguments
    ///
    /// * `pool` - The pool to draw proxies from
    /// * `sticky` - Whether bots keep their proxy across calls
    pub fn new(pool: Arc<ProxyPool>, sticky: bool) -> Self {
        Self {
            pool,
            sticky,
            assignments: Mutex::new(HashMap::new()),
        }
    }

    /// Get the proxy for a bot.
    ///
    /// Sticky mode returns the previously assigned proxy while it is still
    /// available, otherwise picks a fresh one and records the new mapping.
    /// Non-sticky mode always rotates. Returns `None` when the pool has no
    /// available proxy.
    pub fn get_proxy(&self, bot_id: &str) -> Option<ProxyEntry> {
        if !self.sticky {
            return self.pool.next_proxy();
        }

        let mut assignments = self.assignments.lock().unwrap();
        if let Some(url) = assignments.get(bot_id)
            && self.pool.available().contains(url)
        {
            return self.pool.get(url);
        }

        let entry = self.pool.next_proxy()?;
        log::debug!("bot {bot_id} assigned proxy {}", entry.url);
        assignments.insert(bot_id.to_string(), entry.url.clone());
        Some(entry)
    }

    /// Drop a bot's assignment, forcing a fresh pick next time.
    pub fn release(&self, bot_id: &str) {
        self.assignments.lock().unwrap().remove(bot_id);
    }

    /// Drop every assignment.
    pub fn release_all(&self) {
        self.assignments.lock().unwrap().clear();
    }

    /// Force a fresh pick for a bot right now.
    pub fn reassign(&self, bot_id: &str) -> Option<ProxyEntry> {
        self.release(bot_id);
        self.get_proxy(bot_id)
    }

    /// Current bot-to-proxy mapping snapshot.
    pub fn assignments(&self) -> HashMap<String, String> {
        self.assignments.lock().unwrap().clone()
    }
}
