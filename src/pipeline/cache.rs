//! Cache writer backends for exported payloads

use super::error::CacheWriteError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Time-to-live key/value sink the export task writes into
#[async_trait]
pub trait CacheWriter: Send + Sync {
    /// Store `value` under `key`, expiring after `ttl_secs` seconds.
    async fn set_with_ttl(&self, key: &str, ttl_secs: u64, value: &str) -> Result<(), CacheWriteError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}

/// Default spacing between sweeps triggered by writes
pub const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    last_purge: Option<Instant>,
}

impl CacheState {
    fn purge(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        self.last_purge = Some(now);
        before - self.entries.len()
    }

    fn purge_due(&self, now: Instant, interval: Duration) -> bool {
        match self.last_purge {
            Some(last) => now.saturating_duration_since(last) >= interval,
            None => true,
        }
    }
}

/// In-process TTL cache
///
/// Expired entries are invisible to readers. They are dropped by
/// [`purge_expired`](MemoryCacheWriter::purge_expired), and writes sweep at
/// most once per purge interval.
#[derive(Debug)]
pub struct MemoryCacheWriter {
    state: Mutex<CacheState>,
    purge_interval: Duration,
}

impl Default for MemoryCacheWriter {
    fn default() -> Self {
        Self::with_purge_interval(DEFAULT_PURGE_INTERVAL)
    }
}

impl MemoryCacheWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_purge_interval(purge_interval: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            purge_interval,
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.state()
            .entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone())
    }

    /// Live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .state()
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at > now)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.state().purge(Instant::now())
    }

    /// Entries held, expired or not.
    #[cfg(test)]
    fn stored(&self) -> usize {
        self.state().entries.len()
    }
}

#[async_trait]
impl CacheWriter for MemoryCacheWriter {
    async fn set_with_ttl(&self, key: &str, ttl_secs: u64, value: &str) -> Result<(), CacheWriteError> {
        let now = Instant::now();
        let expires_at = now
            .checked_add(Duration::from_secs(ttl_secs))
            .ok_or_else(|| CacheWriteError::Unavailable(format!("ttl {}s out of range", ttl_secs)))?;

        let purged = {
            let mut state = self.state();
            state.entries.insert(
                key.to_string(),
                CacheEntry {
                    value: value.to_string(),
                    expires_at,
                },
            );
            if state.purge_due(now, self.purge_interval) {
                state.purge(now)
            } else {
                0
            }
        };

        if purged > 0 {
            log::debug!("Purged {} expired cache entries", purged);
        }
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
