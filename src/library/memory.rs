//! In-memory tier in front of the persistent library cache

use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::Duration;
use tracing::debug;

use super::types::LibraryCacheEntry;
use crate::cache::now_millis;

pub const DEFAULT_CAPACITY: usize = 50;
pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(5 * 60);

/// Bounded, sliding-expiry map from library name to its resolution result.
///
/// Reads refresh `last_accessed`. Every insert first drops entries idle for
/// longer than the freshness window, then the least recently accessed ones
/// until the tier is within capacity.
#[derive(Debug)]
pub struct MemoryTier {
    entries: LruCache<String, LibraryCacheEntry>,
    capacity: usize,
    freshness: Duration,
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_FRESHNESS)
    }
}

impl MemoryTier {
    pub fn new(capacity: usize, freshness: Duration) -> Self {
        let capacity = capacity.max(1);
        let bound = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(bound),
            capacity,
            freshness,
        }
    }

    /// Fresh entry for `name`, refreshing its access time
    pub fn get(&mut self, name: &str) -> Option<LibraryCacheEntry> {
        let now = now_millis();
        let freshness = self.freshness;
        let stale = match self.entries.get_mut(name) {
            Some(entry) if !is_stale(entry, now, freshness) => {
                entry.last_accessed = now;
                return Some(entry.clone());
            }
            Some(_) => true,
            None => false,
        };
        if stale {
            self.entries.pop(name);
            debug!("Memory tier entry for {} went stale", name);
        }
        None
    }

    pub fn insert(&mut self, name: impl Into<String>, mut entry: LibraryCacheEntry) {
        self.cleanup();
        entry.last_accessed = now_millis();
        let name = name.into();
        if let Some((evicted, _)) = self.entries.push(name.clone(), entry) {
            if evicted != name {
                debug!("Memory tier evicted {}", evicted);
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<LibraryCacheEntry> {
        self.entries.pop(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn cleanup(&mut self) {
        let now = now_millis();
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| is_stale(entry, now, self.freshness))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &stale {
            self.entries.pop(name);
        }
        while self.entries.len() > self.capacity {
            self.entries.pop_lru();
        }
        if !stale.is_empty() {
            debug!("Memory tier dropped {} stale entries", stale.len());
        }
    }
}

fn is_stale(entry: &LibraryCacheEntry, now: i64, freshness: Duration) -> bool {
    i128::from(now) - i128::from(entry.last_accessed) > freshness.as_millis() as i128
}
