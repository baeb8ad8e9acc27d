//! Cache for generated documentation responses
//!
//! Entries are keyed by a SHA-256 of (library, version, AI tool, page size)
//! and live in their own persistent store. A small name index next to the
//! store lets one library be invalidated without touching the others.

use sha2::{Digest, Sha256};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{fs, sync::Mutex};
use tracing::{debug, info};

use super::types::{AiResponse, AiResponseCacheEntry, ResponseMetadata};
use crate::cache::{now_millis, CacheConfig, CacheStats, PersistentCache};
use crate::error::StudyResult;

pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
pub const DEFAULT_MAX_SIZE: u64 = 500 * 1024 * 1024; // 500MB

const KEY_DELIMITER: &str = "\u{0}";
const INDEX_FILE: &str = "index.json";

/// Library name to the response keys stored for it
type NameIndex = BTreeMap<String, BTreeSet<String>>;

/// Deterministic key for one documentation response
pub fn generate_cache_key(
    library_name: &str,
    library_version: &str,
    ai_tool: &str,
    items_per_page: usize,
) -> String {
    let items = items_per_page.to_string();
    let joined = [library_name, library_version, ai_tool, items.as_str()].join(KEY_DELIMITER);
    hex::encode(Sha256::digest(joined.as_bytes()))
}

/// Documentation response cache
#[derive(Debug)]
pub struct DocumentationCache {
    store: PersistentCache,
    index_path: PathBuf,
    index: Mutex<NameIndex>,
}

impl DocumentationCache {
    /// Open the cache rooted at `dir` with the default 30 day TTL and 500MB bound
    pub async fn new(dir: impl AsRef<Path>) -> StudyResult<Self> {
        Self::with_config(dir, DEFAULT_TTL, DEFAULT_MAX_SIZE).await
    }

    pub async fn with_config(
        dir: impl AsRef<Path>,
        ttl: Duration,
        max_size_bytes: u64,
    ) -> StudyResult<Self> {
        let dir = dir.as_ref();
        let config = CacheConfig::new(dir.join("entries"))
            .with_ttl(ttl)
            .with_max_size(max_size_bytes)
            .with_compression(true);
        let store = PersistentCache::new(config).await?;
        let index_path = dir.join(INDEX_FILE);
        let index = load_index(&index_path).await;
        Ok(Self {
            store,
            index_path,
            index: Mutex::new(index),
        })
    }

    pub fn store(&self) -> &PersistentCache {
        &self.store
    }

    pub async fn get(
        &self,
        library_name: &str,
        library_version: &str,
        ai_tool: &str,
        items_per_page: usize,
    ) -> Option<AiResponse> {
        let key = generate_cache_key(library_name, library_version, ai_tool, items_per_page);
        let Some(entry) = self.store.get::<AiResponseCacheEntry>(&key).await else {
            self.forget(library_name, &key).await;
            return None;
        };
        debug!(
            "Documentation cache hit for {}@{} ({}, cached at {})",
            library_name, library_version, ai_tool, entry.metadata.timestamp
        );
        Some(entry.response)
    }

    pub async fn set(
        &self,
        library_name: &str,
        library_version: &str,
        ai_tool: &str,
        items_per_page: usize,
        response: &AiResponse,
    ) {
        let key = generate_cache_key(library_name, library_version, ai_tool, items_per_page);
        let entry = AiResponseCacheEntry {
            response: response.clone(),
            metadata: ResponseMetadata {
                library_name: library_name.to_string(),
                library_version: library_version.to_string(),
                ai_tool: ai_tool.to_string(),
                timestamp: now_millis(),
                items_per_page,
            },
        };
        self.store.set(&key, &entry).await;

        let mut index = self.index.lock().await;
        if index
            .entry(library_name.to_string())
            .or_default()
            .insert(key)
        {
            save_index(&self.index_path, &index).await;
        }
    }

    /// Remove every cached response for one library, returning how many keys were dropped
    pub async fn invalidate(&self, library_name: &str) -> usize {
        let mut index = self.index.lock().await;
        let Some(keys) = index.remove(library_name) else {
            debug!("Nothing cached for {}", library_name);
            return 0;
        };
        let mut removed = 0;
        for key in &keys {
            let live = self.store.contains(key).await;
            if self.store.delete(key).await && live {
                removed += 1;
            }
        }
        save_index(&self.index_path, &index).await;
        info!(
            "Invalidated {} documentation entries for {}",
            removed, library_name
        );
        removed
    }

    /// Remove every cached response
    pub async fn clear(&self) -> StudyResult<usize> {
        let removed = self.store.clear().await?;
        let mut index = self.index.lock().await;
        index.clear();
        save_index(&self.index_path, &index).await;
        Ok(removed)
    }

    pub async fn stats(&self) -> StudyResult<CacheStats> {
        self.store.stats().await
    }

    /// Libraries with at least one live response. Expired or evicted keys are pruned.
    pub async fn libraries(&self) -> Vec<String> {
        let mut index = self.index.lock().await;
        let mut pruned = false;
        let mut empty = Vec::new();
        for (library_name, keys) in index.iter_mut() {
            let mut live = BTreeSet::new();
            for key in keys.iter() {
                if self.store.contains(key).await {
                    live.insert(key.clone());
                }
            }
            if live.len() != keys.len() {
                pruned = true;
                *keys = live;
            }
            if keys.is_empty() {
                empty.push(library_name.clone());
            }
        }
        for library_name in &empty {
            index.remove(library_name);
        }
        if pruned {
            save_index(&self.index_path, &index).await;
        }
        index.keys().cloned().collect()
    }

    /// Drop a key whose entry is gone from the name index
    async fn forget(&self, library_name: &str, key: &str) {
        let mut index = self.index.lock().await;
        let Some(keys) = index.get_mut(library_name) else {
            return;
        };
        if !keys.remove(key) {
            return;
        }
        if keys.is_empty() {
            index.remove(library_name);
        }
        debug!("Pruned stale documentation key for {}", library_name);
        save_index(&self.index_path, &index).await;
    }
}

async fn load_index(path: &Path) -> NameIndex {
    match fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            debug!("Discarding unreadable index {}: {}", path.display(), e);
            NameIndex::new()
        }),
        Err(_) => NameIndex::new(),
    }
}

async fn save_index(path: &Path, index: &NameIndex) {
    let bytes = match serde_json::to_vec(index) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!("Failed to serialize documentation index: {}", e);
            return;
        }
    };
    if let Err(e) = fs::write(path, bytes).await {
        debug!("Failed to write {}: {}", path.display(), e);
    }
}
