//! File-backed key/value cache with TTL expiry and size-bounded eviction
//!
//! Every entry is one file named by the encoded key and holding a serialized
//! `{timestamp, value}` record. Expiry is checked lazily on read; disk usage
//! is bounded by evicting the least recently accessed files before each write.
//! All failures except directory creation and [`PersistentCache::clear`]
//! degrade to cache misses.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{
    de::{DeserializeOwned, IgnoredAny},
    Deserialize, Serialize,
};
use std::io::{Read, Write};
use std::{
    fs::FileTimes,
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::fs;
use tracing::{debug, info};

use crate::error::{StudyError, StudyResult};

pub mod key;

pub use key::encode_key;

const ENTRY_EXTENSION: &str = "cache";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Cache configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub cache_dir: PathBuf,
    pub ttl: Duration,
    pub max_size_bytes: u64,
    pub enable_compression: bool,
}

impl CacheConfig {
    pub fn new(cache_dir: impl AsRef<Path>) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_max_size(mut self, max_size_bytes: u64) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }

    pub fn with_compression(mut self, enable: bool) -> Self {
        self.enable_compression = enable;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: crate::config::default_cache_root().join("cache"),
            ttl: Duration::from_secs(24 * 60 * 60),
            max_size_bytes: 100 * 1024 * 1024, // 100MB
            enable_compression: false,
        }
    }
}

/// Snapshot of a store's disk usage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub cache_dir: PathBuf,
    pub entries: usize,
    pub total_size_bytes: u64,
    pub max_size_bytes: u64,
    pub ttl_secs: u64,
}

/// Serialized form of one entry
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry<T> {
    timestamp: i64,
    value: T,
}

/// One file considered for eviction
struct DiskEntry {
    path: PathBuf,
    size: u64,
    last_accessed: SystemTime,
}

/// Persistent cache scoped to a single directory
#[derive(Debug, Clone)]
pub struct PersistentCache {
    config: CacheConfig,
}

impl PersistentCache {
    /// Open (creating if needed) the store described by `config`
    pub async fn new(config: CacheConfig) -> StudyResult<Self> {
        fs::create_dir_all(&config.cache_dir).await.map_err(|e| {
            StudyError::config(format!(
                "Failed to create cache directory '{}'",
                config.cache_dir.display()
            ))
            .with_details(e.to_string())
        })?;
        debug!(
            "Opened cache at {} (ttl {:?}, max {} bytes)",
            config.cache_dir.display(),
            config.ttl,
            config.max_size_bytes
        );
        Ok(Self { config })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.config.cache_dir
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a live entry. Expired entries are deleted as a side effect.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let (path, value) = self.read_live(key).await?;
        touch(path).await;
        debug!("Cache hit for: {}", key);
        Some(value)
    }

    /// Whether a live entry exists for `key`. Does not count as an access.
    pub async fn contains(&self, key: &str) -> bool {
        self.read_live::<IgnoredAny>(key).await.is_some()
    }

    async fn read_live<T: DeserializeOwned>(&self, key: &str) -> Option<(PathBuf, T)> {
        let path = self.entry_path(key);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Cache miss for: {}", key);
                return None;
            }
            Err(e) => {
                debug!("Cache read failed for {}: {}", key, e);
                return None;
            }
        };

        let entry: CacheEntry<T> = match decode_entry(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Ignoring unreadable cache entry {}: {}", key, e);
                return None;
            }
        };

        if self.is_expired(entry.timestamp) {
            if let Err(e) = fs::remove_file(&path).await {
                debug!("Failed to remove expired entry {}: {}", key, e);
            }
            debug!("Cache entry expired for: {}", key);
            return None;
        }

        Some((path, entry.value))
    }

    /// Store a value. Failures are logged and otherwise ignored.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) {
        let entry = CacheEntry {
            timestamp: now_millis(),
            value,
        };
        let bytes = match encode_entry(&entry, self.config.enable_compression) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Failed to serialize cache entry {}: {}", key, e);
                return;
            }
        };

        self.ensure_cache_space(bytes.len() as u64).await;

        let path = self.entry_path(key);
        if let Err(e) = write_atomic(&path, &bytes).await {
            debug!("Failed to write cache entry {}: {}", key, e);
            return;
        }
        debug!("Stored cache entry for: {} ({} bytes)", key, bytes.len());
    }

    /// Remove an entry, returning whether a file was deleted. A missing entry is not an error.
    pub async fn delete(&self, key: &str) -> bool {
        match fs::remove_file(self.entry_path(key)).await {
            Ok(()) => {
                debug!("Removed cache entry: {}", key);
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                debug!("Failed to remove cache entry {}: {}", key, e);
                false
            }
        }
    }

    /// Remove every file in the cache directory, returning how many were removed
    pub async fn clear(&self) -> StudyResult<usize> {
        let dir = &self.config.cache_dir;
        let mut entries = fs::read_dir(dir).await.map_err(|e| {
            StudyError::config(format!("Failed to read cache directory '{}'", dir.display()))
                .with_details(e.to_string())
        })?;

        let mut removed = 0;
        loop {
            let entry = entries.next_entry().await.map_err(|e| {
                StudyError::config(format!("Failed to read cache directory '{}'", dir.display()))
                    .with_details(e.to_string())
            })?;
            let Some(entry) = entry else { break };
            let path = entry.path();
            let is_file = entry
                .file_type()
                .await
                .map(|ft| ft.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }
            fs::remove_file(&path).await.map_err(|e| {
                StudyError::config(format!("Failed to remove cache file '{}'", path.display()))
                    .with_details(e.to_string())
            })?;
            removed += 1;
        }

        info!("Cleared {} entries from {}", removed, dir.display());
        Ok(removed)
    }

    /// Current disk usage of the store
    pub async fn stats(&self) -> StudyResult<CacheStats> {
        let entries = self.scan_entries().await.map_err(|e| {
            StudyError::config(format!(
                "Failed to read cache directory '{}'",
                self.config.cache_dir.display()
            ))
            .with_details(e.to_string())
        })?;

        Ok(CacheStats {
            cache_dir: self.config.cache_dir.clone(),
            entries: entries.len(),
            total_size_bytes: entries.iter().map(|e| e.size).sum(),
            max_size_bytes: self.config.max_size_bytes,
            ttl_secs: self.config.ttl.as_secs(),
        })
    }

    /// Evict oldest-accessed files until `incoming` more bytes fit under the limit
    async fn ensure_cache_space(&self, incoming: u64) {
        let mut entries = match self.scan_entries().await {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Skipping cache size check: {}", e);
                return;
            }
        };

        let mut total: u64 = entries.iter().map(|e| e.size).sum();
        if total + incoming <= self.config.max_size_bytes {
            return;
        }

        entries.sort_by_key(|e| e.last_accessed);

        let mut evicted = 0;
        for entry in entries {
            if total + incoming <= self.config.max_size_bytes {
                break;
            }
            match fs::remove_file(&entry.path).await {
                Ok(()) => {
                    total = total.saturating_sub(entry.size);
                    evicted += 1;
                }
                Err(e) => debug!("Failed to evict {}: {}", entry.path.display(), e),
            }
        }

        debug!(
            "Evicted {} entries from {} ({} bytes remain)",
            evicted,
            self.config.cache_dir.display(),
            total
        );
    }

    async fn scan_entries(&self) -> std::io::Result<Vec<DiskEntry>> {
        let mut out = Vec::new();
        let mut dir = fs::read_dir(&self.config.cache_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let last_accessed = metadata
                .accessed()
                .or_else(|_| metadata.modified())
                .unwrap_or(UNIX_EPOCH);
            out.push(DiskEntry {
                path: entry.path(),
                size: metadata.len(),
                last_accessed,
            });
        }
        Ok(out)
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.config
            .cache_dir
            .join(format!("{}.{ENTRY_EXTENSION}", encode_key(key)))
    }

    fn is_expired(&self, timestamp: i64) -> bool {
        let age = i128::from(now_millis()) - i128::from(timestamp);
        age >= self.config.ttl.as_millis() as i128
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn encode_entry<T: Serialize>(entry: &CacheEntry<&T>, compress: bool) -> anyhow::Result<Vec<u8>> {
    let json = serde_json::to_vec(entry)?;
    if !compress {
        return Ok(json);
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

fn decode_entry<T: DeserializeOwned>(bytes: &[u8]) -> anyhow::Result<CacheEntry<T>> {
    if bytes.starts_with(&GZIP_MAGIC) {
        let mut decoder = GzDecoder::new(bytes);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        Ok(serde_json::from_slice(&out)?)
    } else {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Write through a sibling temp file so readers never see a torn entry
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()));
    if let Err(e) = fs::write(&tmp, bytes).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

/// Bump the access time so eviction order survives `noatime` mounts
async fn touch(path: PathBuf) {
    let result = tokio::task::spawn_blocking(move || {
        std::fs::File::options()
            .write(true)
            .open(&path)
            .and_then(|file| file.set_times(FileTimes::new().set_accessed(SystemTime::now())))
    })
    .await;
    match result {
        Ok(Err(e)) => debug!("Failed to update access time: {}", e),
        Err(e) => debug!("Access time update task failed: {}", e),
        Ok(Ok(())) => {}
    }
}
