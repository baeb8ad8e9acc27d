//! Library resolution with content-addressed caching
//!
//! A library name is resolved to its entry module, the module file is hashed,
//! and `name:hash` keys the persistent cache. Editing the installed file
//! changes the hash, so stale results are never returned: they simply stop
//! being addressed and age out through TTL or size eviction.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::{
    collections::BTreeMap,
    path::{Component, Path, PathBuf},
    sync::Arc,
};
use tokio::{fs, io::AsyncReadExt, sync::Mutex};
use tracing::{debug, instrument};

use crate::cache::{now_millis, PersistentCache};
use crate::error::{ErrorCode, StudyError, StudyResult};

pub mod finder;
pub mod loader;
pub mod memory;
pub mod types;

use loader::{ModuleLoader, SourceModuleLoader};
use memory::MemoryTier;
use types::{LibraryCacheEntry, PackageInfo};

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Resolves installed libraries and caches their export shape and descriptor
pub struct LibraryResolver {
    project_dir: PathBuf,
    cache: PersistentCache,
    memory: Mutex<MemoryTier>,
    loader: Arc<dyn ModuleLoader>,
}

impl std::fmt::Debug for LibraryResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryResolver")
            .field("project_dir", &self.project_dir)
            .field("cache_dir", &self.cache.cache_dir())
            .finish()
    }
}

impl LibraryResolver {
    /// Resolve libraries installed for `project_dir`, caching into `cache`
    pub fn new(project_dir: impl AsRef<Path>, cache: PersistentCache) -> Self {
        let project_dir = project_dir.as_ref();
        let project_dir =
            std::path::absolute(project_dir).unwrap_or_else(|_| project_dir.to_path_buf());
        Self {
            project_dir,
            cache,
            memory: Mutex::new(MemoryTier::default()),
            loader: Arc::new(SourceModuleLoader),
        }
    }

    pub fn with_loader(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_memory_tier(mut self, tier: MemoryTier) -> Self {
        self.memory = Mutex::new(tier);
        self
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn cache(&self) -> &PersistentCache {
        &self.cache
    }

    /// Merged export view of a library
    pub async fn context(&self, name: &str) -> StudyResult<Map<String, Value>> {
        Ok(self.entry(name).await?.exports)
    }

    /// Full resolution result, served from the memory tier, then the
    /// persistent tier, then a fresh load.
    #[instrument(skip(self))]
    pub async fn entry(&self, name: &str) -> StudyResult<LibraryCacheEntry> {
        let name = validate_library_name(name)?;
        let resolved = {
            let (name, project_dir) = (name.clone(), self.project_dir.clone());
            blocking(move || finder::resolve(&name, &project_dir)).await
        }
        .map_err(|e| not_found(&name, e))?;
        let file_hash = hash_file(&resolved.entry_point)
            .await
            .map_err(|e| not_found(&name, e.into()))?;

        let cached = self.memory.lock().await.get(&name);
        if let Some(mut entry) = cached.filter(|entry| entry.file_hash == file_hash) {
            debug!("Library cache hit (memory) for: {}", name);
            entry.package_info = self.lenient_package_info(&name).await;
            return Ok(entry);
        }

        let cache_key = format!("{name}:{file_hash}");
        if let Some(mut entry) = self.cache.get::<LibraryCacheEntry>(&cache_key).await {
            debug!("Library cache hit (disk) for: {}", name);
            entry.package_info = self.lenient_package_info(&name).await;
            self.memory.lock().await.insert(name.clone(), entry.clone());
            return Ok(entry);
        }

        debug!(
            "Loading {} from {}",
            name,
            resolved.entry_point.display()
        );
        let module = self
            .loader
            .load(&resolved.entry_point)
            .await
            .map_err(|e| not_found(&name, e))?;

        let package_info = self.lenient_package_info(&name).await;
        let entry = LibraryCacheEntry {
            exports: module.merged_exports(),
            package_info,
            last_accessed: now_millis(),
            has_default_export: module.has_default_export(),
            file_hash,
        };
        self.cache.set(&cache_key, &entry).await;
        self.memory.lock().await.insert(name, entry.clone());
        Ok(entry)
    }

    pub async fn has_default_export(&self, name: &str) -> bool {
        match self.entry(name).await {
            Ok(entry) => entry.has_default_export,
            Err(e) => {
                debug!("Default export check failed for {}: {}", name, e);
                false
            }
        }
    }

    /// Export names, excluding the synthesized `default`
    pub async fn get_named_exports(&self, name: &str) -> Vec<String> {
        match self.entry(name).await {
            Ok(entry) => entry.named_exports(),
            Err(e) => {
                debug!("Named export lookup failed for {}: {}", name, e);
                Vec::new()
            }
        }
    }

    /// Whether `name` resolves to an existing entry module. Never loads or caches.
    pub fn is_available(&self, name: &str) -> bool {
        validate_library_name(name)
            .ok()
            .and_then(|name| finder::resolve(&name, &self.project_dir).ok())
            .is_some()
    }

    /// Validated package descriptor, cached by descriptor content hash
    #[instrument(skip(self))]
    pub async fn get_package_info(&self, name: &str) -> StudyResult<Option<PackageInfo>> {
        let name = validate_library_name(name)?;
        let Ok(package_root) = self.package_root(&name).await else {
            debug!("No package descriptor for {}", name);
            return Ok(None);
        };
        let descriptor_path = package_root.join("package.json");
        let descriptor_hash = match hash_file(&descriptor_path).await {
            Ok(hash) => hash,
            Err(e) => {
                debug!("Failed to hash {}: {}", descriptor_path.display(), e);
                return Ok(None);
            }
        };

        let cache_key = format!("{name}:package:{descriptor_hash}");
        if let Some(info) = self.cache.get::<PackageInfo>(&cache_key).await {
            return Ok(Some(info));
        }

        let raw = match fs::read_to_string(&descriptor_path).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!("Failed to read {}: {}", descriptor_path.display(), e);
                return Ok(None);
            }
        };
        let value: Value = serde_json::from_str(&raw).map_err(|e| {
            StudyError::validation(format!("Package descriptor for '{name}' is not valid JSON"))
                .with_details(e.to_string())
        })?;
        let info = PackageInfo::from_value(value)?;
        self.cache.set(&cache_key, &info).await;
        Ok(Some(info))
    }

    /// Path of the library's type declarations, from its descriptor or an `@types` companion
    pub async fn get_types_info(&self, name: &str) -> StudyResult<Option<String>> {
        let name = validate_library_name(name)?;
        if let Some(info) = self.get_package_info(&name).await? {
            if let Some(types) = info.types_path() {
                if let Ok(root) = self.package_root(&name).await {
                    return Ok(Some(root.join(types).display().to_string()));
                }
                return Ok(Some(types.to_string()));
            }
        }

        let companion = types_companion_name(&name);
        let Ok(root) = self.package_root(&companion).await else {
            return Ok(None);
        };
        let descriptor_root = root.clone();
        let declared = blocking(move || finder::read_descriptor(&descriptor_root))
            .await
            .ok()
            .and_then(|descriptor| {
                descriptor
                    .get("types")
                    .or_else(|| descriptor.get("typings"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "index.d.ts".to_string());
        let path = root.join(declared);
        let is_file = fs::metadata(&path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        Ok(is_file.then(|| path.display().to_string()))
    }

    /// Runtime, dev and peer dependencies merged in that order
    pub async fn get_all_dependencies(&self, name: &str) -> StudyResult<BTreeMap<String, String>> {
        Ok(self
            .get_package_info(name)
            .await?
            .map(|info| info.all_dependencies())
            .unwrap_or_default())
    }

    /// Drop the in-memory entry for `name`; persistent entries are content-addressed
    pub async fn invalidate(&self, name: &str) {
        match validate_library_name(name) {
            Ok(name) => {
                self.memory.lock().await.remove(&name);
            }
            Err(e) => debug!("Nothing to invalidate for {}: {}", name, e),
        }
    }

    /// Empty both tiers, returning the number of persistent entries removed
    pub async fn clear(&self) -> StudyResult<usize> {
        self.memory.lock().await.clear();
        self.cache.clear().await
    }

    pub async fn memory_len(&self) -> usize {
        self.memory.lock().await.len()
    }

    /// Current descriptor for `name`, or `None` when it is missing or invalid
    async fn lenient_package_info(&self, name: &str) -> Option<PackageInfo> {
        match self.get_package_info(name).await {
            Ok(info) => info,
            Err(e) => {
                debug!("Ignoring package descriptor for {}: {}", name, e);
                None
            }
        }
    }

    async fn package_root(&self, name: &str) -> anyhow::Result<PathBuf> {
        let (name, project_dir) = (name.to_string(), self.project_dir.clone());
        blocking(move || finder::find_package_root(&name, &project_dir)).await
    }
}

/// Run a synchronous filesystem lookup off the async runtime
async fn blocking<T, F>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| anyhow::anyhow!("Join error in package lookup: {e}"))?
}

/// Reject empty names, absolute paths and names escaping `node_modules`.
///
/// Returns the normalized name (`a/./b` becomes `a/b`).
pub fn validate_library_name(name: &str) -> StudyResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(StudyError::validation("Library name must not be empty"));
    }
    let invalid = || {
        StudyError::validation(format!("Invalid library name '{name}'"))
            .with_details(serde_json::json!({ "name": name }))
    };
    if trimmed.starts_with(['/', '\\']) || Path::new(trimmed).is_absolute() || trimmed.contains(':')
    {
        return Err(invalid());
    }

    let unified = trimmed.replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();
    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(part) => match part.to_str() {
                Some(part) => segments.push(part),
                None => return Err(invalid()),
            },
            Component::CurDir => {}
            Component::ParentDir => {
                if segments.pop().is_none() {
                    return Err(invalid());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(invalid()),
        }
    }
    if segments.is_empty() {
        return Err(invalid());
    }
    Ok(segments.join("/"))
}

/// `@types` package name for a library (`@scope/pkg` maps to `@types/scope__pkg`)
pub fn types_companion_name(name: &str) -> String {
    match name.strip_prefix('@').and_then(|rest| rest.split_once('/')) {
        Some((scope, pkg)) => format!("@types/{scope}__{pkg}"),
        None => format!("@types/{name}"),
    }
}

/// Streaming SHA-256 of a file, hex encoded
pub async fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn not_found(name: &str, cause: anyhow::Error) -> StudyError {
    if let Some(err) = cause.downcast_ref::<StudyError>() {
        return err.clone();
    }
    StudyError::new(
        ErrorCode::LibraryNotFound,
        format!("Library '{name}' could not be resolved"),
    )
    .with_details(serde_json::json!({ "cause": format!("{cause:#}") }))
}
