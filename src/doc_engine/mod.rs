//! Doc Engine - documentation for installed libraries
//!
//! `StudyEngine` ties the pieces together: the library resolver supplies the
//! export shape and descriptor, a `DocumentationGenerator` writes the docs,
//! and the documentation cache keeps the result keyed by library version,
//! AI tool and page size.

use serde_json::Value;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info, instrument};

use crate::cache::PersistentCache;
use crate::config::StudyConfig;
use crate::error::{StudyError, StudyResult};
use crate::library::{validate_library_name, LibraryResolver};

pub mod cache;
pub mod provider;
pub mod types;

use cache::DocumentationCache;
use provider::DocumentationGenerator;
use types::*;

const UNKNOWN: &str = "unknown";

/// Composition root owning both caches and the generator
pub struct StudyEngine {
    config: StudyConfig,
    resolver: LibraryResolver,
    docs_cache: DocumentationCache,
    generator: Option<Arc<dyn DocumentationGenerator>>,
}

impl std::fmt::Debug for StudyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StudyEngine")
            .field("cache_root", &self.config.cache_root)
            .field("ai_tool", &self.config.ai_tool)
            .field("resolver", &self.resolver)
            .field("docs_cache", &self.docs_cache)
            .field("generator", &self.generator.is_some())
            .finish()
    }
}

impl StudyEngine {
    /// Open the caches under `config.cache_root` and resolve libraries from `project_dir`
    pub async fn new(config: StudyConfig, project_dir: impl AsRef<Path>) -> StudyResult<Self> {
        config.validate()?;
        let library_store = PersistentCache::new(config.library_cache()).await?;
        let resolver = LibraryResolver::new(project_dir, library_store);
        let docs_cache = DocumentationCache::new(config.docs_cache_dir()).await?;
        info!(
            "Study engine ready (cache: {}, project: {})",
            config.cache_root.display(),
            resolver.project_dir().display()
        );
        Ok(Self {
            config,
            resolver,
            docs_cache,
            generator: None,
        })
    }

    /// Use `generator` instead of the one named by `config.ai_tool`
    pub fn with_generator(mut self, generator: Arc<dyn DocumentationGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_resolver(mut self, resolver: LibraryResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &StudyConfig {
        &self.config
    }

    pub fn resolver(&self) -> &LibraryResolver {
        &self.resolver
    }

    pub fn docs_cache(&self) -> &DocumentationCache {
        &self.docs_cache
    }

    pub fn cache_root(&self) -> PathBuf {
        self.config.cache_root.clone()
    }

    /// Documentation for `name`, from the cache unless `force_refresh` is set
    #[instrument(skip(self, options), fields(items_per_page = options.items_per_page))]
    pub async fn study(&self, name: &str, options: &StudyOptions) -> StudyResult<StudyOutcome> {
        let name = validate_library_name(name)?;
        if options.items_per_page == 0 {
            return Err(StudyError::validation("items_per_page must be at least 1"));
        }

        let package_info = self.resolver.get_package_info(&name).await?;
        let version = package_info
            .as_ref()
            .map(|info| info.version.clone())
            .unwrap_or_else(|| UNKNOWN.to_string());
        let ai_tool = self.config.ai_tool.as_str();

        if options.force_refresh {
            debug!("Skipping documentation cache for {}", name);
        } else if let Some(response) = self
            .docs_cache
            .get(&name, &version, ai_tool, options.items_per_page)
            .await
        {
            info!("Serving cached documentation for {}@{}", name, version);
            return Ok(StudyOutcome {
                library_name: name,
                library_version: version,
                from_cache: true,
                response,
            });
        }

        let entry = self.resolver.entry(&name).await?;
        let request = build_request(
            &name,
            &version,
            package_info.and_then(|info| info.description),
            entry.has_default_export,
            &entry.exports,
        )?;

        let generator = match &self.generator {
            Some(generator) => Arc::clone(generator),
            None => Arc::from(provider::create_generator(&self.config)?),
        };
        info!(
            "Generating documentation for {}@{} ({} exports)",
            name,
            version,
            request.methods.len()
        );
        let response = generator.generate(&request).await?;

        self.docs_cache
            .set(&name, &version, ai_tool, options.items_per_page, &response)
            .await;
        Ok(StudyOutcome {
            library_name: name,
            library_version: version,
            from_cache: false,
            response,
        })
    }

    /// Export shape, descriptor, types and dependencies of an installed library
    #[instrument(skip(self))]
    pub async fn inspect(&self, name: &str) -> StudyResult<LibraryReport> {
        let name = validate_library_name(name)?;
        let entry = self.resolver.entry(&name).await?;
        // Entries are keyed on the module hash, so the descriptor is read fresh
        let package_info = self.resolver.get_package_info(&name).await?;
        let dependencies = package_info
            .as_ref()
            .map(|info| info.all_dependencies())
            .unwrap_or_default();
        Ok(LibraryReport {
            types: self.resolver.get_types_info(&name).await?,
            named_exports: entry.named_exports(),
            has_default_export: entry.has_default_export,
            package_info,
            dependencies,
            name,
        })
    }

    /// Drop everything cached for one library
    pub async fn invalidate(&self, name: &str) -> StudyResult<usize> {
        let name = validate_library_name(name)?;
        self.resolver.invalidate(&name).await;
        Ok(self.docs_cache.invalidate(&name).await)
    }

    /// Empty the selected stores
    pub async fn clear_caches(&self, docs: bool, libraries: bool) -> StudyResult<ClearSummary> {
        let mut summary = ClearSummary::default();
        if docs {
            summary.docs_removed = self.docs_cache.clear().await?;
        }
        if libraries {
            summary.library_entries_removed = self.resolver.clear().await?;
        }
        info!(
            "Cleared {} documentation and {} library entries",
            summary.docs_removed, summary.library_entries_removed
        );
        Ok(summary)
    }

    pub async fn stats(&self) -> StudyResult<EngineStats> {
        Ok(EngineStats {
            libraries: self.resolver.cache().stats().await?,
            docs: self.docs_cache.stats().await?,
            documented_libraries: self.docs_cache.libraries().await,
        })
    }
}

/// Turn resolved exports into the generator's input
pub fn build_request(
    name: &str,
    version: &str,
    description: Option<String>,
    has_default_export: bool,
    exports: &serde_json::Map<String, Value>,
) -> StudyResult<StudyRequest> {
    if exports.is_empty() {
        return Err(StudyError::documentation(format!(
            "Library '{name}' has no exports to document"
        )));
    }
    let methods = exports
        .iter()
        .map(|(export, descriptor)| MethodData {
            name: export.clone(),
            parameters: descriptor
                .get("params")
                .and_then(Value::as_array)
                .map(|params| {
                    params
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            return_type: UNKNOWN.to_string(),
            is_async: descriptor
                .get("async")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
        .collect();
    Ok(StudyRequest {
        library_name: name.to_string(),
        library_version: version.to_string(),
        description,
        has_default_export,
        methods,
    })
}
