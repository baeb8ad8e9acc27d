use async_trait::async_trait;
use libstudy::doc_engine::cache::{generate_cache_key, DocumentationCache, DEFAULT_MAX_SIZE};
use libstudy::doc_engine::provider::DocumentationGenerator;
use libstudy::doc_engine::types::{
    AiResponse, LibraryDocumentation, MethodData, StudyOptions, StudyRequest,
};
use libstudy::error::{ErrorCode, StudyError, StudyResult};
use libstudy::{StudyConfig, StudyEngine};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn response(names: &[&str]) -> AiResponse {
    AiResponse {
        docs: names
            .iter()
            .map(|name| LibraryDocumentation {
                method_data: MethodData {
                    name: name.to_string(),
                    parameters: vec!["a".to_string()],
                    return_type: "number".to_string(),
                    is_async: false,
                },
                documentation: format!("Docs for {name}"),
            })
            .collect(),
    }
}

#[tokio::test]
async fn test_set_then_get() {
    let temp_dir = tempdir().unwrap();
    let cache = DocumentationCache::new(temp_dir.path()).await.unwrap();

    cache
        .set("react", "18.2.0", "openai", 10, &response(&["useState"]))
        .await;
    let hit = cache.get("react", "18.2.0", "openai", 10).await.unwrap();
    assert_eq!(hit, response(&["useState"]));

    // Any differing component is a different entry
    assert!(cache.get("react", "18.3.0", "openai", 10).await.is_none());
    assert!(cache.get("react", "18.2.0", "anthropic", 10).await.is_none());
    assert!(cache.get("react", "18.2.0", "openai", 20).await.is_none());
}

#[tokio::test]
async fn test_entries_expire() {
    let temp_dir = tempdir().unwrap();
    let cache =
        DocumentationCache::with_config(temp_dir.path(), Duration::from_millis(100), DEFAULT_MAX_SIZE)
            .await
            .unwrap();

    cache.set("vue", "3.4.0", "openai", 10, &response(&["ref"])).await;
    assert!(cache.get("vue", "3.4.0", "openai", 10).await.is_some());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(cache.get("vue", "3.4.0", "openai", 10).await.is_none());
}

#[tokio::test]
async fn test_invalidate_is_targeted() {
    let temp_dir = tempdir().unwrap();
    let cache = DocumentationCache::new(temp_dir.path()).await.unwrap();

    cache.set("react", "18.2.0", "openai", 10, &response(&["a"])).await;
    cache.set("react", "18.2.0", "openai", 20, &response(&["a"])).await;
    cache.set("vue", "3.4.0", "openai", 10, &response(&["b"])).await;

    assert_eq!(cache.invalidate("react").await, 2);
    assert!(cache.get("react", "18.2.0", "openai", 10).await.is_none());
    assert!(cache.get("react", "18.2.0", "openai", 20).await.is_none());
    assert!(cache.get("vue", "3.4.0", "openai", 10).await.is_some());
    assert_eq!(cache.libraries().await, vec!["vue".to_string()]);

    // Nothing left to drop
    assert_eq!(cache.invalidate("react").await, 0);
}

#[tokio::test]
async fn test_expired_entries_leave_the_index() {
    let temp_dir = tempdir().unwrap();
    let cache =
        DocumentationCache::with_config(temp_dir.path(), Duration::from_millis(500), DEFAULT_MAX_SIZE)
            .await
            .unwrap();

    for minor in 0..5 {
        let version = format!("1.{minor}.0");
        cache.set("dayjs", &version, "openai", 10, &response(&["format"])).await;
    }
    cache.set("luxon", "3.0.0", "openai", 10, &response(&["now"])).await;
    assert_eq!(cache.libraries().await.len(), 2);

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(cache.get("dayjs", "1.0.0", "openai", 10).await.is_none());
    assert!(cache.libraries().await.is_empty());
    assert_eq!(cache.invalidate("dayjs").await, 0);
    assert_eq!(cache.invalidate("luxon").await, 0);

    // The pruned index is what a reopened cache sees
    let reopened = DocumentationCache::new(temp_dir.path()).await.unwrap();
    assert!(reopened.libraries().await.is_empty());
}

#[tokio::test]
async fn test_invalidate_counts_only_live_entries() {
    let temp_dir = tempdir().unwrap();
    let cache = DocumentationCache::new(temp_dir.path()).await.unwrap();

    cache.set("dayjs", "1.0.0", "openai", 10, &response(&["format"])).await;
    cache.set("dayjs", "1.1.0", "openai", 10, &response(&["format"])).await;
    // Remove one entry behind the index's back, as size eviction would
    let evicted = generate_cache_key("dayjs", "1.0.0", "openai", 10);
    assert!(cache.store().delete(&evicted).await);

    assert_eq!(cache.invalidate("dayjs").await, 1);
}

#[tokio::test]
async fn test_index_survives_reopen() {
    let temp_dir = tempdir().unwrap();
    {
        let cache = DocumentationCache::new(temp_dir.path()).await.unwrap();
        cache.set("lodash", "4.17.21", "openai", 10, &response(&["map"])).await;
    }
    let reopened = DocumentationCache::new(temp_dir.path()).await.unwrap();
    assert_eq!(reopened.libraries().await, vec!["lodash".to_string()]);
    assert_eq!(reopened.invalidate("lodash").await, 1);
    assert!(reopened.get("lodash", "4.17.21", "openai", 10).await.is_none());
}

#[tokio::test]
async fn test_clear_removes_everything() {
    let temp_dir = tempdir().unwrap();
    let cache = DocumentationCache::new(temp_dir.path()).await.unwrap();

    cache.set("a", "1.0.0", "openai", 10, &response(&["x"])).await;
    cache.set("b", "1.0.0", "openai", 10, &response(&["y"])).await;
    assert_eq!(cache.stats().await.unwrap().entries, 2);

    assert_eq!(cache.clear().await.unwrap(), 2);
    assert!(cache.get("a", "1.0.0", "openai", 10).await.is_none());
    assert!(cache.libraries().await.is_empty());
    assert_eq!(cache.stats().await.unwrap().entries, 0);
}

#[tokio::test]
async fn test_entries_are_compressed_on_disk() {
    let temp_dir = tempdir().unwrap();
    let cache = DocumentationCache::new(temp_dir.path()).await.unwrap();
    cache.set("zlib", "1.0.0", "openai", 10, &response(&["inflate"])).await;

    let key = generate_cache_key("zlib", "1.0.0", "openai", 10);
    let file = std::fs::read_dir(cache.store().cache_dir())
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| p.extension().is_some_and(|ext| ext == "cache"))
        .unwrap();
    let bytes = std::fs::read(file).unwrap();
    assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
    assert_eq!(key.len(), 64);
}

/// Generator that records its calls instead of talking to a provider
#[derive(Default)]
struct MockGenerator {
    calls: AtomicUsize,
    fail: bool,
}

impl MockGenerator {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentationGenerator for MockGenerator {
    async fn generate(&self, request: &StudyRequest) -> StudyResult<AiResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(StudyError::api("provider unavailable"));
        }
        let names: Vec<&str> = request.methods.iter().map(|m| m.name.as_str()).collect();
        Ok(response(&names))
    }
}

fn install(project: &Path, name: &str, version: &str, source: &str) {
    let root = project.join("node_modules").join(name);
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(
        root.join("package.json"),
        format!(r#"{{ "name": "{name}", "version": "{version}", "description": "test lib" }}"#),
    )
    .unwrap();
    std::fs::write(root.join("index.js"), source).unwrap();
}

async fn engine(cache_root: &Path, project: &Path, generator: Arc<MockGenerator>) -> StudyEngine {
    let config = StudyConfig {
        cache_root: cache_root.to_path_buf(),
        ..Default::default()
    };
    StudyEngine::new(config, project)
        .await
        .unwrap()
        .with_generator(generator)
}

#[tokio::test]
async fn test_study_generates_once_then_serves_cache() {
    let cache_root = tempdir().unwrap();
    let project = tempdir().unwrap();
    install(
        project.path(),
        "calc",
        "1.0.0",
        "export function add(a, b) {}\nexport async function load(url) {}",
    );
    let generator = Arc::new(MockGenerator::default());
    let engine = engine(cache_root.path(), project.path(), generator.clone()).await;
    let options = StudyOptions::default();

    let first = engine.study("calc", &options).await.unwrap();
    assert!(!first.from_cache);
    assert_eq!(first.library_version, "1.0.0");
    assert_eq!(first.response.docs.len(), 2);

    let second = engine.study("calc", &options).await.unwrap();
    assert!(second.from_cache);
    assert_eq!(second.response, first.response);
    assert_eq!(generator.calls(), 1);

    // Page size is part of the key
    let paged = StudyOptions {
        items_per_page: 1,
        ..Default::default()
    };
    let third = engine.study("calc", &paged).await.unwrap();
    assert!(!third.from_cache);
    assert_eq!(third.pages(1).len(), 2);
    assert_eq!(generator.calls(), 2);
}

#[tokio::test]
async fn test_force_refresh_and_invalidate_regenerate() {
    let cache_root = tempdir().unwrap();
    let project = tempdir().unwrap();
    install(project.path(), "calc", "1.0.0", "exports.add = function (a, b) {};");
    let generator = Arc::new(MockGenerator::default());
    let engine = engine(cache_root.path(), project.path(), generator.clone()).await;

    engine.study("calc", &StudyOptions::default()).await.unwrap();
    let forced = StudyOptions {
        force_refresh: true,
        ..Default::default()
    };
    assert!(!engine.study("calc", &forced).await.unwrap().from_cache);
    assert_eq!(generator.calls(), 2);

    assert_eq!(engine.invalidate("calc").await.unwrap(), 1);
    assert!(!engine.study("calc", &StudyOptions::default()).await.unwrap().from_cache);
    assert_eq!(generator.calls(), 3);
}

#[tokio::test]
async fn test_new_version_misses_the_cache() {
    let cache_root = tempdir().unwrap();
    let project = tempdir().unwrap();
    install(project.path(), "calc", "1.0.0", "exports.add = function (a, b) {};");
    let generator = Arc::new(MockGenerator::default());
    let engine = engine(cache_root.path(), project.path(), generator.clone()).await;

    engine.study("calc", &StudyOptions::default()).await.unwrap();
    install(project.path(), "calc", "1.1.0", "exports.add = function (a, b) {};");
    let outcome = engine.study("calc", &StudyOptions::default()).await.unwrap();
    assert_eq!(outcome.library_version, "1.1.0");
    assert!(!outcome.from_cache);
    assert_eq!(generator.calls(), 2);
}

#[tokio::test]
async fn test_study_errors() {
    let cache_root = tempdir().unwrap();
    let project = tempdir().unwrap();
    install(project.path(), "empty", "1.0.0", "// nothing exported\n");
    let generator = Arc::new(MockGenerator::default());
    let engine = engine(cache_root.path(), project.path(), generator.clone()).await;

    let err = engine
        .study("../etc", &StudyOptions::default())
        .await
        .unwrap_err();
    assert!(err.is(ErrorCode::ValidationError));

    let err = engine
        .study("missing", &StudyOptions::default())
        .await
        .unwrap_err();
    assert!(err.is(ErrorCode::LibraryNotFound));

    let err = engine
        .study("empty", &StudyOptions::default())
        .await
        .unwrap_err();
    assert!(err.is(ErrorCode::DocumentationError));

    let zero = StudyOptions {
        items_per_page: 0,
        ..Default::default()
    };
    assert!(engine.study("empty", &zero).await.is_err());
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn test_generator_failure_is_not_cached() {
    let cache_root = tempdir().unwrap();
    let project = tempdir().unwrap();
    install(project.path(), "calc", "1.0.0", "exports.add = function (a, b) {};");
    let generator = Arc::new(MockGenerator {
        fail: true,
        ..Default::default()
    });
    let engine = engine(cache_root.path(), project.path(), generator.clone()).await;

    for _ in 0..2 {
        let err = engine
            .study("calc", &StudyOptions::default())
            .await
            .unwrap_err();
        assert!(err.is(ErrorCode::ApiError));
    }
    assert_eq!(generator.calls(), 2);
    assert!(engine.docs_cache().libraries().await.is_empty());
}

#[tokio::test]
async fn test_missing_api_key_only_matters_on_a_miss() {
    let cache_root = tempdir().unwrap();
    let project = tempdir().unwrap();
    install(project.path(), "calc", "1.0.0", "exports.add = function (a, b) {};");
    let config = StudyConfig {
        cache_root: cache_root.path().to_path_buf(),
        api_key: None,
        ..Default::default()
    };
    let engine = StudyEngine::new(config, project.path()).await.unwrap();

    let err = engine
        .study("calc", &StudyOptions::default())
        .await
        .unwrap_err();
    assert!(err.is(ErrorCode::ConfigError), "{err}");

    // A cached response is served without any provider
    engine
        .docs_cache()
        .set("calc", "1.0.0", "openai", 10, &response(&["add"]))
        .await;
    let outcome = engine.study("calc", &StudyOptions::default()).await.unwrap();
    assert!(outcome.from_cache);
}

#[tokio::test]
async fn test_inspect_and_clear() {
    let cache_root = tempdir().unwrap();
    let project = tempdir().unwrap();
    install(
        project.path(),
        "calc",
        "1.0.0",
        "module.exports = function calc(x) {};\nmodule.exports.add = function (a, b) {};",
    );
    let generator = Arc::new(MockGenerator::default());
    let engine = engine(cache_root.path(), project.path(), generator.clone()).await;

    let report = engine.inspect("calc").await.unwrap();
    assert!(report.has_default_export);
    assert_eq!(report.named_exports, vec!["add".to_string()]);
    assert_eq!(report.package_info.unwrap().version, "1.0.0");

    engine.study("calc", &StudyOptions::default()).await.unwrap();
    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.docs.entries, 1);
    assert!(stats.libraries.entries >= 1);
    assert_eq!(stats.documented_libraries, vec!["calc".to_string()]);

    let summary = engine.clear_caches(true, false).await.unwrap();
    assert_eq!(summary.docs_removed, 1);
    assert_eq!(summary.library_entries_removed, 0);
    let summary = engine.clear_caches(false, true).await.unwrap();
    assert!(summary.library_entries_removed >= 1);
    assert_eq!(engine.resolver().memory_len().await, 0);
}

#[tokio::test]
async fn test_inspect_reflects_descriptor_edits() {
    let cache_root = tempdir().unwrap();
    let project = tempdir().unwrap();
    install(project.path(), "calc", "1.0.0", "exports.add = function (a, b) {};");
    let generator = Arc::new(MockGenerator::default());
    let engine = engine(cache_root.path(), project.path(), generator).await;

    let before = engine.inspect("calc").await.unwrap();
    assert_eq!(before.package_info.unwrap().version, "1.0.0");
    assert!(before.dependencies.is_empty());

    // Only the descriptor changes; the entry module keeps its hash
    std::fs::write(
        project.path().join("node_modules/calc/package.json"),
        r#"{ "name": "calc", "version": "2.0.0", "dependencies": { "big.js": "^6.0.0" } }"#,
    )
    .unwrap();

    let after = engine.inspect("calc").await.unwrap();
    assert_eq!(after.package_info.unwrap().version, "2.0.0");
    assert_eq!(after.dependencies.get("big.js").map(String::as_str), Some("^6.0.0"));
    let entry = engine.resolver().entry("calc").await.unwrap();
    assert_eq!(entry.package_info.unwrap().version, "2.0.0");
}
