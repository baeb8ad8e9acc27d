//! Type definitions for the documentation engine

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cache::CacheStats;
use crate::library::types::PackageInfo;

/// Signature of one documented export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodData {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default)]
    pub return_type: String,
    #[serde(rename = "async", default)]
    pub is_async: bool,
}

/// Generated documentation for one export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryDocumentation {
    pub method_data: MethodData,
    pub documentation: String,
}

/// Everything the AI provider returned for one library
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiResponse {
    pub docs: Vec<LibraryDocumentation>,
}

/// Provenance stored next to a cached response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub library_name: String,
    pub library_version: String,
    pub ai_tool: String,
    pub timestamp: i64,
    pub items_per_page: usize,
}

/// Payload of the documentation response cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiResponseCacheEntry {
    pub response: AiResponse,
    pub metadata: ResponseMetadata,
}

/// Input handed to a documentation generator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyRequest {
    pub library_name: String,
    pub library_version: String,
    pub description: Option<String>,
    pub has_default_export: bool,
    pub methods: Vec<MethodData>,
}

/// Per-request knobs
#[derive(Debug, Clone)]
pub struct StudyOptions {
    pub items_per_page: usize,
    pub force_refresh: bool,
}

impl Default for StudyOptions {
    fn default() -> Self {
        Self {
            items_per_page: 10,
            force_refresh: false,
        }
    }
}

/// Result of a study request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyOutcome {
    pub library_name: String,
    pub library_version: String,
    pub from_cache: bool,
    pub response: AiResponse,
}

impl StudyOutcome {
    /// Documentation split into pages of `items_per_page` entries
    pub fn pages(&self, items_per_page: usize) -> Vec<&[LibraryDocumentation]> {
        self.response.docs.chunks(items_per_page.max(1)).collect()
    }
}

/// Introspection summary of an installed library
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryReport {
    pub name: String,
    pub has_default_export: bool,
    pub named_exports: Vec<String>,
    pub package_info: Option<PackageInfo>,
    pub types: Option<String>,
    pub dependencies: BTreeMap<String, String>,
}

/// Disk usage of both stores
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub libraries: CacheStats,
    pub docs: CacheStats,
    pub documented_libraries: Vec<String>,
}

/// Entries removed by a clear
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearSummary {
    pub docs_removed: usize,
    pub library_entries_removed: usize,
}
