//! Type definitions for library resolution

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{StudyError, StudyResult};

/// Validated `package.json` descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typings: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_dependencies: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_dependencies: Option<BTreeMap<String, String>>,
    /// Every other descriptor field, kept verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PackageInfo {
    /// Validate a parsed descriptor. `name` and `version` must be non-empty strings.
    pub fn from_value(value: Value) -> StudyResult<Self> {
        let Some(object) = value.as_object() else {
            return Err(StudyError::validation("Package descriptor must be a JSON object"));
        };
        for field in ["name", "version"] {
            let valid = object
                .get(field)
                .and_then(Value::as_str)
                .is_some_and(|s| !s.trim().is_empty());
            if !valid {
                return Err(StudyError::validation(format!(
                    "Package descriptor is missing a valid '{field}'"
                ))
                .with_details(serde_json::json!({ "field": field })));
            }
        }
        serde_json::from_value(value).map_err(|e| {
            StudyError::validation("Package descriptor has an invalid shape")
                .with_details(e.to_string())
        })
    }

    /// Explicit declaration file, preferring `types` over the legacy `typings`
    pub fn types_path(&self) -> Option<&str> {
        self.types
            .as_deref()
            .or(self.typings.as_deref())
            .filter(|p| !p.trim().is_empty())
    }

    /// Runtime, then dev, then peer dependencies; later categories win on collision
    pub fn all_dependencies(&self) -> BTreeMap<String, String> {
        let mut all = BTreeMap::new();
        for deps in [
            &self.dependencies,
            &self.dev_dependencies,
            &self.peer_dependencies,
        ]
        .into_iter()
        .flatten()
        {
            all.extend(deps.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        all
    }
}

/// Resolution result stored in both cache tiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryCacheEntry {
    pub exports: Map<String, Value>,
    pub package_info: Option<PackageInfo>,
    pub last_accessed: i64,
    pub has_default_export: bool,
    pub file_hash: String,
}

impl LibraryCacheEntry {
    /// Export names other than the synthesized `default`
    pub fn named_exports(&self) -> Vec<String> {
        self.exports
            .keys()
            .filter(|k| !(self.has_default_export && k.as_str() == "default"))
            .cloned()
            .collect()
    }
}

/// Export shape produced by a [`crate::library::loader::ModuleLoader`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedModule {
    pub default_export: Option<Value>,
    pub named_exports: Map<String, Value>,
}

impl LoadedModule {
    pub fn has_default_export(&self) -> bool {
        self.default_export.is_some()
    }

    /// `{ default, ...named }` when a default export exists, otherwise the named members
    pub fn merged_exports(&self) -> Map<String, Value> {
        let mut merged = Map::new();
        if let Some(default) = &self.default_export {
            merged.insert("default".to_string(), default.clone());
        }
        for (name, value) in &self.named_exports {
            if self.default_export.is_some() && name == "default" {
                continue;
            }
            merged.insert(name.clone(), value.clone());
        }
        merged
    }
}
