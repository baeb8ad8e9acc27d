//! Finds installed Node.js packages on the local filesystem.

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Location of an installed package and its entry module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModule {
    pub package_root: PathBuf,
    pub entry_point: PathBuf,
}

/// Find the root directory of an installed package.
///
/// Environment variable overrides (precedence order):
///  1. LIBSTUDY_NODE_MODULES (points to a node_modules directory)
///  2. LIBSTUDY_PACKAGE_PATH_<UPPER_SNAKE_PACKAGE_NAME> (points directly to the package root)
///
/// Otherwise `node_modules/<name>` is searched in `context_path` and each of its ancestors.
pub fn find_package_root(package_name: &str, context_path: &Path) -> Result<PathBuf> {
    if let Ok(global_node_modules) = std::env::var("LIBSTUDY_NODE_MODULES") {
        let p = Path::new(&global_node_modules).join(package_name);
        if p.join("package.json").is_file() {
            return Ok(p);
        }
    }
    let specific_key = format!(
        "LIBSTUDY_PACKAGE_PATH_{}",
        package_name
            .trim_start_matches('@')
            .to_ascii_uppercase()
            .replace(['-', '.', '/'], "_")
    );
    if let Ok(pkg_override) = std::env::var(&specific_key) {
        let p = Path::new(&pkg_override);
        if p.join("package.json").is_file() {
            return Ok(p.to_path_buf());
        }
    }

    for dir in context_path.ancestors() {
        let candidate = dir.join("node_modules").join(package_name);
        if candidate.join("package.json").is_file() {
            return Ok(candidate);
        }
    }

    Err(anyhow!(
        "Package '{}' not found in any node_modules above '{}'",
        package_name,
        context_path.display()
    ))
}

/// Read and parse `package.json` from a package root
pub fn read_descriptor(package_root: &Path) -> Result<Value> {
    let path = package_root.join("package.json");
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Resolve a package name to its entry module
pub fn resolve(package_name: &str, context_path: &Path) -> Result<ResolvedModule> {
    let package_root = find_package_root(package_name, context_path)?;
    let descriptor = read_descriptor(&package_root)?;
    let entry_point = resolve_entry_point(&package_root, &descriptor)?;
    Ok(ResolvedModule {
        package_root,
        entry_point,
    })
}

/// Pick the entry module: `exports["."]`, then `main`, then `index.js`
pub fn resolve_entry_point(package_root: &Path, descriptor: &Value) -> Result<PathBuf> {
    let declared = descriptor
        .get("exports")
        .and_then(exports_target)
        .or_else(|| descriptor.get("main").and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("index.js");

    resolve_file(&package_root.join(declared)).ok_or_else(|| {
        anyhow!(
            "Entry point '{}' does not exist in '{}'",
            declared,
            package_root.display()
        )
    })
}

/// Try `path` as a file, with common extensions, then as a directory index
pub fn resolve_file(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    for ext in ["js", "cjs", "mjs"] {
        let mut with_ext = path.as_os_str().to_owned();
        with_ext.push(".");
        with_ext.push(ext);
        let candidate = PathBuf::from(with_ext);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    let index = path.join("index.js");
    index.is_file().then_some(index)
}

/// Root export target from an `exports` field (string, `"."` map, or condition map)
fn exports_target(exports: &Value) -> Option<&str> {
    match exports {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => match map.get(".") {
            Some(root) => condition_target(root),
            None if map.keys().all(|k| !k.starts_with('.')) => condition_target(exports),
            None => None,
        },
        _ => None,
    }
}

fn condition_target(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => ["require", "node", "default", "import"]
            .iter()
            .find_map(|cond| map.get(*cond).and_then(condition_target)),
        Value::Array(items) => items.iter().find_map(condition_target),
        _ => None,
    }
}
