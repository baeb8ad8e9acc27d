//! Binary execution tests for the libstudy CLI

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

fn fixture_project() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("project")
}

/// Command with an isolated cache and no provider credentials
fn libstudy(cache: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("libstudy").unwrap();
    cmd.env_remove("OPENAI_API_KEY")
        .env_remove("LIBSTUDY_CACHE_DIR")
        .env_remove("LIBSTUDY_NODE_MODULES")
        .arg("--cache-dir")
        .arg(cache.path())
        .arg("--project-dir")
        .arg(fixture_project())
        .arg("--quiet");
    cmd
}

#[test]
fn test_help() {
    Command::cargo_bin("libstudy")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("study"))
        .stdout(predicate::str::contains("--cache-dir"));
}

#[test]
fn test_version() {
    Command::cargo_bin("libstudy")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_print_cache_dir_prefers_flag_over_env() {
    let cache = TempDir::new().unwrap();
    Command::cargo_bin("libstudy")
        .unwrap()
        .env("LIBSTUDY_CACHE_DIR", "/tmp/from-env")
        .arg("--cache-dir")
        .arg(cache.path())
        .arg("--print-cache-dir")
        .assert()
        .success()
        .stdout(predicate::str::contains(cache.path().to_string_lossy().as_ref()));
}

#[test]
fn test_print_cache_dir_from_env() {
    Command::cargo_bin("libstudy")
        .unwrap()
        .env("LIBSTUDY_CACHE_DIR", "/tmp/libstudy-from-env")
        .arg("--print-cache-dir")
        .assert()
        .success()
        .stdout(predicate::str::contains("/tmp/libstudy-from-env"));
}

#[test]
fn test_inspect_fixture_library() {
    let cache = TempDir::new().unwrap();
    libstudy(&cache)
        .args(["inspect", "mini-math"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mini-math@1.2.0"))
        .stdout(predicate::str::contains("fetchTable"))
        .stdout(predicate::str::contains("default export: false"))
        .stdout(predicate::str::contains("decimal-lite"));
}

#[test]
fn test_inspect_json() {
    let cache = TempDir::new().unwrap();
    let output = libstudy(&cache)
        .args(["--json", "inspect", "mini-math"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["name"], "mini-math");
    assert_eq!(report["hasDefaultExport"], false);
    assert_eq!(report["dependencies"]["mocha"], "^10.0.0");
    assert!(report["types"].as_str().unwrap().ends_with("index.d.ts"));
}

#[test]
fn test_inspect_rejects_traversal() {
    let cache = TempDir::new().unwrap();
    libstudy(&cache)
        .args(["inspect", "../etc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("VALIDATION_ERROR"));
}

#[test]
fn test_inspect_missing_library() {
    let cache = TempDir::new().unwrap();
    libstudy(&cache)
        .args(["inspect", "not-installed"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("LIBRARY_NOT_FOUND"));
}

#[test]
fn test_study_without_api_key_fails() {
    let cache = TempDir::new().unwrap();
    libstudy(&cache)
        .args(["study", "mini-math"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_ERROR"));
}

#[test]
fn test_cache_commands() {
    let cache = TempDir::new().unwrap();
    libstudy(&cache)
        .args(["inspect", "mini-math"])
        .assert()
        .success();

    libstudy(&cache)
        .args(["cache", "stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("libraries:"))
        .stdout(predicate::str::contains("docs: 0 entries"));

    libstudy(&cache)
        .args(["cache", "invalidate", "mini-math"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 0 documentation entries"));

    libstudy(&cache)
        .args(["cache", "clear", "--libraries"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 0 documentation"));
}
