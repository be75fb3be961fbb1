//! Integration tests for the crate-index CLI
//!
//! These tests exercise the CLI commands end-to-end using assert_cmd.
//! Repositories are plain `git init` checkouts without a git-annex branch,
//! which the index treats as an empty collection.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

/// Helper to get a crate-index command with a clean environment
fn crate_index() -> Command {
    let mut cmd = Command::cargo_bin("crate-index").unwrap();
    for var in [
        "CRATE_INDEX_BRANCH",
        "CRATE_INDEX_AUTO_REFRESH",
        "CRATE_INDEX_LIMIT",
        "CRATE_INDEX_FORMAT",
        "CRATE_INDEX_REPO",
        "CRATE_INDEX_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn git_init(dir: &Path) {
    let status = std::process::Command::new("git")
        .args(["init", "-q"])
        .current_dir(dir)
        .status()
        .unwrap();
    assert!(status.success());
}

/// Helper to create an empty repository in a temp directory
fn setup_repo() -> TempDir {
    let tmp = TempDir::new().unwrap();
    git_init(tmp.path());
    tmp
}

// ============================================================================
// Basic Commands
// ============================================================================

#[test]
fn test_help() {
    crate_index()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("search"))
        .stdout(predicate::str::contains("index"));
}

#[test]
fn test_version() {
    crate_index()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("crate-index"));
}

#[test]
fn test_fields_lists_aliases() {
    crate_index()
        .arg("fields")
        .assert()
        .success()
        .stdout(predicate::str::contains("bpm"))
        .stdout(predicate::str::contains("tempo"))
        .stdout(predicate::str::contains("crate"));
}

#[test]
fn test_fields_json() {
    let output = crate_index()
        .args(["fields", "--format", "json", "--kind", "numeric"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let names: Vec<&str> = value
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["year", "bpm", "rating"]);
}

#[test]
fn test_completions_bash() {
    crate_index()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("crate-index"));
}

// ============================================================================
// Query Errors
// ============================================================================

#[test]
fn test_syntax_error_fails_before_repository_lookup() {
    // Not a repository: the query must be rejected first
    let tmp = TempDir::new().unwrap();
    crate_index()
        .current_dir(tmp.path())
        .args(["search", "artist:burial", "bpm:>fast"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("syntax"));
}

#[test]
fn test_unknown_field_fails() {
    let tmp = TempDir::new().unwrap();
    crate_index()
        .current_dir(tmp.path())
        .args(["search", "colour:red"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("colour"));
}

#[test]
fn test_range_on_text_field_is_substring() {
    let tmp = TempDir::new().unwrap();
    crate_index()
        .current_dir(tmp.path())
        .args(["search", "--explain", "title:1-2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"contains\""));
}

#[test]
fn test_comparison_on_text_field_fails() {
    let tmp = TempDir::new().unwrap();
    crate_index()
        .current_dir(tmp.path())
        .args(["search", "genre:>3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("genre"));
}

#[test]
fn test_explain_prints_condition() {
    let tmp = TempDir::new().unwrap();
    let output = crate_index()
        .current_dir(tmp.path())
        .args(["search", "--explain", "rating:>=4", "|", "crate:peak"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["parsed"]["groups"].as_array().unwrap().len(), 2);
    assert!(value["compiled"]["condition"]
        .as_str()
        .unwrap()
        .contains(" OR "));
}

#[test]
fn test_search_outside_repository_fails() {
    let tmp = TempDir::new().unwrap();
    crate_index()
        .args(["--repo", tmp.path().to_str().unwrap(), "search", "artist:x"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a git repository"));
}

// ============================================================================
// Index Commands
// ============================================================================

#[test]
fn test_status_before_build() {
    let tmp = setup_repo();
    crate_index()
        .current_dir(tmp.path())
        .args(["index", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("never"));
}

#[test]
fn test_build_without_metadata_branch() {
    let tmp = setup_repo();
    crate_index()
        .current_dir(tmp.path())
        .args(["index", "build"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Tracks:"));

    assert!(tmp.path().join(".git/crate-index/index.db").exists());

    let output = crate_index()
        .current_dir(tmp.path())
        .args(["index", "status", "--format", "json"])
        .output()
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["state"]["branch"], "git-annex");
    assert!(value["state"]["branch_commit"].is_null());
    assert_eq!(value["statistics"]["total_tracks"], 0);
}

#[test]
fn test_build_json_stats() {
    let tmp = setup_repo();
    let output = crate_index()
        .current_dir(tmp.path())
        .args(["--format", "json", "index", "build", "--full"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["mode"], "full");
    assert_eq!(value["keys_total"], 0);
}

#[test]
fn test_search_empty_collection() {
    let tmp = setup_repo();
    crate_index()
        .current_dir(tmp.path())
        .args(["search", "--format", "path", "artist:burial"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    crate_index()
        .current_dir(tmp.path())
        .args(["search", "--count"])
        .assert()
        .success()
        .stdout("0\n");
}

#[test]
fn test_raw_query_is_read_only() {
    let tmp = setup_repo();
    crate_index()
        .current_dir(tmp.path())
        .args(["index", "query", "SELECT COUNT(*) AS n FROM tracks"])
        .assert()
        .success()
        .stdout("n\n0\n");

    crate_index()
        .current_dir(tmp.path())
        .args(["index", "query", "DELETE FROM tracks"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("read-only"));
}

#[test]
fn test_clear_removes_database() {
    let tmp = setup_repo();
    crate_index()
        .current_dir(tmp.path())
        .args(["index", "build"])
        .assert()
        .success();

    crate_index()
        .current_dir(tmp.path())
        .args(["index", "clear"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Index cleared"));
    assert!(!tmp.path().join(".git/crate-index/index.db").exists());

    crate_index()
        .current_dir(tmp.path())
        .args(["index", "clear"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No index to clear"));
}
