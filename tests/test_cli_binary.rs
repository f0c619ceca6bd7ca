//! Smoke tests for the `concord` binary
//!
//! Exercise commands that need no network access and verify exit codes
//! match the documented table.

use serde_json::Value;
use std::fs;
use std::process::{Command, Output};
use tempfile::TempDir;

fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join(".git")).unwrap();
    dir
}

fn run_concord(args: &[&str], dir: &TempDir) -> Output {
    Command::new(env!("CARGO_BIN_EXE_concord"))
        .args(args)
        .current_dir(dir.path())
        .env_remove("CONCORD_LLM_PROVIDER")
        .env_remove("CONCORD_RETRIEVAL_URL")
        .env_remove("CONCORD_MAX_ITERATIONS")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute concord")
}

#[test]
fn test_config_json_reports_sources() {
    let dir = workspace();
    fs::create_dir_all(dir.path().join(".concord")).unwrap();
    fs::write(
        dir.path().join(".concord/config.toml"),
        "[engine]\ntop_k = 8\n",
    )
    .unwrap();

    let output = run_concord(&["--concurrency", "2", "config", "--json"], &dir);
    assert_eq!(output.status.code(), Some(0));

    let json: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["top_k"]["value"], "8");
    assert_eq!(json["top_k"]["source"], "config");
    assert_eq!(json["concurrency"]["value"], "2");
    assert_eq!(json["concurrency"]["source"], "cli");
    assert_eq!(json["max_iterations"]["source"], "default");
}

#[test]
fn test_config_human_output() {
    let dir = workspace();
    let output = run_concord(&["config"], &dir);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Effective configuration:"));
    assert!(stdout.contains("match_threshold = 0.6 (from default)"));
}

#[test]
fn test_missing_arguments_exit_with_usage_code() {
    let dir = workspace();
    let output = run_concord(&["check", "early-season classification", "rename"], &dir);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_invalid_override_exits_with_config_code() {
    let dir = workspace();
    let output = run_concord(&["--match-threshold", "2.5", "config"], &dir);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("match_threshold"));
}

#[test]
fn test_malformed_request_file_is_rejected() {
    let dir = workspace();
    fs::write(dir.path().join("request.json"), "{\"modification_point\": ").unwrap();
    let output = run_concord(&["check", "--request", "request.json"], &dir);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_version_flag_prints_crate_version() {
    let dir = workspace();
    let output = run_concord(&["--version"], &dir);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(concord::concord_version()));
}
