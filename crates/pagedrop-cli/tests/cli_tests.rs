//! Integration tests for the `pagedrop` CLI binary.
//!
//! These run the CLI as a subprocess and check exit codes and output. None
//! of them need a running server: network calls go to a closed port.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::fs;
use std::path::Path;
use std::process::Command;

/// Nothing listens here.
const DEAD_URL: &str = "http://127.0.0.1:19998";

fn pagedrop_bin() -> String {
    let path = env!("CARGO_BIN_EXE_pagedrop");
    assert!(
        Path::new(path).exists(),
        "pagedrop binary not found at {path}"
    );
    path.to_owned()
}

fn command() -> Command {
    let mut cmd = Command::new(pagedrop_bin());
    cmd.env("PAGEDROP_URL", DEAD_URL)
        .env_remove("PAGEDROP_ADMIN_KEY")
        .env_remove("PAGEDROP_ACCESS_KEY")
        .env_remove("PAGEDROP_EXPIRE_DAYS")
        .env_remove("PAGEDROP_MAX_HTML_KB");
    cmd
}

/// Run with args and return (`exit_code`, stdout, stderr).
fn run_with(cmd: &mut Command, args: &[&str]) -> (i32, String, String) {
    let output = cmd.args(args).output().expect("failed to execute pagedrop");
    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (code, stdout, stderr)
}

fn run(args: &[&str]) -> (i32, String, String) {
    run_with(&mut command(), args)
}

fn html_file(dir: &tempfile::TempDir, content: &str) -> String {
    let path = dir.path().join("page.html");
    fs::write(&path, content).expect("write failed");
    path.to_str().unwrap().to_owned()
}

// ── Version & help ───────────────────────────────────────────────────

#[test]
fn test_version_flag() {
    let (code, stdout, _) = run(&["--version"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("pagedrop"), "version output: {stdout}");
}

#[test]
fn test_help_lists_commands() {
    let (code, stdout, _) = run(&["--help"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("Pagedrop CLI"));
    for sub in ["deploy", "health", "stats", "init", "keys", "pages"] {
        assert!(stdout.contains(sub), "help should list '{sub}'");
    }
}

#[test]
fn test_subcommand_help() {
    for sub in ["deploy", "keys", "pages"] {
        let (code, stdout, _) = run(&[sub, "--help"]);
        assert_eq!(code, 0, "{sub} --help should exit 0");
        assert!(!stdout.is_empty());
    }
}

// ── Network failures ─────────────────────────────────────────────────

#[test]
fn test_health_reports_network_failure() {
    let (code, _, stderr) = run(&["health"]);
    assert_ne!(code, 0);
    assert!(
        stderr.contains("network request failed"),
        "should report a network failure: {stderr}"
    );
}

#[test]
fn test_deploy_reports_network_failure() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let file = html_file(&dir, "<h1>Hello</h1>");
    let (code, _, stderr) = run_with(
        command().env("PAGEDROP_ACCESS_KEY", "pd_test"),
        &["deploy", &file, "--title", "Hello", "--description", "A test"],
    );
    assert_ne!(code, 0);
    assert!(stderr.contains("network request failed"), "{stderr}");
}

// ── Local validation (never reaches the network) ─────────────────────

#[test]
fn test_deploy_rejects_empty_title() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let file = html_file(&dir, "<h1>Hello</h1>");
    let (code, _, stderr) = run_with(
        command().env("PAGEDROP_ACCESS_KEY", "pd_test"),
        &["deploy", &file, "--title", "  ", "--description", "d"],
    );
    assert_ne!(code, 0);
    assert!(stderr.contains("title must not be empty"), "{stderr}");
    assert!(!stderr.contains("network"));
}

#[test]
fn test_deploy_rejects_empty_html() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let file = html_file(&dir, "\n\n");
    let (code, _, stderr) = run_with(
        command().env("PAGEDROP_ACCESS_KEY", "pd_test"),
        &["deploy", &file, "--title", "t", "--description", "d"],
    );
    assert_ne!(code, 0);
    assert!(stderr.contains("HTML content must not be empty"), "{stderr}");
}

#[test]
fn test_deploy_rejects_oversized_html() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let file = html_file(&dir, &"a".repeat(11 * 1024));
    let (code, _, stderr) = run_with(
        command()
            .env("PAGEDROP_ACCESS_KEY", "pd_test")
            .env("PAGEDROP_MAX_HTML_KB", "10"),
        &["deploy", &file, "--title", "t", "--description", "d"],
    );
    assert_ne!(code, 0);
    assert!(stderr.contains("too large"), "{stderr}");
    assert!(!stderr.contains("network"));
}

#[test]
fn test_deploy_rejects_out_of_range_expiry() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let file = html_file(&dir, "<p>x</p>");
    let (code, _, stderr) = run(&[
        "deploy",
        &file,
        "--title",
        "t",
        "--description",
        "d",
        "--expire-days",
        "366",
    ]);
    assert_ne!(code, 0);
    assert!(stderr.contains("366"), "{stderr}");
}

#[test]
fn test_deploy_requires_a_key() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let file = html_file(&dir, "<p>x</p>");
    let (code, _, stderr) = run(&["deploy", &file, "--title", "t", "--description", "d"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("no access key"), "{stderr}");
}

#[test]
fn test_deploy_missing_file() {
    let (code, _, stderr) = run_with(
        command().env("PAGEDROP_ACCESS_KEY", "pd_test"),
        &[
            "deploy",
            "/tmp/pagedrop-test-nonexistent.html",
            "--title",
            "t",
            "--description",
            "d",
        ],
    );
    assert_ne!(code, 0);
    assert!(stderr.contains("failed to read HTML file"), "{stderr}");
}

#[test]
fn test_stats_requires_admin_key() {
    let (code, _, stderr) = run(&["stats"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("no admin key"), "{stderr}");
}
