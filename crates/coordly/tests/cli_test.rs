//! Integration tests for the `coordly` CLI binary.
//!
//! Argument parsing, completions, config handling, and `watch --once`
//! against a local mock endpoint.
#![allow(clippy::unwrap_used)]

use std::path::Path;
use std::time::Duration;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `coordly` binary with env isolation.
///
/// Clears all `COORDLY_*` env vars and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn coordly_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("coordly");
    cmd.env("HOME", "/tmp/coordly-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/coordly-cli-test-nonexistent")
        .env_remove("COORDLY_SOURCE")
        .env_remove("COORDLY_CONFIG")
        .env_remove("COORDLY_TOKEN")
        .env_remove("RUST_LOG");
    cmd
}

/// Same as [`coordly_cmd`] but reading and writing `config`.
fn coordly_with_config(config: &Path) -> assert_cmd::Command {
    let mut cmd = coordly_cmd();
    cmd.arg("--config").arg(config);
    cmd
}

async fn serve(status: u16, body: serde_json::Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(&server)
        .await;
    server
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = coordly_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_lists_commands() {
    coordly_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("watch")
            .and(predicate::str::contains("config"))
            .and(predicate::str::contains("completions")),
    );
}

#[test]
fn test_version_flag() {
    coordly_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("coordly"));
}

#[test]
fn test_completions_zsh() {
    coordly_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

// ── Watch ───────────────────────────────────────────────────────────

#[test]
fn test_watch_without_source_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    coordly_with_config(&dir.path().join("config.toml"))
        .args(["watch", "--once"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No source configured"));
}

#[test]
fn test_watch_rejects_relative_pointer() {
    coordly_cmd()
        .args(["watch", "http://127.0.0.1:9/status", "--once", "--field", "power"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("JSON pointer"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_watch_once_prints_the_payload() {
    let server = serve(200, json!({ "power": 230.5 })).await;

    coordly_cmd()
        .args(["watch", &format!("{}/status", server.uri()), "--once", "--compact"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"{"power":230.5}"#));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_watch_once_prints_selected_fields() {
    let server = serve(200, json!({ "meter": { "power": 230.5 }, "name": "main" })).await;

    coordly_cmd()
        .args(["watch", &format!("{}/status", server.uri()), "--once", "--compact"])
        .args(["-f", "/meter/power", "-f", "/name"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""/meter/power":230.5"#))
        .stdout(predicate::str::contains(r#""/name":null"#));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_watch_rejected_token_exits_with_auth_code() {
    let server = serve(401, json!({ "error": "unauthorized" })).await;

    coordly_cmd()
        .args(["watch", &format!("{}/status", server.uri()), "--once", "--token", "bad"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Authentication failed"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_watch_unavailable_source_exits_with_connection_code() {
    let server = serve(503, json!({})).await;

    coordly_cmd()
        .args(["watch", &format!("{}/status", server.uri()), "--once"])
        .assert()
        .code(7)
        .stderr(predicate::str::contains("not ready"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_watch_reports_a_source_going_down() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "power": 230.5 })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    // Runs until killed by the timeout; the output so far is still captured.
    let output = coordly_cmd()
        .args(["watch", &format!("{}/status", server.uri()), "--compact"])
        .args(["--interval", "1s"])
        .timeout(Duration::from_secs(4))
        .output()
        .unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stdout.contains(r#"{"power":230.5}"#), "stdout:\n{stdout}");
    assert!(stderr.contains("adhoc is degraded"), "stderr:\n{stderr}");
    assert!(stderr.contains("last good update: 20"), "stderr:\n{stderr}");
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honors_override() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("custom.toml");
    coordly_with_config(&config)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.toml"));
}

#[test]
fn test_config_init_then_show_and_sources() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");

    coordly_with_config(&config)
        .args(["config", "init", "--name", "meter", "--url", "http://meter.local/status"])
        .args(["--interval", "15"])
        .assert()
        .success();
    assert!(config.exists());

    coordly_with_config(&config)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("http://meter.local/status"))
        .stdout(predicate::str::contains(r#"default_source = "meter""#));

    coordly_with_config(&config)
        .args(["config", "sources"])
        .assert()
        .success()
        .stdout(predicate::str::contains("* meter"));

    // A second init with the same name needs --force.
    coordly_with_config(&config)
        .args(["config", "init", "--name", "meter", "--url", "http://other.local/"])
        .assert()
        .code(2);
}

#[test]
fn test_config_init_rejects_invalid_url() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");

    coordly_with_config(&config)
        .args(["config", "init", "--url", "not a url"])
        .assert()
        .code(2);
    assert!(!config.exists());
}

#[test]
fn test_config_use_unknown_source() {
    let dir = tempfile::tempdir().unwrap();
    coordly_with_config(&dir.path().join("config.toml"))
        .args(["config", "use", "missing"])
        .assert()
        .code(4);
}

#[test]
fn test_show_redacts_tokens() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(
        &config,
        "[sources.hub]\nurl = \"http://hub.local/\"\ntoken = \"hunter2\"\n",
    )
    .unwrap();

    coordly_with_config(&config)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("<redacted>"))
        .stdout(predicate::str::contains("hunter2").not());
}
