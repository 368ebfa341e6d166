//! Integration tests for the `livesync` CLI binary.
//!
//! Argument parsing, completions, config handling and a few commands run
//! against a mock endpoint.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `livesync` binary with env isolation.
///
/// Clears all `LIVESYNC_*` env vars and points home, config and data
/// directories at `home` so tests never touch the user's real setup.
fn livesync_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("livesync");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_DATA_HOME", home.join("data"))
        .env_remove("RUST_LOG")
        .env_remove("LIVESYNC_PROFILE")
        .env_remove("LIVESYNC_CONFIG")
        .env_remove("LIVESYNC_ENDPOINT")
        .env_remove("LIVESYNC_PUSH_URL")
        .env_remove("LIVESYNC_TOKEN")
        .env_remove("LIVESYNC_OUTPUT")
        .env_remove("LIVESYNC_INSECURE")
        .env_remove("LIVESYNC_TIMEOUT");
    cmd
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let home = tempfile::tempdir().unwrap();
    let output = livesync_cmd(home.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn test_help_lists_commands() {
    let home = tempfile::tempdir().unwrap();
    livesync_cmd(home.path()).arg("--help").assert().success().stdout(
        predicate::str::contains("watch")
            .and(predicate::str::contains("fetch"))
            .and(predicate::str::contains("send"))
            .and(predicate::str::contains("queue")),
    );
}

#[test]
fn test_version_flag() {
    let home = tempfile::tempdir().unwrap();
    livesync_cmd(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("livesync"));
}

#[test]
fn test_completions_zsh() {
    let home = tempfile::tempdir().unwrap();
    livesync_cmd(home.path())
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

// ── Error cases ─────────────────────────────────────────────────────

#[test]
fn test_fetch_without_endpoint_is_usage_error() {
    let home = tempfile::tempdir().unwrap();
    let output = livesync_cmd(home.path())
        .args(["fetch", "attendance"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("No endpoint configured"));
}

#[test]
fn test_unknown_profile_is_reported() {
    let home = tempfile::tempdir().unwrap();
    let output = livesync_cmd(home.path())
        .args(["--profile", "staging", "queue", "list"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(combined_output(&output).contains("staging"));
}

#[test]
fn test_send_rejects_invalid_json() {
    let home = tempfile::tempdir().unwrap();
    let output = livesync_cmd(home.path())
        .args(["--endpoint", "http://127.0.0.1:9", "send", "receipts", "-d", "{oops"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_init_then_show() {
    let home = tempfile::tempdir().unwrap();
    let config = home.path().join("livesync.toml");
    let config = config.to_str().unwrap();

    livesync_cmd(home.path())
        .args([
            "--config",
            config,
            "--profile",
            "ops",
            "config",
            "init",
            "--endpoint",
            "https://ops.example.com/api",
            "--token-env",
            "OPS_TOKEN",
        ])
        .assert()
        .success();

    livesync_cmd(home.path())
        .args(["--config", config, "config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("https://ops.example.com/api")
                .and(predicate::str::contains("OPS_TOKEN"))
                .and(predicate::str::contains(r#"default_profile = "ops""#)),
        );
}

#[test]
fn test_config_init_rejects_bad_url() {
    let home = tempfile::tempdir().unwrap();
    let config = home.path().join("livesync.toml");
    livesync_cmd(home.path())
        .args(["--config", config.to_str().unwrap()])
        .args(["config", "init", "--endpoint", "not a url"])
        .assert()
        .code(2);
    assert!(!config.exists());
}

// ── Against a mock endpoint ─────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_fetch_prints_payload() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/attendance"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"present": 12})),
        )
        .mount(&server)
        .await;

    let home = tempfile::tempdir().unwrap();
    let uri = server.uri();
    let output = tokio::task::spawn_blocking(move || {
        livesync_cmd(home.path())
            .args(["--endpoint", &uri, "-o", "json-compact", "fetch", "attendance"])
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert!(output.status.success(), "{}", combined_output(&output));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(r#""present":12"#), "{stdout}");
    assert!(stdout.contains(r#""source":"manual""#), "{stdout}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_send_while_unreachable_queues_then_lists() {
    let home = tempfile::tempdir().unwrap();
    let home_path = home.path().to_path_buf();

    let output = tokio::task::spawn_blocking(move || {
        let sent = livesync_cmd(&home_path)
            .args(["--endpoint", "http://127.0.0.1:9", "--timeout", "2"])
            .args(["-o", "json-compact", "send", "receipts", "-d", r#"{"total":5}"#])
            .output()
            .unwrap();
        let listed = livesync_cmd(&home_path)
            .args(["--endpoint", "http://127.0.0.1:9", "-o", "plain", "queue", "list"])
            .output()
            .unwrap();
        (sent, listed)
    })
    .await
    .unwrap();

    let (sent, listed) = output;
    assert!(sent.status.success(), "{}", combined_output(&sent));
    assert!(String::from_utf8_lossy(&sent.stdout).contains(r#""status":"queued""#));
    let ids = String::from_utf8_lossy(&listed.stdout);
    assert_eq!(ids.lines().count(), 1, "{ids}");
}
