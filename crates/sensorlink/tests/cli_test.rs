//! Integration tests for the `sensorlink` binary.
//!
//! Argument parsing, config handling and REST-backed commands against a
//! wiremock device. Nothing touches the user's real configuration.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a command with env isolation: config lives under `home`.
fn sensorlink_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("sensorlink");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home)
        .env_remove("SENSORLINK_PROFILE")
        .env_remove("SENSORLINK_DEVICE")
        .env_remove("SENSORLINK_OUTPUT")
        .env_remove("SENSORLINK_TIMEOUT")
        .env_remove("RUST_LOG");
    cmd
}

/// Run a prepared command off the async runtime so wiremock keeps serving.
async fn run(mut cmd: assert_cmd::Command) -> std::process::Output {
    tokio::task::spawn_blocking(move || cmd.output().unwrap())
        .await
        .unwrap()
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let home = TempDir::new().unwrap();
    let output = sensorlink_cmd(home.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Usage"));
}

#[test]
fn test_help_lists_commands() {
    let home = TempDir::new().unwrap();
    sensorlink_cmd(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("get")
                .and(predicate::str::contains("watch"))
                .and(predicate::str::contains("describe")),
        );
}

#[test]
fn test_completions_bash() {
    let home = TempDir::new().unwrap();
    sensorlink_cmd(home.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_missing_device_is_usage_error() {
    let home = TempDir::new().unwrap();
    sensorlink_cmd(home.path())
        .args(["get", "system/battery", "level"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No device configured"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_init_and_profiles() {
    let home = TempDir::new().unwrap();

    sensorlink_cmd(home.path())
        .args(["config", "init", "10.0.0.5", "--name", "wrist"])
        .assert()
        .success();

    sensorlink_cmd(home.path())
        .args(["config", "profiles", "-o", "plain"])
        .assert()
        .success()
        .stdout(predicate::str::contains("wrist"));

    sensorlink_cmd(home.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("10.0.0.5"));

    sensorlink_cmd(home.path())
        .args(["config", "init", "10.0.0.6", "--name", "wrist"])
        .assert()
        .code(2);
}

#[test]
fn test_unknown_profile() {
    let home = TempDir::new().unwrap();
    sensorlink_cmd(home.path())
        .args(["--profile", "nope", "get", "system/battery", "level"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("nope"));
}

// ── Device commands ─────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_get_property() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/system/battery.level"))
        .respond_with(ResponseTemplate::new(200).set_body_string("87"))
        .mount(&server)
        .await;

    let home = TempDir::new().unwrap();
    let mut cmd = sensorlink_cmd(home.path());
    cmd.args(["--device", &server.address().to_string(), "get", "system/battery", "level"]);
    let output = run(cmd).await;

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "87");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rejected_set_exits_nonzero() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/system/imu.rate"))
        .respond_with(ResponseTemplate::new(200).set_body_string("false"))
        .mount(&server)
        .await;

    let home = TempDir::new().unwrap();
    let mut cmd = sensorlink_cmd(home.path());
    cmd.args(["--device", &server.address().to_string(), "set", "system/imu", "rate", "9999"]);
    let output = run(cmd).await;

    assert_eq!(output.status.code(), Some(5));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_check_reports_missing_names() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/system/imu"))
        .and(query_param("help", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "properties": { "rate": { "type": "int", "mode": "rw" } },
            "signals": { "sample": {} }
        })))
        .mount(&server)
        .await;

    let home = TempDir::new().unwrap();
    let mut cmd = sensorlink_cmd(home.path());
    cmd.args([
        "--device",
        &server.address().to_string(),
        "-o",
        "plain",
        "check",
        "system/imu",
        "--property",
        "rate:rw",
        "--signal",
        "sample",
        "--command",
        "calibrate",
    ]);
    let output = run(cmd).await;

    assert_eq!(output.status.code(), Some(6));
    assert!(String::from_utf8_lossy(&output.stdout).contains("command\tcalibrate\tmissing on device"));
}
