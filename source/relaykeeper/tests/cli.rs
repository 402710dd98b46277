use std::fs;

use assert_cmd::Command;
use predicates::str::contains;
use tempfile::tempdir;

#[test]
fn status_reports_stopped_with_no_recorded_pid_file() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.json");
    fs::write(&config_path, "{}").unwrap();

    Command::cargo_bin("relaykeeper")
        .unwrap()
        .args(["--config", config_path.to_str().unwrap(), "status"])
        .assert()
        .success()
        .stdout(contains("stopped"));
}

#[test]
fn refresh_against_a_config_missing_the_directive_fails_with_a_clear_message() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.json");
    fs::write(&config_path, "{ \"outbounds\": [] }").unwrap();

    Command::cargo_bin("relaykeeper")
        .unwrap()
        .args(["--config", config_path.to_str().unwrap(), "refresh"])
        .assert()
        .failure()
        .stderr(contains("sentinel"));
}
