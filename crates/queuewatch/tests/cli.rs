//! CLI contract tests for `qw`.
//!
//! Runs the binary against temp config and settings files.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn qw(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("qw").expect("qw binary");
    cmd.current_dir(dir.path())
        .env_remove("RUST_LOG")
        .env_remove("QW_CONFIG")
        .env("QW_SETTINGS", dir.path().join("settings.json"));
    cmd
}

#[test]
fn classify_reports_queue_kind() {
    let dir = TempDir::new().unwrap();
    qw(&dir)
        .args(["classify", "Costco queue now open"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""classification":"COSTCO""#))
        .stdout(predicate::str::contains(r#""matched_text":"costco queue now open""#));
}

#[test]
fn classify_honours_skip_strings() {
    let dir = TempDir::new().unwrap();
    qw(&dir)
        .args(["classify", "Plush is up at Target target.com/p/123"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""classification":"NONE""#));
}

#[test]
fn enable_disable_round_trip_through_settings_file() {
    let dir = TempDir::new().unwrap();
    qw(&dir).arg("disable").assert().success();
    qw(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""enabled": false"#));

    qw(&dir).arg("enable").assert().success();
    qw(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""enabled": true"#))
        .stdout(predicate::str::contains(r#""audio_permission": false"#));
}

#[test]
fn custom_rules_from_config_file() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("queuewatch.toml"),
        r#"
[classifier]
skip_strings = []

[[classifier.rules]]
name = "WALMART"
patterns = [{ contains = "walmart drop" }]
"#,
    )
    .unwrap();

    qw(&dir)
        .args(["classify", "Walmart drop live", "costco queue"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""classification":"WALMART""#))
        .stdout(predicate::str::contains(r#""classification":"NONE""#));
}

#[test]
fn config_check_rejects_invalid_regex() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("bad.toml");
    std::fs::write(
        &config,
        r#"
[[classifier.rules]]
name = "BROKEN"
patterns = [{ regex = "(unclosed" }]
"#,
    )
    .unwrap();

    qw(&dir)
        .args(["--config", config.to_str().unwrap(), "config", "check"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("BROKEN"));
}

#[test]
fn missing_config_file_is_actionable() {
    let dir = TempDir::new().unwrap();
    qw(&dir)
        .args(["--config", "nope.toml", "config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nope.toml"));
}

#[test]
fn config_show_prints_defaults() {
    let dir = TempDir::new().unwrap();
    qw(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("check_interval_ms = 5000"))
        .stdout(predicate::str::contains("debounce_ms = 30000"));
}
