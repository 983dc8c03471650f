//! Focused CLI argument parsing tests.
//!
//! None of these touch a store.

#![allow(deprecated)] // Command::cargo_bin is deprecated but replacement requires newer assert_cmd

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn isolab(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("isolab").unwrap();
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path())
        .env_remove("PG_URL")
        .env_remove("CRDB_URL");
    cmd
}

#[test]
fn version_flag_shows_version() {
    Command::cargo_bin("isolab")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("isolab"));
}

#[test]
fn help_flag_shows_usage() {
    Command::cargo_bin("isolab")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("isolation anomalies"))
        .stdout(predicate::str::contains("--phantom"))
        .stdout(predicate::str::contains("--write-skew"));
}

#[test]
fn no_scenario_prints_usage_and_succeeds() {
    let home = TempDir::new().unwrap();
    isolab(&home)
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn write_alias_is_accepted() {
    let home = TempDir::new().unwrap();
    // No targets configured, so nothing runs.
    isolab(&home)
        .arg("--write")
        .assert()
        .success()
        .stdout(predicate::str::contains("No targets configured"));
}

#[test]
fn invalid_isolation_is_rejected() {
    Command::cargo_bin("isolab")
        .unwrap()
        .args(["--phantom", "--isolation", "chaos"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown isolation level"));
}

#[test]
fn snapshot_is_accepted_as_an_isolation_level() {
    let home = TempDir::new().unwrap();
    isolab(&home)
        .args(["--phantom", "--isolation", "snapshot"])
        .assert()
        .success();
}

#[test]
fn unknown_flag_is_rejected() {
    Command::cargo_bin("isolab")
        .unwrap()
        .arg("--dirty-read")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unexpected argument"));
}
